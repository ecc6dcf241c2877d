//! Shared fixtures for pod tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use camino::{Utf8Path, Utf8PathBuf};
use fnpod_protocol::{Envelope, Request, Response};
use tempfile::TempDir;

use crate::function::{FunctionHandler, HandlerError};
use crate::lifecycle::{
    LifecycleReporter, ShutdownError, ShutdownSignal, ShutdownTrigger, SignalWatch, StopReason,
};
use crate::transport::{DrainReport, ListenerError};

pub(crate) const WAIT_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Polls `condition` until it holds or [`WAIT_TIMEOUT`] passes.
pub(crate) fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(POLL_INTERVAL);
    }
    condition()
}

/// Temporary directory holding a socket path.
pub(crate) struct SocketDir {
    _dir: TempDir,
    path: Utf8PathBuf,
}

impl SocketDir {
    pub(crate) fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let path =
            Utf8PathBuf::from_path_buf(dir.path().join("pod.sock")).expect("utf8 socket path");
        Self { _dir: dir, path }
    }

    pub(crate) fn path(&self) -> &Utf8Path {
        &self.path
    }
}

/// The canonical GET envelope with a zero status carried response.
pub(crate) fn hello_envelope() -> Envelope {
    let mut carried = Response::default();
    carried.status_code = 0;
    Envelope::new(Request::new("GET", "/"), carried)
}

/// Handler that sets the body to `hello` after an optional delay and counts
/// how many invocations have started.
#[derive(Clone, Default)]
pub(crate) struct HelloHandler {
    delay: Duration,
    started: Arc<AtomicUsize>,
}

impl HelloHandler {
    pub(crate) fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            started: Arc::default(),
        }
    }

    pub(crate) fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl FunctionHandler for HelloHandler {
    fn invoke(&self, _request: Request, mut response: Response) -> Result<Response, HandlerError> {
        self.started.fetch_add(1, Ordering::SeqCst);
        thread::sleep(self.delay);
        response.body = "hello".to_owned();
        Ok(response)
    }
}

/// Shutdown source driven by the test.
#[derive(Clone, Default)]
pub(crate) struct ManualShutdown {
    trigger: Arc<Mutex<Option<ShutdownTrigger>>>,
    pending: Arc<Mutex<Option<i32>>>,
}

impl ManualShutdown {
    /// Builds a source that requests shutdown as soon as it is installed.
    pub(crate) fn pretriggered(signal: i32) -> Self {
        let source = Self::default();
        *source.pending.lock().expect("pending lock") = Some(signal);
        source
    }

    /// Delivers `signal` to the installed trigger.
    pub(crate) fn request(&self, signal: i32) {
        if let Some(trigger) = self.trigger.lock().expect("trigger lock").as_ref() {
            trigger.signal(signal);
            return;
        }
        *self.pending.lock().expect("pending lock") = Some(signal);
    }
}

impl ShutdownSignal for ManualShutdown {
    fn install(&self, trigger: ShutdownTrigger) -> Result<SignalWatch, ShutdownError> {
        if let Some(signal) = self.pending.lock().expect("pending lock").take() {
            trigger.signal(signal);
        }
        *self.trigger.lock().expect("trigger lock") = Some(trigger);
        Ok(SignalWatch::detached())
    }
}

/// Lifecycle event captured by [`RecordingReporter`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum LifecycleEvent {
    Starting,
    Bound,
    BindFailed(String),
    Draining(StopReason),
    Stopped(DrainReport),
}

/// Reporter that keeps every event in order.
#[derive(Default)]
pub(crate) struct RecordingReporter {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl RecordingReporter {
    pub(crate) fn events(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("events lock").clone()
    }

    pub(crate) fn saw(&self, predicate: impl Fn(&LifecycleEvent) -> bool) -> bool {
        self.events.lock().expect("events lock").iter().any(predicate)
    }

    fn record(&self, event: LifecycleEvent) {
        self.events.lock().expect("events lock").push(event);
    }
}

impl LifecycleReporter for RecordingReporter {
    fn starting(&self, _socket: &Utf8Path) {
        self.record(LifecycleEvent::Starting);
    }

    fn bound(&self, _socket: &Utf8Path) {
        self.record(LifecycleEvent::Bound);
    }

    fn bind_failed(&self, _socket: &Utf8Path, error: &ListenerError) {
        self.record(LifecycleEvent::BindFailed(error.to_string()));
    }

    fn draining(&self, reason: &StopReason, _in_flight: usize) {
        self.record(LifecycleEvent::Draining(reason.clone()));
    }

    fn stopped(&self, report: &DrainReport) {
        self.record(LifecycleEvent::Stopped(*report));
    }

    fn exited(&self, _exit_code: u8) {}
}
