use std::fmt;
use std::io;
use std::sync::mpsc;
use std::thread;

use signal_hook::consts::signal::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::{Handle, Signals};
use thiserror::Error;
use tracing::{debug, info};

use super::LIFECYCLE_TARGET;

/// Termination signals that start a graceful shutdown.
pub const TERMINATION_SIGNALS: [i32; 3] = [SIGTERM, SIGINT, SIGQUIT];

/// Why the pod left the accepting state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// A termination signal arrived.
    Signal(i32),
    /// The accept loop failed.
    ListenerFailed(String),
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Signal(signal) => write!(f, "signal {signal}"),
            Self::ListenerFailed(message) => write!(f, "listener failure: {message}"),
        }
    }
}

/// Sending half used to request shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownTrigger {
    sender: mpsc::Sender<StopReason>,
}

impl ShutdownTrigger {
    /// Creates a trigger and the receiver the lifecycle controller waits on.
    #[must_use]
    pub fn channel() -> (Self, ShutdownRequests) {
        let (sender, receiver) = mpsc::channel();
        (Self { sender }, ShutdownRequests { receiver })
    }

    /// Requests shutdown on behalf of a termination signal.
    pub fn signal(&self, signal: i32) {
        self.send(StopReason::Signal(signal));
    }

    /// Requests shutdown because the listener can no longer accept.
    pub fn listener_failed(&self, message: impl Into<String>) {
        self.send(StopReason::ListenerFailed(message.into()));
    }

    fn send(&self, reason: StopReason) {
        if let Err(mpsc::SendError(reason)) = self.sender.send(reason) {
            debug!(
                target: LIFECYCLE_TARGET,
                %reason,
                "shutdown already in progress, ignoring request"
            );
        }
    }
}

/// Receiving half of a [`ShutdownTrigger`].
#[derive(Debug)]
pub struct ShutdownRequests {
    receiver: mpsc::Receiver<StopReason>,
}

impl ShutdownRequests {
    /// Blocks until the first shutdown request arrives.
    ///
    /// Returns `None` once every trigger has been dropped without a request.
    #[must_use]
    pub fn wait(&self) -> Option<StopReason> {
        self.receiver.recv().ok()
    }
}

/// Errors reported while installing a shutdown source.
#[derive(Debug, Error)]
pub enum ShutdownError {
    /// Installing signal handlers failed.
    #[error("failed to install signal handlers: {source}")]
    Install {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the signal thread failed.
    #[error("failed to spawn signal thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
}

/// Source of termination requests.
pub trait ShutdownSignal: Send + Sync {
    /// Starts forwarding termination requests to `trigger` until the returned
    /// watch is dropped.
    ///
    /// # Errors
    ///
    /// Returns a [`ShutdownError`] when the source cannot be installed.
    fn install(&self, trigger: ShutdownTrigger) -> Result<SignalWatch, ShutdownError>;
}

/// Keeps a shutdown source active; dropping it stops forwarding.
#[derive(Debug, Default)]
pub struct SignalWatch {
    handle: Option<Handle>,
    thread: Option<thread::JoinHandle<()>>,
}

impl SignalWatch {
    /// A watch with no background resources, for sources that forward
    /// requests on their own.
    #[must_use]
    pub fn detached() -> Self {
        Self::default()
    }
}

impl Drop for SignalWatch {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.close();
        }
        if let Some(thread) = self.thread.take()
            && thread.join().is_err()
        {
            debug!(target: LIFECYCLE_TARGET, "signal thread panicked");
        }
    }
}

/// Shutdown source backed by SIGTERM, SIGINT and SIGQUIT.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemShutdownSignal;

impl SystemShutdownSignal {
    /// Builds the signal source.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ShutdownSignal for SystemShutdownSignal {
    fn install(&self, trigger: ShutdownTrigger) -> Result<SignalWatch, ShutdownError> {
        let mut signals =
            Signals::new(TERMINATION_SIGNALS).map_err(|source| ShutdownError::Install { source })?;
        let handle = signals.handle();
        let thread = thread::Builder::new()
            .name("fnpod-signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    info!(
                        target: LIFECYCLE_TARGET,
                        signal,
                        "shutdown signal received"
                    );
                    trigger.signal(signal);
                }
            });
        match thread {
            Ok(thread) => Ok(SignalWatch {
                handle: Some(handle),
                thread: Some(thread),
            }),
            Err(source) => {
                handle.close();
                Err(ShutdownError::Spawn { source })
            }
        }
    }
}
