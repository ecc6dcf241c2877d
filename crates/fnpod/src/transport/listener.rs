//! Unix socket server dispatching one invocation per connection.

use std::fs;
use std::io;
use std::os::unix::fs::FileTypeExt;
use std::os::unix::net::{UnixListener, UnixStream};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::thread;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use fnpod_config::{DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_MAX_REQUEST_BYTES};
use nix::errno::Errno;
use tracing::{debug, error, info, warn};

use super::connection::{ConnectionLimits, InvocationHandler};
use super::registry::{DrainReport, InFlight};
use super::{LISTENER_TARGET, ListenerError};
use crate::function::FunctionHandler;
use crate::lifecycle::ShutdownTrigger;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(25);
const ERROR_BACKOFF: Duration = Duration::from_millis(150);

/// A bound socket that has not started accepting yet.
#[derive(Debug)]
pub struct InvocationServer {
    path: Utf8PathBuf,
    listener: UnixListener,
    limits: ConnectionLimits,
}

impl InvocationServer {
    /// Binds `path`, replacing a stale socket file left by a dead process.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::UnixInUse`] when a live listener owns the
    /// path, [`ListenerError::UnixNotSocket`] when a regular file occupies
    /// it, and [`ListenerError::BindUnix`] when the socket cannot be created.
    pub fn bind(path: impl AsRef<Utf8Path>) -> Result<Self, ListenerError> {
        let path = path.as_ref().to_owned();
        let listener = bind_unix(&path)?;
        let limits = ConnectionLimits {
            timeout: Duration::from_millis(DEFAULT_CONNECTION_TIMEOUT_MS),
            max_request_bytes: usize::try_from(DEFAULT_MAX_REQUEST_BYTES).unwrap_or(usize::MAX),
        };
        Ok(Self {
            path,
            listener,
            limits,
        })
    }

    /// Sets the budget covering read, invocation and write of one
    /// connection.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.limits.timeout = timeout;
        self
    }

    /// Sets the largest request frame accepted.
    #[must_use]
    pub fn with_max_request_bytes(mut self, limit: usize) -> Self {
        self.limits.max_request_bytes = limit;
        self
    }

    /// Socket path this server is bound to.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Starts the accept loop on a background thread.
    ///
    /// A fatal accept error is reported through `trigger` so the owner can
    /// stop the server.
    ///
    /// # Errors
    ///
    /// Returns a [`ListenerError`] when the listener cannot be switched to
    /// non-blocking mode or the accept thread cannot be spawned. The socket
    /// file is removed in both cases.
    pub fn start(
        self,
        handler: Arc<dyn FunctionHandler>,
        trigger: ShutdownTrigger,
    ) -> Result<RunningServer, ListenerError> {
        if let Err(source) = self.listener.set_nonblocking(true) {
            cleanup_unix_socket(&self.path);
            return Err(ListenerError::NonBlocking { source });
        }
        let shutdown = Arc::new(AtomicBool::new(false));
        let registry = InFlight::new();
        let path = self.path.clone();
        let accept_loop = AcceptLoop {
            listener: self.listener,
            path: self.path,
            shutdown: Arc::clone(&shutdown),
            registry: Arc::clone(&registry),
            handler: Arc::new(InvocationHandler::new(handler, self.limits)),
            trigger,
        };
        let handle = match thread::Builder::new()
            .name("fnpod-accept".to_owned())
            .spawn(move || accept_loop.run())
        {
            Ok(handle) => handle,
            Err(source) => {
                cleanup_unix_socket(&path);
                return Err(ListenerError::Spawn { source });
            }
        };
        Ok(RunningServer {
            path,
            shutdown,
            registry,
            handle: Some(handle),
        })
    }
}

/// Handle to a server that is accepting connections.
pub struct RunningServer {
    path: Utf8PathBuf,
    shutdown: Arc<AtomicBool>,
    registry: Arc<InFlight>,
    handle: Option<thread::JoinHandle<()>>,
}

impl RunningServer {
    /// Socket path being served.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Number of connections currently being served.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    /// Stops accepting, removes the socket file and drains in-flight
    /// connections for at most `grace` before shutting the rest down.
    ///
    /// # Errors
    ///
    /// Returns [`ListenerError::ThreadPanic`] if the accept thread panicked.
    /// Connections are drained before the error is returned.
    pub fn stop(mut self, grace: Duration) -> Result<DrainReport, ListenerError> {
        self.shutdown.store(true, Ordering::SeqCst);
        let joined = match self.handle.take().map(thread::JoinHandle::join) {
            Some(Err(_)) => {
                cleanup_unix_socket(&self.path);
                Err(ListenerError::ThreadPanic)
            }
            Some(Ok(())) | None => Ok(()),
        };
        info!(
            target: LISTENER_TARGET,
            event = "draining",
            in_flight = self.registry.len(),
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "listener stopped, draining connections"
        );
        let report = self.registry.drain(grace);
        joined.map(|()| report)
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

struct AcceptLoop {
    listener: UnixListener,
    path: Utf8PathBuf,
    shutdown: Arc<AtomicBool>,
    registry: Arc<InFlight>,
    handler: Arc<InvocationHandler>,
    trigger: ShutdownTrigger,
}

impl AcceptLoop {
    fn run(self) {
        info!(
            target: LISTENER_TARGET,
            event = "bound",
            socket = %self.path,
            "invocation listener active"
        );
        let mut last_error = None::<io::ErrorKind>;
        while !self.shutdown.load(Ordering::SeqCst) {
            match self.listener.accept() {
                Ok((stream, _)) => {
                    last_error = None;
                    self.dispatch(stream);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_BACKOFF);
                }
                Err(error) if is_transient(&error) => {
                    let kind = error.kind();
                    if last_error != Some(kind) {
                        warn!(
                            target: LISTENER_TARGET,
                            error = %error,
                            "transient accept error, retrying"
                        );
                    }
                    last_error = Some(kind);
                    thread::sleep(ERROR_BACKOFF);
                }
                Err(source) => {
                    let failure = ListenerError::Accept {
                        path: self.path.to_string(),
                        source,
                    };
                    error!(
                        target: LISTENER_TARGET,
                        event = "listener_error",
                        error = %failure,
                        "accept loop failed"
                    );
                    self.trigger.listener_failed(failure.to_string());
                    break;
                }
            }
        }
        cleanup_unix_socket(&self.path);
    }

    fn dispatch(&self, stream: UnixStream) {
        if let Err(error) = stream.set_nonblocking(false) {
            warn!(
                target: LISTENER_TARGET,
                event = "connection_error",
                error = %error,
                "failed to configure accepted connection"
            );
            return;
        }
        let guard = match self.registry.register(&stream) {
            Ok(guard) => guard,
            Err(error) => {
                warn!(
                    target: LISTENER_TARGET,
                    event = "connection_error",
                    error = %error,
                    "failed to track accepted connection"
                );
                return;
            }
        };
        let connection = guard.id();
        debug!(
            target: LISTENER_TARGET,
            event = "connection_accepted",
            connection,
            "connection accepted"
        );
        let handler = Arc::clone(&self.handler);
        let spawned = thread::Builder::new()
            .name(format!("fnpod-conn-{connection}"))
            .spawn(move || {
                handler.handle(stream, connection);
                drop(guard);
            });
        if let Err(error) = spawned {
            warn!(
                target: LISTENER_TARGET,
                event = "connection_error",
                connection,
                error = %error,
                "failed to spawn connection thread"
            );
        }
    }
}

/// Accept errors worth retrying: interrupted or aborted handshakes and
/// descriptor or buffer exhaustion.
pub(super) fn is_transient(error: &io::Error) -> bool {
    if matches!(
        error.kind(),
        io::ErrorKind::Interrupted
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
    ) {
        return true;
    }
    error.raw_os_error().map(Errno::from_raw).is_some_and(|errno| {
        matches!(
            errno,
            Errno::EMFILE | Errno::ENFILE | Errno::ENOBUFS | Errno::ENOMEM | Errno::EPROTO
        )
    })
}

fn bind_unix(path: &Utf8Path) -> Result<UnixListener, ListenerError> {
    let display = || path.to_string();
    match fs::symlink_metadata(path) {
        Ok(metadata) => {
            if !metadata.file_type().is_socket() {
                return Err(ListenerError::UnixNotSocket { path: display() });
            }
            match UnixStream::connect(path) {
                Ok(_stream) => return Err(ListenerError::UnixInUse { path: display() }),
                Err(error)
                    if matches!(
                        error.kind(),
                        io::ErrorKind::ConnectionRefused | io::ErrorKind::NotFound
                    ) =>
                {
                    debug!(
                        target: LISTENER_TARGET,
                        socket = %path,
                        "removing stale socket file"
                    );
                    fs::remove_file(path).map_err(|source| ListenerError::UnixCleanup {
                        path: display(),
                        source,
                    })?;
                }
                Err(source) => {
                    return Err(ListenerError::UnixConnect {
                        path: display(),
                        source,
                    });
                }
            }
        }
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(source) => {
            return Err(ListenerError::UnixMetadata {
                path: display(),
                source,
            });
        }
    }

    UnixListener::bind(path).map_err(|source| ListenerError::BindUnix {
        path: display(),
        source,
    })
}

fn cleanup_unix_socket(path: &Utf8Path) {
    if let Err(error) = fs::remove_file(path)
        && error.kind() != io::ErrorKind::NotFound
    {
        warn!(
            target: LISTENER_TARGET,
            error = %error,
            socket = %path,
            "failed to remove unix socket file"
        );
    }
}
