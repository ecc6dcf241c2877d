//! Error types for the invocation transport.

use std::io;
use std::time::Duration;

use fnpod_protocol::{DecodeError, FrameError, Response};
use thiserror::Error;

use crate::function::HandlerError;

/// Errors surfaced while binding or running the listener.
///
/// The `Bind*`/`Unix*` variants are raised by
/// [`InvocationServer::bind`](super::InvocationServer::bind) and are fatal at
/// startup.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// Creating the socket failed, for example because the parent directory
    /// is missing or not writable.
    #[error("failed to bind unix listener at {path}: {source}")]
    BindUnix {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Another process is accepting on the socket path.
    #[error("existing unix socket {path} is already in use")]
    UnixInUse {
        /// Socket path.
        path: String,
    },
    /// A file that is not a socket occupies the path.
    #[error("unix socket path {path} is not a socket")]
    UnixNotSocket {
        /// Socket path.
        path: String,
    },
    /// Inspecting the existing path failed.
    #[error("failed to read metadata for unix socket {path}: {source}")]
    UnixMetadata {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Probing the existing socket failed in an unexpected way.
    #[error("failed to connect to existing unix socket {path}: {source}")]
    UnixConnect {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Removing a stale socket file failed.
    #[error("failed to remove stale unix socket {path}: {source}")]
    UnixCleanup {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Switching the listener to non-blocking mode failed.
    #[error("failed to enable non-blocking listener: {source}")]
    NonBlocking {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Spawning the accept thread failed.
    #[error("failed to spawn accept thread: {source}")]
    Spawn {
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// `accept` failed with a non-transient error.
    #[error("failed to accept connection on {path}: {source}")]
    Accept {
        /// Socket path.
        path: String,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// The accept thread panicked.
    #[error("listener thread panicked")]
    ThreadPanic,
}

impl ListenerError {
    /// Returns `true` for failures raised while claiming the socket path.
    #[must_use]
    pub fn is_bind_error(&self) -> bool {
        matches!(
            self,
            Self::BindUnix { .. }
                | Self::UnixInUse { .. }
                | Self::UnixNotSocket { .. }
                | Self::UnixMetadata { .. }
                | Self::UnixConnect { .. }
                | Self::UnixCleanup { .. }
        )
    }
}

/// Failures confined to a single connection.
#[derive(Debug, Error)]
pub(crate) enum ConnectionError {
    #[error("failed to read request: {source}")]
    Read {
        #[source]
        source: io::Error,
    },
    #[error("request not received within {} ms", budget.as_millis())]
    ReadTimeout { budget: Duration },
    #[error(transparent)]
    Frame(#[from] FrameError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("{source}")]
    Handler {
        /// Script named by the carried response.
        script: String,
        #[source]
        source: HandlerError,
    },
    #[error("failed to write response: {source}")]
    Write {
        #[source]
        source: io::Error,
    },
}

/// Status sent when the request frame exceeds the size limit.
pub(crate) const STATUS_PAYLOAD_TOO_LARGE: u16 = 413;
/// Status sent when the request fails validation.
pub(crate) const STATUS_BAD_REQUEST: u16 = 400;
/// Status sent when the client stalls before completing its request.
pub(crate) const STATUS_REQUEST_TIMEOUT: u16 = 408;
/// Status sent when the handler fails.
pub(crate) const STATUS_HANDLER_FAILED: u16 = 500;

impl ConnectionError {
    /// Short machine-readable name used in log events.
    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Self::Read { .. } => "read",
            Self::ReadTimeout { .. } => "read_timeout",
            Self::Frame(_) => "frame",
            Self::Decode(_) => "decode",
            Self::Handler { .. } => "handler",
            Self::Write { .. } => "write",
        }
    }

    /// Builds the best-effort error response for this failure, if the
    /// connection can still carry one.
    pub(crate) fn response(&self) -> Option<Response> {
        let blank = Response::default();
        match self {
            Self::Read { .. } | Self::Write { .. } => None,
            Self::ReadTimeout { .. } => {
                Some(blank.with_error(STATUS_REQUEST_TIMEOUT, self.to_string()))
            }
            Self::Frame(_) => Some(blank.with_error(STATUS_PAYLOAD_TOO_LARGE, self.to_string())),
            Self::Decode(_) => Some(blank.with_error(STATUS_BAD_REQUEST, self.to_string())),
            Self::Handler { script, source } => Some(
                Response::for_script(script.as_str())
                    .with_error(STATUS_HANDLER_FAILED, source.to_string()),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(ConnectionError::ReadTimeout { budget: Duration::from_millis(5) }, 408)]
    #[case(ConnectionError::Frame(FrameError::TooLarge { limit: 8 }), 413)]
    #[case(ConnectionError::Decode(DecodeError::Empty), 400)]
    fn protocol_failures_map_to_statuses(#[case] error: ConnectionError, #[case] status: u16) {
        let response = error.response().expect("error response");
        assert_eq!(response.status_code, status);
        assert_eq!(response.script, "");
        assert!(response.headers.is_empty());
        assert_eq!(response.body, error.to_string());
    }

    #[test]
    fn handler_failures_keep_the_carried_script() {
        let error = ConnectionError::Handler {
            script: "index.js".to_owned(),
            source: HandlerError::failed("boom"),
        };
        let response = error.response().expect("error response");
        assert_eq!(response.status_code, 500);
        assert_eq!(response.script, "index.js");
        assert_eq!(response.body, "handler failed: boom");
    }

    #[test]
    fn broken_streams_get_no_response() {
        let error = ConnectionError::Write {
            source: io::Error::from(io::ErrorKind::BrokenPipe),
        };
        assert!(error.response().is_none());
    }
}
