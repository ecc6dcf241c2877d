//! Errors that prevent the pod from starting or stopping cleanly.

use thiserror::Error;

use crate::telemetry::TelemetryError;
use crate::transport::ListenerError;

use super::shutdown::ShutdownError;

/// Errors surfaced while launching or supervising the pod.
#[derive(Debug, Error)]
pub enum LaunchError {
    /// Structured logging could not be installed.
    #[error("failed to initialise telemetry: {source}")]
    Telemetry {
        /// Underlying telemetry error.
        #[source]
        source: TelemetryError,
    },
    /// Installing the shutdown signal source failed.
    #[error("failed to install shutdown signals: {source}")]
    Shutdown {
        /// Underlying shutdown error.
        #[source]
        source: ShutdownError,
    },
    /// The socket could not be bound.
    #[error("failed to bind invocation socket: {source}")]
    Bind {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
    /// The listener could not be started or stopped.
    #[error("invocation listener failed: {source}")]
    Listener {
        /// Underlying listener error.
        #[source]
        source: ListenerError,
    },
}

impl From<TelemetryError> for LaunchError {
    fn from(source: TelemetryError) -> Self {
        Self::Telemetry { source }
    }
}

impl From<ShutdownError> for LaunchError {
    fn from(source: ShutdownError) -> Self {
        Self::Shutdown { source }
    }
}

impl From<ListenerError> for LaunchError {
    fn from(source: ListenerError) -> Self {
        Self::Listener { source }
    }
}
