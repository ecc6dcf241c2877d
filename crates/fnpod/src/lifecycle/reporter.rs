//! Structured lifecycle reporting.

use std::sync::Arc;

use camino::Utf8Path;

use crate::transport::{DrainReport, ListenerError};

use super::LIFECYCLE_TARGET;
use super::shutdown::StopReason;

/// Observer notified at each lifecycle transition.
pub trait LifecycleReporter: Send + Sync {
    /// Invoked before the socket is bound.
    fn starting(&self, socket: &Utf8Path);

    /// Invoked once the socket is bound and accepting.
    fn bound(&self, socket: &Utf8Path);

    /// Invoked when the socket cannot be bound.
    fn bind_failed(&self, socket: &Utf8Path, error: &ListenerError);

    /// Invoked when accepting stops and in-flight connections drain.
    fn draining(&self, reason: &StopReason, in_flight: usize);

    /// Invoked after draining completes.
    fn stopped(&self, report: &DrainReport);

    /// Invoked by the binary right before the process exits.
    fn exited(&self, exit_code: u8);
}

impl<T> LifecycleReporter for Arc<T>
where
    T: LifecycleReporter + ?Sized,
{
    fn starting(&self, socket: &Utf8Path) {
        (**self).starting(socket);
    }

    fn bound(&self, socket: &Utf8Path) {
        (**self).bound(socket);
    }

    fn bind_failed(&self, socket: &Utf8Path, error: &ListenerError) {
        (**self).bind_failed(socket, error);
    }

    fn draining(&self, reason: &StopReason, in_flight: usize) {
        (**self).draining(reason, in_flight);
    }

    fn stopped(&self, report: &DrainReport) {
        (**self).stopped(report);
    }

    fn exited(&self, exit_code: u8) {
        (**self).exited(exit_code);
    }
}

/// Reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredLifecycleReporter;

impl StructuredLifecycleReporter {
    /// Builds a new reporter.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl LifecycleReporter for StructuredLifecycleReporter {
    fn starting(&self, socket: &Utf8Path) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "starting",
            socket = %socket,
            "starting function pod"
        );
    }

    fn bound(&self, socket: &Utf8Path) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "bound",
            socket = %socket,
            "function pod accepting invocations"
        );
    }

    fn bind_failed(&self, socket: &Utf8Path, error: &ListenerError) {
        tracing::error!(
            target: LIFECYCLE_TARGET,
            event = "bind_failed",
            socket = %socket,
            error = %error,
            "function pod could not bind its socket"
        );
    }

    fn draining(&self, reason: &StopReason, in_flight: usize) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "draining",
            reason = %reason,
            in_flight,
            "function pod draining"
        );
    }

    fn stopped(&self, report: &DrainReport) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "stopped",
            completed = report.completed,
            forced = report.forced,
            "function pod stopped"
        );
    }

    fn exited(&self, exit_code: u8) {
        tracing::info!(
            target: LIFECYCLE_TARGET,
            event = "exited",
            exit_code,
            "function pod exiting"
        );
    }
}
