//! Start-up, signal handling and graceful shutdown of the pod.

mod controller;
mod errors;
mod reporter;
mod shutdown;

pub use controller::{
    ExitReason, LifecycleController, LifecycleState, configured_handler, run_pod,
};
pub use errors::LaunchError;
pub use reporter::{LifecycleReporter, StructuredLifecycleReporter};
pub use shutdown::{
    ShutdownError, ShutdownRequests, ShutdownSignal, ShutdownTrigger, SignalWatch, StopReason,
    SystemShutdownSignal, TERMINATION_SIGNALS,
};

pub(crate) const LIFECYCLE_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::lifecycle");
