//! A function pod: serves one function invocation per connection on a Unix
//! domain socket.
//!
//! An orchestrator spawns the pod with a socket path, opens a connection per
//! invocation and writes one newline-terminated JSON envelope. The pod decodes
//! it, hands the request and carried response to the installed
//! [`FunctionHandler`], writes the resulting response as one JSON line and
//! closes the connection.
//!
//! The [`LifecycleController`] owns the [`InvocationServer`]: it binds the
//! socket, serves until SIGTERM, SIGINT or SIGQUIT arrives (or the accept loop
//! fails), then stops accepting and gives in-flight connections a grace
//! period before closing them forcibly.
//!
//! ```no_run
//! use fnpod::run_pod;
//! use fnpod_config::Config;
//!
//! let config = Config::new("/run/fnpod/pod.sock");
//! let reason = run_pod(&config)?;
//! std::process::exit(i32::from(reason.exit_code()));
//! # Ok::<(), fnpod::LaunchError>(())
//! ```

pub mod client;
pub mod function;
mod lifecycle;
mod telemetry;
mod transport;

pub use client::{ClientError, PodClient};
pub use function::{
    AsyncFunctionHandler, Blocking, CommandHandler, FunctionHandler, HandlerError,
    StaticBodyHandler,
};
pub use lifecycle::{
    ExitReason, LaunchError, LifecycleController, LifecycleReporter, LifecycleState,
    ShutdownError, ShutdownRequests, ShutdownSignal, ShutdownTrigger, SignalWatch, StopReason,
    StructuredLifecycleReporter, SystemShutdownSignal, TERMINATION_SIGNALS, configured_handler,
    run_pod,
};
pub use telemetry::{TelemetryError, TelemetryHandle, initialise as initialise_telemetry};
pub use transport::{DrainReport, InvocationServer, ListenerError, RunningServer};

#[cfg(test)]
mod tests;
