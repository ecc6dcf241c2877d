//! Unix socket transport for invocation envelopes.
//!
//! [`InvocationServer`] binds the socket and accepts connections on a
//! background thread. Each connection is served on its own thread and tracked
//! until it closes so [`RunningServer::stop`] can drain it.

mod connection;
mod errors;
mod listener;
mod registry;

pub use self::errors::ListenerError;
pub use self::listener::{InvocationServer, RunningServer};
pub use self::registry::DrainReport;

const LISTENER_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::transport");
