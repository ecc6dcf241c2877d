//! Built-in defaults for every configuration value.

use crate::logging::LogFormat;

/// Milliseconds allowed for in-flight connections to finish once shutdown
/// begins.
pub const DEFAULT_GRACE_PERIOD_MS: u64 = 10_000;

/// Milliseconds covering read, invocation and write of a single connection.
pub const DEFAULT_CONNECTION_TIMEOUT_MS: u64 = 30_000;

/// Largest request frame accepted, in bytes.
pub const DEFAULT_MAX_REQUEST_BYTES: u64 = 1024 * 1024;

/// Default log filter expression.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Body written by the built-in reply handler.
pub const DEFAULT_REPLY_BODY: &str = "hello";

/// Default log filter expression.
#[must_use]
pub fn default_log_filter() -> &'static str {
    DEFAULT_LOG_FILTER
}

/// Default logging format.
#[must_use]
pub fn default_log_format() -> LogFormat {
    LogFormat::Json
}
