//! Process configuration for the function pod.
//!
//! Values resolve from the command line first, then from `FNPOD_*`
//! environment variables, then from the defaults in [`defaults`]:
//!
//! ```text
//! fnpod /run/fn/pod.sock --grace-period-ms 5000 -- ./handler --flag
//! ```

use std::ffi::OsString;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use thiserror::Error;

pub mod defaults;
mod logging;

pub use defaults::{
    DEFAULT_CONNECTION_TIMEOUT_MS, DEFAULT_GRACE_PERIOD_MS, DEFAULT_LOG_FILTER,
    DEFAULT_MAX_REQUEST_BYTES, DEFAULT_REPLY_BODY, default_log_filter, default_log_format,
};
pub use logging::{LogFormat, LogFormatParseError};

/// Errors raised while resolving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The command line or environment held invalid values, or the caller
    /// asked for help or version output.
    #[error("{source}")]
    Arguments {
        /// Underlying parser error, rendered the way clap renders it.
        #[source]
        source: clap::Error,
    },
}

impl ConfigError {
    /// Prints the diagnostic (or requested help text) and exits the process
    /// with clap's conventional status.
    pub fn exit(&self) -> ! {
        match self {
            Self::Arguments { source } => source.exit(),
        }
    }
}

impl From<clap::Error> for ConfigError {
    fn from(source: clap::Error) -> Self {
        Self::Arguments { source }
    }
}

/// Resolved pod configuration.
#[derive(Parser, Debug, Clone, PartialEq, Eq)]
#[command(
    name = "fnpod",
    version,
    about = "Serves one function invocation per connection on a Unix socket"
)]
pub struct Config {
    /// Filesystem path of the Unix socket to bind.
    #[arg(value_name = "SOCKET")]
    socket: Utf8PathBuf,
    /// Milliseconds in-flight connections may take to finish after a
    /// shutdown request.
    #[arg(long, env = "FNPOD_GRACE_PERIOD_MS", default_value_t = DEFAULT_GRACE_PERIOD_MS)]
    grace_period_ms: u64,
    /// Milliseconds allowed for reading, invoking and answering one
    /// connection.
    #[arg(
        long,
        env = "FNPOD_CONNECTION_TIMEOUT_MS",
        default_value_t = DEFAULT_CONNECTION_TIMEOUT_MS,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    connection_timeout_ms: u64,
    /// Largest request frame accepted, in bytes.
    #[arg(
        long,
        env = "FNPOD_MAX_REQUEST_BYTES",
        default_value_t = DEFAULT_MAX_REQUEST_BYTES,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    max_request_bytes: u64,
    /// Log filter in `tracing_subscriber::EnvFilter` syntax.
    #[arg(long, env = "FNPOD_LOG", default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,
    /// Log output format: `json` or `compact`.
    #[arg(long, env = "FNPOD_LOG_FORMAT", default_value_t = LogFormat::Json)]
    log_format: LogFormat,
    /// Body returned by the built-in handler.
    #[arg(long, default_value = DEFAULT_REPLY_BODY)]
    reply_body: String,
    /// External program run once per invocation instead of the built-in
    /// handler.
    #[arg(value_name = "PROGRAM", last = true)]
    command: Vec<String>,
}

impl Config {
    /// Builds a configuration for `socket` with every other value defaulted.
    #[must_use]
    pub fn new(socket: impl Into<Utf8PathBuf>) -> Self {
        Self {
            socket: socket.into(),
            grace_period_ms: DEFAULT_GRACE_PERIOD_MS,
            connection_timeout_ms: DEFAULT_CONNECTION_TIMEOUT_MS,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            log_filter: DEFAULT_LOG_FILTER.to_owned(),
            log_format: LogFormat::Json,
            reply_body: DEFAULT_REPLY_BODY.to_owned(),
            command: Vec::new(),
        }
    }

    /// Resolves configuration from the process arguments and environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Arguments`] when parsing fails or help output
    /// was requested.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_iter(std::env::args_os())
    }

    /// Resolves configuration from an explicit argument list. The first item
    /// is the program name.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Arguments`] when parsing fails or help output
    /// was requested.
    pub fn load_from_iter<I, T>(args: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        Ok(Self::try_parse_from(args)?)
    }

    /// Socket path to bind.
    #[must_use]
    pub fn socket(&self) -> &Utf8Path {
        &self.socket
    }

    /// Grace period applied while draining.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    /// Overrides the grace period.
    #[must_use]
    pub fn with_grace_period(mut self, grace: Duration) -> Self {
        self.grace_period_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Per-connection budget.
    #[must_use]
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.connection_timeout_ms)
    }

    /// Overrides the per-connection budget.
    #[must_use]
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.connection_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Largest request frame accepted, in bytes.
    #[must_use]
    pub fn max_request_bytes(&self) -> usize {
        usize::try_from(self.max_request_bytes).unwrap_or(usize::MAX)
    }

    /// Log filter expression.
    #[must_use]
    pub fn log_filter(&self) -> &str {
        &self.log_filter
    }

    /// Log output format.
    #[must_use]
    pub fn log_format(&self) -> LogFormat {
        self.log_format
    }

    /// Body returned by the built-in handler.
    #[must_use]
    pub fn reply_body(&self) -> &str {
        &self.reply_body
    }

    /// External program and its arguments, when one was given.
    #[must_use]
    pub fn command(&self) -> Option<(&str, &[String])> {
        self.command
            .split_first()
            .map(|(program, args)| (program.as_str(), args))
    }

    /// Replaces the external program.
    #[must_use]
    pub fn with_command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }
}
