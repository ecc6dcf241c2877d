//! Structured logging for the pod.
//!
//! Records go to stderr only; stdout is left to the process supervisor.
//! Connection threads are named `fnpod-conn-<id>`, so every record carries
//! the thread name to tie events back to a connection.

use std::io::{self, IsTerminal};

use fnpod_config::{Config, LogFormat};
use once_cell::sync::OnceCell;
use tracing::subscriber::SetGlobalDefaultError;
use tracing::{Subscriber, debug};
use tracing_subscriber::{EnvFilter, fmt};

const TELEMETRY_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::telemetry");

static INSTALLED: OnceCell<TelemetryHandle> = OnceCell::new();

/// Proof that the pod's subscriber is installed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TelemetryHandle {
    format: LogFormat,
}

impl TelemetryHandle {
    /// Format chosen by the call that installed the subscriber.
    #[must_use]
    pub fn format(&self) -> LogFormat {
        self.format
    }
}

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// `--log-filter` / `FNPOD_LOG` is not a valid filter expression.
    #[error("invalid log filter `{directive}`: {message}")]
    Filter {
        /// The rejected directive.
        directive: String,
        /// Parser diagnostic.
        message: String,
    },
    /// A subscriber was installed by someone other than the pod.
    #[error("another tracing subscriber is already installed")]
    Subscriber {
        /// Error from `tracing`.
        #[source]
        source: SetGlobalDefaultError,
    },
}

/// Installs the pod's global subscriber.
///
/// Only the first call installs anything; later calls return the handle from
/// that first call, so the reported format may differ from `config`.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparsable filter and
/// [`TelemetryError::Subscriber`] when a foreign subscriber is already set.
pub fn initialise(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    INSTALLED.get_or_try_init(|| install(config)).copied()
}

fn install(config: &Config) -> Result<TelemetryHandle, TelemetryError> {
    let settings = Settings::from_config(config)?;
    let handle = TelemetryHandle {
        format: settings.format,
    };
    tracing::subscriber::set_global_default(settings.into_subscriber())
        .map_err(|source| TelemetryError::Subscriber { source })?;
    debug!(
        target: TELEMETRY_TARGET,
        format = %handle.format,
        filter = config.log_filter(),
        "telemetry installed"
    );
    Ok(handle)
}

/// Subscriber options resolved from the pod configuration.
struct Settings {
    filter: EnvFilter,
    format: LogFormat,
    ansi: bool,
}

impl Settings {
    fn from_config(config: &Config) -> Result<Self, TelemetryError> {
        let directive = config.log_filter();
        let filter = EnvFilter::try_new(directive).map_err(|error| TelemetryError::Filter {
            directive: directive.to_owned(),
            message: error.to_string(),
        })?;
        Ok(Self {
            filter,
            format: config.log_format(),
            ansi: io::stderr().is_terminal(),
        })
    }

    fn into_subscriber(self) -> Box<dyn Subscriber + Send + Sync> {
        let builder = fmt::Subscriber::builder()
            .with_env_filter(self.filter)
            .with_target(true)
            .with_thread_names(true)
            .with_writer(io::stderr)
            .with_ansi(self.ansi)
            .with_timer(fmt::time::UtcTime::rfc_3339());
        match self.format {
            LogFormat::Json => Box::new(builder.json().flatten_event(true).finish()),
            LogFormat::Compact => Box::new(builder.compact().finish()),
        }
    }
}
