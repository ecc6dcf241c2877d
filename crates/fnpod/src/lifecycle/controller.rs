//! Drives the pod through `Created → Accepting → Draining → Stopped`.

use std::sync::Arc;

use fnpod_config::Config;
use tracing::{debug, info};

use crate::function::{CommandHandler, FunctionHandler, StaticBodyHandler};
use crate::telemetry;
use crate::transport::InvocationServer;

use super::LIFECYCLE_TARGET;
use super::errors::LaunchError;
use super::reporter::{LifecycleReporter, StructuredLifecycleReporter};
use super::shutdown::{ShutdownSignal, ShutdownTrigger, StopReason, SystemShutdownSignal};

/// Phase of the pod lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    /// Collaborators are assembled; nothing is bound yet.
    Created,
    /// The socket is bound and connections are being served.
    Accepting,
    /// Accepting has stopped; in-flight connections are finishing.
    Draining,
    /// Every connection is closed and the socket file is removed.
    Stopped,
}

/// Why a pod that started successfully stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExitReason {
    /// A termination signal requested the shutdown.
    Requested {
        /// Signal number.
        signal: i32,
    },
    /// The accept loop failed.
    ListenerFailed {
        /// Diagnostic from the listener.
        message: String,
    },
}

impl ExitReason {
    /// Process exit status for this outcome: 0 for a requested shutdown, 2
    /// for a listener failure.
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Requested { .. } => 0,
            Self::ListenerFailed { .. } => 2,
        }
    }
}

impl From<StopReason> for ExitReason {
    fn from(reason: StopReason) -> Self {
        match reason {
            StopReason::Signal(signal) => Self::Requested { signal },
            StopReason::ListenerFailed(message) => Self::ListenerFailed { message },
        }
    }
}

/// Owns the server for the lifetime of the pod.
pub struct LifecycleController<S> {
    config: Config,
    handler: Arc<dyn FunctionHandler>,
    signal: S,
    reporter: Arc<dyn LifecycleReporter>,
    state: LifecycleState,
}

impl<S> LifecycleController<S>
where
    S: ShutdownSignal,
{
    /// Assembles a controller in the [`LifecycleState::Created`] state.
    pub fn new(
        config: Config,
        handler: Arc<dyn FunctionHandler>,
        signal: S,
        reporter: Arc<dyn LifecycleReporter>,
    ) -> Self {
        Self {
            config,
            handler,
            signal,
            reporter,
            state: LifecycleState::Created,
        }
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.state
    }

    /// Binds the socket, serves until a termination request or listener
    /// failure, then drains and stops.
    ///
    /// # Errors
    ///
    /// Returns [`LaunchError::Bind`] when the socket cannot be claimed, in
    /// which case no connection is ever accepted. Other variants report
    /// failures installing signal handlers or starting the accept thread.
    pub fn run(&mut self) -> Result<ExitReason, LaunchError> {
        let socket = self.config.socket().to_owned();
        self.reporter.starting(&socket);

        let (trigger, requests) = ShutdownTrigger::channel();
        let watch = self.signal.install(trigger.clone())?;

        let server = match InvocationServer::bind(&socket) {
            Ok(server) => server,
            Err(source) => {
                self.reporter.bind_failed(&socket, &source);
                return Err(LaunchError::Bind { source });
            }
        };
        let running = server
            .with_connection_timeout(self.config.connection_timeout())
            .with_max_request_bytes(self.config.max_request_bytes())
            .start(Arc::clone(&self.handler), trigger)?;
        self.advance(LifecycleState::Accepting);
        self.reporter.bound(&socket);

        let reason = requests.wait().unwrap_or_else(|| {
            StopReason::ListenerFailed("shutdown channel closed".to_owned())
        });
        self.advance(LifecycleState::Draining);
        self.reporter.draining(&reason, running.in_flight());

        let report = running.stop(self.config.grace_period())?;
        drop(watch);
        self.reporter.stopped(&report);
        self.advance(LifecycleState::Stopped);
        info!(
            target: LIFECYCLE_TARGET,
            %reason,
            "shutdown sequence completed"
        );
        Ok(reason.into())
    }

    fn advance(&mut self, next: LifecycleState) {
        debug!(
            target: LIFECYCLE_TARGET,
            from = ?self.state,
            to = ?next,
            "lifecycle transition"
        );
        self.state = next;
    }
}

/// Chooses the handler the configuration asks for: the external command
/// when one is given, the static reply otherwise.
#[must_use]
pub fn configured_handler(config: &Config) -> Arc<dyn FunctionHandler> {
    match config.command() {
        Some((program, args)) => Arc::new(
            CommandHandler::new(program, args.iter().cloned())
                .with_timeout(config.connection_timeout()),
        ),
        None => Arc::new(StaticBodyHandler::new(config.reply_body())),
    }
}

/// Runs the pod with the production collaborators.
///
/// # Errors
///
/// Returns a [`LaunchError`] when telemetry, signal handling or the socket
/// cannot be set up.
pub fn run_pod(config: &Config) -> Result<ExitReason, LaunchError> {
    telemetry::initialise(config)?;
    let mut controller = LifecycleController::new(
        config.clone(),
        configured_handler(config),
        SystemShutdownSignal::new(),
        Arc::new(StructuredLifecycleReporter::new()),
    );
    controller.run()
}
