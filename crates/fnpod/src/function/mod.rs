//! The handler capability invoked once per connection.
//!
//! A handler receives the decoded [`Request`] and the carried [`Response`] by
//! value and returns the response to send back. Plain closures implement
//! [`FunctionHandler`] directly; asynchronous handlers are adapted with
//! [`Blocking`].

use std::time::Duration;

use fnpod_protocol::{Request, Response};
use thiserror::Error;

mod asynchronous;
mod command;
mod reply;

pub use asynchronous::{AsyncFunctionHandler, Blocking};
pub use command::CommandHandler;
pub use reply::StaticBodyHandler;

pub(crate) const FUNCTION_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::function");

/// Failures reported by a handler invocation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// The handler ran to completion but reported a failure.
    #[error("handler failed: {message}")]
    Failed {
        /// Diagnostic supplied by the handler.
        message: String,
    },
    /// The handler did not return within the connection budget.
    #[error("handler did not finish within {} ms", budget.as_millis())]
    TimedOut {
        /// Budget that was exceeded.
        budget: Duration,
    },
    /// The handler panicked.
    #[error("handler panicked: {message}")]
    Panicked {
        /// Panic payload, when it was a string.
        message: String,
    },
}

impl HandlerError {
    /// Builds a [`HandlerError::Failed`] from any displayable message.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// Synchronous handler capability.
pub trait FunctionHandler: Send + Sync + 'static {
    /// Produces the response for one invocation.
    ///
    /// # Errors
    ///
    /// Returns a [`HandlerError`] when no response can be produced; the pod
    /// then answers with status 500.
    fn invoke(&self, request: Request, response: Response) -> Result<Response, HandlerError>;

    /// Produces the response with `budget` left on the connection.
    ///
    /// The pod answers with status 500 once `budget` passes whatever this
    /// returns. Handlers that start external work override this to stop that
    /// work in time; the default ignores `budget`.
    ///
    /// # Errors
    ///
    /// As for [`FunctionHandler::invoke`].
    fn invoke_within(
        &self,
        request: Request,
        response: Response,
        _budget: Duration,
    ) -> Result<Response, HandlerError> {
        self.invoke(request, response)
    }
}

impl<F> FunctionHandler for F
where
    F: Fn(Request, Response) -> Result<Response, HandlerError> + Send + Sync + 'static,
{
    fn invoke(&self, request: Request, response: Response) -> Result<Response, HandlerError> {
        self(request, response)
    }
}
