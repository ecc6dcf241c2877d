use std::future::Future;

use fnpod_protocol::{Request, Response};
use futures_lite::future;

use super::{FunctionHandler, HandlerError};

/// Handler capability whose work completes asynchronously.
pub trait AsyncFunctionHandler: Send + Sync + 'static {
    /// Produces the response for one invocation.
    ///
    /// # Errors
    ///
    /// Resolves to a [`HandlerError`] when no response can be produced.
    fn invoke(
        &self,
        request: Request,
        response: Response,
    ) -> impl Future<Output = Result<Response, HandlerError>> + Send;
}

/// Runs an [`AsyncFunctionHandler`] to completion on the invocation thread.
///
/// Each invocation already owns a dedicated thread, so the future is driven
/// with a minimal executor rather than a shared runtime.
#[derive(Debug, Clone, Default)]
pub struct Blocking<H>(H);

impl<H> Blocking<H> {
    /// Wraps an asynchronous handler.
    #[must_use]
    pub fn new(handler: H) -> Self {
        Self(handler)
    }

    /// Returns the wrapped handler.
    #[must_use]
    pub fn into_inner(self) -> H {
        self.0
    }
}

impl<H> FunctionHandler for Blocking<H>
where
    H: AsyncFunctionHandler,
{
    fn invoke(&self, request: Request, response: Response) -> Result<Response, HandlerError> {
        future::block_on(self.0.invoke(request, response))
    }
}
