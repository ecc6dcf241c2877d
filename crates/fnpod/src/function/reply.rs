use fnpod_protocol::{Request, Response};

use super::{FunctionHandler, HandlerError};

/// Built-in handler that writes a fixed body into the carried response and
/// leaves every other field untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaticBodyHandler {
    body: String,
}

impl StaticBodyHandler {
    /// Builds a handler replying with `body`.
    #[must_use]
    pub fn new(body: impl Into<String>) -> Self {
        Self { body: body.into() }
    }
}

impl FunctionHandler for StaticBodyHandler {
    fn invoke(&self, _request: Request, mut response: Response) -> Result<Response, HandlerError> {
        response.body.clone_from(&self.body);
        Ok(response)
    }
}
