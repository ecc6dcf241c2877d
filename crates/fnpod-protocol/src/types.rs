//! Request and response data carried by an invocation envelope.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Header mapping; keys are unique and wire order is preserved.
pub type Headers = IndexMap<String, String>;

/// Status code applied when a carried response does not specify one, and
/// when coercing malformed handler output.
pub const DEFAULT_STATUS_CODE: u16 = 500;

/// Inbound request forwarded to the handler capability.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Request path.
    pub path: String,
    /// Request method token, for example `GET`.
    pub method: String,
    /// Raw query string; empty when the request carried none.
    pub query_string: String,
    /// Request headers.
    pub headers: Headers,
    /// Request body; empty when the wire envelope omitted it.
    pub body: String,
}

impl Request {
    /// Builds a request with empty headers, query string, and body.
    #[must_use]
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            method: method.into(),
            ..Self::default()
        }
    }

    /// Looks up a header value by exact key.
    #[must_use]
    pub fn header(&self, key: &str) -> Option<&str> {
        self.headers.get(key).map(String::as_str)
    }
}

/// Outbound response produced by the handler capability.
///
/// Field order matches the wire encoding: `script`, `body`, `status_code`,
/// `headers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// Identifies the function script that produced the response.
    pub script: String,
    /// Response payload.
    pub body: String,
    /// Status code, carried verbatim.
    pub status_code: u16,
    /// Response headers.
    pub headers: Headers,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            script: String::new(),
            body: String::new(),
            status_code: DEFAULT_STATUS_CODE,
            headers: Headers::new(),
        }
    }
}

impl Response {
    /// Builds an empty response attributed to `script`.
    #[must_use]
    pub fn for_script(script: impl Into<String>) -> Self {
        Self {
            script: script.into(),
            ..Self::default()
        }
    }

    /// Returns a copy of `self` with a new status and body, discarding any
    /// headers set by the carrier.
    #[must_use]
    pub fn with_error(&self, status_code: u16, body: impl Into<String>) -> Self {
        Self {
            script: self.script.clone(),
            body: body.into(),
            status_code,
            headers: Headers::new(),
        }
    }
}

/// A single wire message pairing one request with one carried response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Request forwarded to the handler.
    pub req: Request,
    /// Response carrier the handler mutates or replaces.
    pub res: Response,
}

impl Envelope {
    /// Pairs a request with its carried response.
    #[must_use]
    pub fn new(req: Request, res: Response) -> Self {
        Self { req, res }
    }
}
