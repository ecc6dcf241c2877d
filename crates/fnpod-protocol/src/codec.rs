//! Envelope codec.
//!
//! Decoding runs through serde-derived wire structures, so the schema is fixed
//! at compile time and no intermediate JSON tree is built. Every field is read
//! as an `Option` first; presence rules and defaults are then applied while
//! converting into the public types so that a missing field surfaces as
//! [`DecodeError::MissingField`] with its dotted path instead of a generic
//! parser message.

use serde::Deserialize;
use serde_json::{Map, Value, error::Category};
use thiserror::Error;

use crate::types::{DEFAULT_STATUS_CODE, Envelope, Headers, Request, Response};

/// Bytes written when a response cannot be serialised.
const FALLBACK_RESPONSE: &[u8] =
    br#"{"script":"","body":"response encoding failed","status_code":500,"headers":{}}"#;

/// Errors raised while decoding inbound bytes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// The frame contained no JSON document.
    #[error("envelope is empty")]
    Empty,
    /// The bytes are not well-formed JSON.
    #[error("malformed JSON: {message}")]
    Syntax {
        /// One-based line of the offending byte.
        line: usize,
        /// One-based column of the offending byte.
        column: usize,
        /// Parser diagnostic.
        message: String,
    },
    /// A field holds a value of the wrong type.
    #[error("schema violation: {message}")]
    Schema {
        /// One-based line of the offending value.
        line: usize,
        /// One-based column of the offending value.
        column: usize,
        /// Diagnostic naming the expected type and the value found.
        message: String,
    },
    /// A required field is absent or `null`.
    #[error("missing required field `{field}`")]
    MissingField {
        /// Dotted path of the field, for example `req.path`.
        field: &'static str,
    },
}

impl DecodeError {
    fn from_json(error: &serde_json::Error) -> Self {
        let line = error.line();
        let column = error.column();
        let message = error.to_string();
        match error.classify() {
            Category::Data => Self::Schema {
                line,
                column,
                message,
            },
            Category::Syntax | Category::Eof | Category::Io => Self::Syntax {
                line,
                column,
                message,
            },
        }
    }
}

/// Errors raised while encoding an outbound envelope.
#[derive(Debug, Error)]
#[error("failed to encode envelope: {source}")]
pub struct EncodeError {
    #[from]
    source: serde_json::Error,
}

#[derive(Debug, Deserialize)]
#[serde(expecting = "an envelope object with `req` and `res` members")]
struct WireEnvelope {
    req: Option<WireRequest>,
    res: Option<WireResponse>,
}

#[derive(Debug, Deserialize)]
#[serde(expecting = "a request object")]
struct WireRequest {
    path: Option<String>,
    method: Option<String>,
    query_string: Option<String>,
    headers: Option<Headers>,
    body: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(expecting = "a response object")]
struct WireResponse {
    script: Option<String>,
    body: Option<String>,
    status_code: Option<u16>,
    headers: Option<Headers>,
}

fn required<T>(value: Option<T>, field: &'static str) -> Result<T, DecodeError> {
    value.ok_or(DecodeError::MissingField { field })
}

impl WireEnvelope {
    fn into_envelope(self) -> Result<Envelope, DecodeError> {
        let req = required(self.req, "req")?.into_request()?;
        let res = self.res.unwrap_or_default().into_response();
        Ok(Envelope { req, res })
    }
}

impl WireRequest {
    fn into_request(self) -> Result<Request, DecodeError> {
        Ok(Request {
            path: required(self.path, "req.path")?,
            method: required(self.method, "req.method")?,
            query_string: required(self.query_string, "req.query_string")?,
            headers: required(self.headers, "req.headers")?,
            body: self.body.unwrap_or_default(),
        })
    }
}

impl WireResponse {
    fn into_response(self) -> Response {
        Response {
            script: self.script.unwrap_or_default(),
            body: self.body.unwrap_or_default(),
            status_code: self.status_code.unwrap_or(DEFAULT_STATUS_CODE),
            headers: self.headers.unwrap_or_default(),
        }
    }
}

fn is_blank(bytes: &[u8]) -> bool {
    bytes.iter().all(u8::is_ascii_whitespace)
}

/// Decodes one inbound envelope.
///
/// `req.path`, `req.method`, `req.query_string` and `req.headers` are
/// required. An absent `req.body` decodes as the empty string. Every field of
/// the carried `res` is optional; a missing `status_code` becomes
/// [`DEFAULT_STATUS_CODE`]. Unknown fields are ignored. Repeated header keys
/// keep the last value.
///
/// # Errors
///
/// Returns a [`DecodeError`] describing the first schema or syntax violation.
pub fn decode(bytes: &[u8]) -> Result<Envelope, DecodeError> {
    if is_blank(bytes) {
        return Err(DecodeError::Empty);
    }
    let wire: WireEnvelope =
        serde_json::from_slice(bytes).map_err(|error| DecodeError::from_json(&error))?;
    wire.into_envelope()
}

/// Decodes a response document written by a pod.
///
/// Missing fields take the same defaults as a carried response.
///
/// # Errors
///
/// Returns a [`DecodeError`] when the bytes are empty, malformed, or hold
/// mistyped fields.
pub fn decode_response(bytes: &[u8]) -> Result<Response, DecodeError> {
    if is_blank(bytes) {
        return Err(DecodeError::Empty);
    }
    let wire: WireResponse =
        serde_json::from_slice(bytes).map_err(|error| DecodeError::from_json(&error))?;
    Ok(wire.into_response())
}

/// Encodes a response for the wire, without the frame delimiter.
///
/// Serialisation of the typed [`Response`] cannot fail in practice; should the
/// serializer report an error anyway, a fixed status 500 document is returned
/// instead so the caller always has bytes to write.
#[must_use]
pub fn encode(response: &Response) -> Vec<u8> {
    serde_json::to_vec(response).unwrap_or_else(|_| FALLBACK_RESPONSE.to_vec())
}

/// Encodes a full envelope, as sent by a client, without the frame delimiter.
///
/// # Errors
///
/// Returns an [`EncodeError`] if serialisation fails.
pub fn encode_envelope(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    Ok(serde_json::to_vec(envelope)?)
}

impl Response {
    /// Coerces output written by an untrusted handler into a response.
    ///
    /// A JSON object is read field by field: `script` and `body` fall back to
    /// the carried values, a non-string `body` is kept as its JSON text, a
    /// missing or non-integer `status_code` becomes [`DEFAULT_STATUS_CODE`],
    /// and `headers` keeps only string-valued entries (empty when missing or
    /// not an object). Anything that is not a JSON object becomes the body of
    /// the carried response.
    #[must_use]
    pub fn from_untrusted(output: &[u8], carried: &Self) -> Self {
        match serde_json::from_slice::<Value>(output) {
            Ok(Value::Object(fields)) => Self::from_fields(&fields, carried),
            _ => Self {
                body: String::from_utf8_lossy(output.trim_ascii()).into_owned(),
                ..carried.clone()
            },
        }
    }

    fn from_fields(fields: &Map<String, Value>, carried: &Self) -> Self {
        let script = match fields.get("script") {
            Some(Value::String(script)) => script.clone(),
            _ => carried.script.clone(),
        };
        let body = match fields.get("body") {
            Some(Value::String(body)) => body.clone(),
            None | Some(Value::Null) => carried.body.clone(),
            Some(other) => other.to_string(),
        };
        let status_code = fields
            .get("status_code")
            .and_then(Value::as_u64)
            .and_then(|code| u16::try_from(code).ok())
            .unwrap_or(DEFAULT_STATUS_CODE);
        let headers = match fields.get("headers") {
            Some(Value::Object(entries)) => entries
                .iter()
                .filter_map(|(key, value)| {
                    value.as_str().map(|text| (key.clone(), text.to_owned()))
                })
                .collect(),
            _ => Headers::new(),
        };
        Self {
            script,
            body,
            status_code,
            headers,
        }
    }
}
