//! Wire protocol shared by the function pod and its callers.
//!
//! A caller opens one connection per invocation and writes a single
//! newline-terminated JSON [`Envelope`]:
//!
//! ```text
//! {"req":{"path":"/","method":"GET","query_string":"","headers":{}},"res":{"script":"index"}}
//! ```
//!
//! The pod answers with one newline-terminated [`Response`] document and
//! closes the connection.

pub mod codec;
pub mod framing;
mod types;

pub use codec::{DecodeError, EncodeError, decode, decode_response, encode, encode_envelope};
pub use framing::{FrameError, LineBuffer, encode_line};
pub use types::{DEFAULT_STATUS_CODE, Envelope, Headers, Request, Response};

#[cfg(test)]
mod tests;
