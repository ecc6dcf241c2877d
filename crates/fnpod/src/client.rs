//! Orchestrator side of the invocation protocol.
//!
//! A [`PodClient`] owns one connection and performs exactly one invocation,
//! mirroring the pod's one-envelope-per-connection rule.

use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use fnpod_protocol::{
    DecodeError, EncodeError, Envelope, FrameError, LineBuffer, Response, decode_response,
    encode_envelope, encode_line,
};
use thiserror::Error;

/// Default read and write timeout applied to client connections.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest response frame the client accepts.
pub const MAX_RESPONSE_BYTES: usize = 16 * 1024 * 1024;

/// Errors raised while invoking a pod.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Connecting to the socket failed.
    #[error("failed to connect to {path}: {source}")]
    Connect {
        /// Socket path.
        path: Utf8PathBuf,
        /// Underlying IO error.
        #[source]
        source: io::Error,
    },
    /// Sending or receiving failed.
    #[error("i/o error talking to pod: {source}")]
    Io {
        /// Underlying IO error.
        #[from]
        source: io::Error,
    },
    /// The envelope could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// The pod closed the connection without answering.
    #[error("pod closed the connection without a response")]
    Closed,
    /// The response exceeded [`MAX_RESPONSE_BYTES`].
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// The response was not a valid response document.
    #[error("invalid response from pod: {0}")]
    Decode(#[from] DecodeError),
}

/// A single-use connection to a pod.
#[derive(Debug)]
pub struct PodClient {
    stream: UnixStream,
}

impl PodClient {
    /// Connects to the pod at `path` using [`DEFAULT_CLIENT_TIMEOUT`].
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] when nothing accepts on `path`.
    pub fn connect(path: impl AsRef<Utf8Path>) -> Result<Self, ClientError> {
        Self::connect_with_timeout(path, DEFAULT_CLIENT_TIMEOUT)
    }

    /// Connects to the pod at `path`, bounding each read and write by
    /// `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`ClientError::Connect`] when nothing accepts on `path`.
    pub fn connect_with_timeout(
        path: impl AsRef<Utf8Path>,
        timeout: Duration,
    ) -> Result<Self, ClientError> {
        let path = path.as_ref();
        let connect_error = |source| ClientError::Connect {
            path: path.to_owned(),
            source,
        };
        let stream = UnixStream::connect(path).map_err(connect_error)?;
        stream
            .set_read_timeout(Some(timeout))
            .map_err(connect_error)?;
        stream
            .set_write_timeout(Some(timeout))
            .map_err(connect_error)?;
        Ok(Self { stream })
    }

    /// Sends `envelope` and waits for the pod's response.
    ///
    /// # Errors
    ///
    /// Returns a [`ClientError`] when the exchange fails or the pod answers
    /// with something other than a response document.
    pub fn invoke(mut self, envelope: &Envelope) -> Result<Response, ClientError> {
        let line = encode_line(encode_envelope(envelope)?);
        self.stream.write_all(&line)?;
        self.stream.flush()?;
        let frame = self.read_frame()?;
        Ok(decode_response(&frame)?)
    }

    fn read_frame(&mut self) -> Result<Vec<u8>, ClientError> {
        let mut buffer = LineBuffer::new(MAX_RESPONSE_BYTES);
        let mut chunk = [0_u8; 4096];
        loop {
            let read = match self.stream.read(&mut chunk) {
                Ok(read) => read,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(error.into()),
            };
            let bytes = chunk.get(..read).unwrap_or_default();
            if bytes.is_empty() {
                return buffer.finish().ok_or(ClientError::Closed);
            }
            if let Some(frame) = buffer.push(bytes)? {
                return Ok(frame);
            }
        }
    }
}

impl Drop for PodClient {
    fn drop(&mut self) {
        // The connection is single use; a failed shutdown only means the
        // peer already went away.
        drop(self.stream.shutdown(Shutdown::Both));
    }
}
