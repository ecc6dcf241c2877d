//! Newline-delimited framing for envelope transport.
//!
//! Each message is a single JSON document terminated by `\n`. JSON string
//! escaping guarantees the delimiter never appears inside a document, so the
//! first newline always ends the frame. A stream transport may split a frame
//! across reads or coalesce bytes after it, which [`LineBuffer`] absorbs.

use thiserror::Error;

/// Frame delimiter.
pub const DELIMITER: u8 = b'\n';

/// Errors raised while accumulating a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    /// The frame grew past the configured size limit before a delimiter
    /// arrived.
    #[error("frame exceeds maximum size of {limit} bytes")]
    TooLarge {
        /// Configured limit in bytes.
        limit: usize,
    },
}

/// Appends the frame delimiter to an encoded payload.
#[must_use]
pub fn encode_line(mut payload: Vec<u8>) -> Vec<u8> {
    payload.push(DELIMITER);
    payload
}

/// Incremental buffer that yields the first complete frame.
#[derive(Debug)]
pub struct LineBuffer {
    buffer: Vec<u8>,
    limit: usize,
}

impl LineBuffer {
    /// Creates an empty buffer accepting frames of at most `limit` bytes,
    /// excluding the delimiter.
    #[must_use]
    pub fn new(limit: usize) -> Self {
        Self {
            buffer: Vec::new(),
            limit,
        }
    }

    /// Number of bytes buffered so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `true` when no bytes have been buffered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Feeds a chunk read from the transport.
    ///
    /// Returns the complete frame, without its delimiter, once one is
    /// available. Bytes following the delimiter are discarded because a
    /// connection carries exactly one message.
    pub fn push(&mut self, chunk: &[u8]) -> Result<Option<Vec<u8>>, FrameError> {
        match chunk.iter().position(|byte| *byte == DELIMITER) {
            Some(position) => {
                let (head, _) = chunk.split_at(position);
                self.extend(head)?;
                Ok(Some(self.take()))
            }
            None => {
                self.extend(chunk)?;
                Ok(None)
            }
        }
    }

    /// Finalises the buffer after the peer closed its write side.
    ///
    /// Returns the unterminated frame when any bytes were buffered.
    #[must_use]
    pub fn finish(mut self) -> Option<Vec<u8>> {
        if self.buffer.iter().all(u8::is_ascii_whitespace) {
            return None;
        }
        Some(self.take())
    }

    fn extend(&mut self, bytes: &[u8]) -> Result<(), FrameError> {
        if self.buffer.len().saturating_add(bytes.len()) > self.limit {
            return Err(FrameError::TooLarge { limit: self.limit });
        }
        self.buffer.extend_from_slice(bytes);
        Ok(())
    }

    fn take(&mut self) -> Vec<u8> {
        let mut frame = std::mem::take(&mut self.buffer);
        if frame.last() == Some(&b'\r') {
            frame.pop();
        }
        frame
    }
}
