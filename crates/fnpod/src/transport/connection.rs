//! Serves exactly one invocation on an accepted connection.

use std::any::Any;
use std::io::{self, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use fnpod_protocol::{Envelope, LineBuffer, Request, Response, decode, encode, encode_line};
use tracing::{debug, info, warn};

use super::LISTENER_TARGET;
use super::errors::ConnectionError;
use crate::function::{FunctionHandler, HandlerError};

const READ_CHUNK: usize = 4096;

/// Write window granted to an error response after the connection budget is
/// spent.
const ERROR_WRITE_WINDOW: Duration = Duration::from_millis(100);

/// Per-connection limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ConnectionLimits {
    pub(crate) timeout: Duration,
    pub(crate) max_request_bytes: usize,
}

/// Reads one envelope, invokes the handler and writes one response.
pub(crate) struct InvocationHandler {
    function: Arc<dyn FunctionHandler>,
    limits: ConnectionLimits,
}

impl InvocationHandler {
    pub(crate) fn new(function: Arc<dyn FunctionHandler>, limits: ConnectionLimits) -> Self {
        Self { function, limits }
    }

    /// Serves `stream` to completion. Failures are logged and answered with a
    /// best-effort error response; they never escape the connection.
    pub(crate) fn handle(&self, mut stream: UnixStream, connection: u64) {
        let started = Instant::now();
        let deadline = started + self.limits.timeout;
        match self.exchange(&mut stream, deadline) {
            Ok(Some(status_code)) => info!(
                target: LISTENER_TARGET,
                event = "connection_closed",
                connection,
                status_code,
                elapsed_ms = elapsed_ms(started),
                "invocation served"
            ),
            Ok(None) => debug!(
                target: LISTENER_TARGET,
                event = "connection_closed",
                connection,
                "peer closed without sending a request"
            ),
            Err(error) => {
                warn!(
                    target: LISTENER_TARGET,
                    event = "connection_error",
                    connection,
                    kind = error.kind(),
                    error = %error,
                    "connection failed"
                );
                if let Some(response) = error.response() {
                    let window = remaining(deadline).max(ERROR_WRITE_WINDOW);
                    if let Err(write_error) = write_response(&mut stream, &response, window) {
                        debug!(
                            target: LISTENER_TARGET,
                            connection,
                            error = %write_error,
                            "error response not delivered"
                        );
                    }
                }
            }
        }
        close(&stream, connection);
    }

    /// Returns the status code sent, or `None` when the peer sent nothing.
    fn exchange(
        &self,
        stream: &mut UnixStream,
        deadline: Instant,
    ) -> Result<Option<u16>, ConnectionError> {
        let Some(frame) = read_frame(stream, self.limits, deadline)? else {
            return Ok(None);
        };
        let Envelope { req, res } = decode(&frame)?;
        debug!(
            target: LISTENER_TARGET,
            method = %req.method,
            path = %req.path,
            script = %res.script,
            "invoking handler"
        );
        let script = res.script.clone();
        let response = invoke_bounded(&self.function, req, res, remaining(deadline))
            .map_err(|source| ConnectionError::Handler { script, source })?;
        write_response(stream, &response, remaining(deadline))
            .map_err(|source| ConnectionError::Write { source })?;
        Ok(Some(response.status_code))
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Accumulates bytes until a full frame arrives, the peer half-closes, or the
/// deadline passes.
fn read_frame(
    stream: &mut UnixStream,
    limits: ConnectionLimits,
    deadline: Instant,
) -> Result<Option<Vec<u8>>, ConnectionError> {
    let mut buffer = LineBuffer::new(limits.max_request_bytes);
    let mut chunk = [0_u8; READ_CHUNK];
    loop {
        let budget = remaining(deadline);
        if budget.is_zero() {
            return Err(ConnectionError::ReadTimeout {
                budget: limits.timeout,
            });
        }
        stream
            .set_read_timeout(Some(budget))
            .map_err(|source| ConnectionError::Read { source })?;
        let read = match stream.read(&mut chunk) {
            Ok(read) => read,
            Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) =>
            {
                return Err(ConnectionError::ReadTimeout {
                    budget: limits.timeout,
                });
            }
            Err(source) => return Err(ConnectionError::Read { source }),
        };
        let Some(bytes) = chunk.get(..read) else {
            return Err(ConnectionError::Read {
                source: io::Error::other("read reported more bytes than the buffer holds"),
            });
        };
        if bytes.is_empty() {
            return Ok(buffer.finish());
        }
        if let Some(frame) = buffer.push(bytes)? {
            return Ok(Some(frame));
        }
    }
}

/// Runs the handler on its own thread so a slow or panicking handler cannot
/// hold the connection past its budget.
fn invoke_bounded(
    function: &Arc<dyn FunctionHandler>,
    request: Request,
    response: Response,
    budget: Duration,
) -> Result<Response, HandlerError> {
    let (sender, receiver) = mpsc::sync_channel(1);
    let function = Arc::clone(function);
    thread::Builder::new()
        .name("fnpod-invoke".to_owned())
        .spawn(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                function.invoke_within(request, response, budget)
            }))
            .unwrap_or_else(|payload| {
                Err(HandlerError::Panicked {
                    message: panic_message(payload.as_ref()),
                })
            });
            // The receiver is gone once the budget has expired.
            drop(sender.send(outcome));
        })
        .map_err(|error| HandlerError::failed(format!("failed to spawn handler thread: {error}")))?;

    match receiver.recv_timeout(budget) {
        Ok(outcome) => outcome,
        Err(mpsc::RecvTimeoutError::Timeout) => Err(HandlerError::TimedOut { budget }),
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(HandlerError::Panicked {
            message: "handler thread exited without a result".to_owned(),
        }),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn write_response(
    stream: &mut UnixStream,
    response: &Response,
    budget: Duration,
) -> io::Result<()> {
    if budget.is_zero() {
        return Err(io::Error::new(
            io::ErrorKind::TimedOut,
            "connection budget spent before the response was written",
        ));
    }
    stream.set_write_timeout(Some(budget))?;
    stream.write_all(&encode_line(encode(response)))?;
    stream.flush()
}

fn close(stream: &UnixStream, connection: u64) {
    if let Err(error) = stream.shutdown(Shutdown::Write)
        && error.kind() != io::ErrorKind::NotConnected
    {
        debug!(
            target: LISTENER_TARGET,
            connection,
            error = %error,
            "failed to shut down write side"
        );
    }
}
