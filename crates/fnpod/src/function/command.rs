//! Handler that delegates each invocation to an external program.
//!
//! The envelope is written to the child's stdin as one JSON line and stdin is
//! closed. Stdout is coerced into a response with
//! [`Response::from_untrusted`]; a non-zero exit is a handler failure carrying
//! the child's stderr.
//!
//! Each child leads its own process group. On timeout the whole group is
//! killed so that background processes holding the output pipes die with it.

use std::io::{self, Read, Write};
use std::os::unix::process::CommandExt;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use fnpod_protocol::{Envelope, Request, Response, encode_envelope, encode_line};
use nix::sys::signal::{Signal, killpg};
use nix::unistd::Pid;
use tracing::{debug, warn};

use super::{FUNCTION_TARGET, FunctionHandler, HandlerError};

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Runs a program once per invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHandler {
    program: String,
    args: Vec<String>,
    timeout: Option<Duration>,
}

impl CommandHandler {
    /// Builds a handler running `program` with `args`.
    #[must_use]
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: None,
        }
    }

    /// Kills the child when it runs longer than `timeout`.
    ///
    /// The clock starts at spawn. When the pod supplies a connection budget
    /// through [`FunctionHandler::invoke_within`], the shorter of the two
    /// applies.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn spawn(&self) -> Result<Child, HandlerError> {
        debug!(
            target: FUNCTION_TARGET,
            program = %self.program,
            args = ?self.args,
            "spawning function process"
        );
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .spawn()
            .map_err(|error| {
                HandlerError::failed(format!("failed to start `{}`: {error}", self.program))
            })
    }

    fn wait_for_exit(
        &self,
        child: &mut Child,
        timeout: Option<Duration>,
    ) -> Result<ExitStatus, HandlerError> {
        let started = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => return Ok(status),
                Ok(None) => {}
                Err(error) => {
                    return Err(HandlerError::failed(format!(
                        "failed to wait for `{}`: {error}",
                        self.program
                    )));
                }
            }
            if let Some(budget) = timeout
                && started.elapsed() > budget
            {
                warn!(
                    target: FUNCTION_TARGET,
                    program = %self.program,
                    timeout_ms = u64::try_from(budget.as_millis()).unwrap_or(u64::MAX),
                    "function process timed out, killing it"
                );
                if let Err(error) = kill_group(child).and_then(|()| child.wait().map(drop)) {
                    warn!(
                        target: FUNCTION_TARGET,
                        program = %self.program,
                        error = %error,
                        "failed to reap timed out function process"
                    );
                }
                return Err(HandlerError::TimedOut { budget });
            }
            thread::sleep(EXIT_POLL_INTERVAL);
        }
    }
}

impl FunctionHandler for CommandHandler {
    fn invoke(&self, request: Request, response: Response) -> Result<Response, HandlerError> {
        self.run(request, response, self.timeout)
    }

    fn invoke_within(
        &self,
        request: Request,
        response: Response,
        budget: Duration,
    ) -> Result<Response, HandlerError> {
        let timeout = self.timeout.map_or(budget, |own| own.min(budget));
        self.run(request, response, Some(timeout))
    }
}

impl CommandHandler {
    fn run(
        &self,
        request: Request,
        response: Response,
        timeout: Option<Duration>,
    ) -> Result<Response, HandlerError> {
        let envelope = Envelope::new(request, response);
        let line = encode_envelope(&envelope)
            .map(encode_line)
            .map_err(|error| HandlerError::failed(error.to_string()))?;
        let carried = envelope.res;

        let mut child = self.spawn()?;
        let writer = child.stdin.take().map(|stdin| feed(stdin, line));
        let stdout = child.stdout.take().map(collect);
        let stderr = child.stderr.take().map(collect);

        // Pipes close once the process group is gone, so the threads always end.
        let exit = self.wait_for_exit(&mut child, timeout);
        if let Some(writer) = writer {
            finish_feed(&self.program, writer);
        }
        let stdout = join_output(stdout);
        let stderr = join_output(stderr);
        let status = exit?;
        let stdout = stdout?;
        let stderr = stderr?;
        debug!(
            target: FUNCTION_TARGET,
            program = %self.program,
            %status,
            stdout_bytes = stdout.len(),
            "function process exited"
        );

        if !status.success() {
            let diagnostic = String::from_utf8_lossy(&stderr);
            return Err(HandlerError::failed(format!(
                "`{}` exited with {status}: {}",
                self.program,
                diagnostic.trim()
            )));
        }
        Ok(Response::from_untrusted(&stdout, &carried))
    }
}

/// Sends `SIGKILL` to the child's process group, falling back to the child
/// alone when its id does not fit a pid.
fn kill_group(child: &mut Child) -> io::Result<()> {
    let Ok(pid) = i32::try_from(child.id()) else {
        return child.kill();
    };
    killpg(Pid::from_raw(pid), Signal::SIGKILL).map_err(io::Error::from)
}

fn feed(mut stdin: impl Write + Send + 'static, line: Vec<u8>) -> JoinHandle<io::Result<()>> {
    // Stdin is dropped when the thread ends, closing the pipe.
    thread::spawn(move || {
        stdin.write_all(&line)?;
        stdin.flush()
    })
}

fn finish_feed(program: &str, writer: JoinHandle<io::Result<()>>) {
    match writer.join() {
        Ok(Ok(())) => {}
        // The child may exit without reading its input.
        Ok(Err(error)) if error.kind() == io::ErrorKind::BrokenPipe => {}
        Ok(Err(error)) => debug!(
            target: FUNCTION_TARGET,
            program,
            error = %error,
            "failed to write envelope to function process"
        ),
        Err(_) => warn!(
            target: FUNCTION_TARGET,
            program,
            "stdin writer thread panicked"
        ),
    }
}

fn collect(mut source: impl Read + Send + 'static) -> JoinHandle<io::Result<Vec<u8>>> {
    thread::spawn(move || {
        let mut buffer = Vec::new();
        source.read_to_end(&mut buffer)?;
        Ok(buffer)
    })
}

fn join_output(reader: Option<JoinHandle<io::Result<Vec<u8>>>>) -> Result<Vec<u8>, HandlerError> {
    let Some(reader) = reader else {
        return Ok(Vec::new());
    };
    match reader.join() {
        Ok(Ok(bytes)) => Ok(bytes),
        Ok(Err(error)) => Err(HandlerError::failed(format!(
            "failed to read function output: {error}"
        ))),
        Err(_) => Err(HandlerError::Panicked {
            message: "output reader thread panicked".to_owned(),
        }),
    }
}
