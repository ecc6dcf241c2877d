//! Crate-level lifecycle and behaviour tests.

use std::os::unix::net::UnixListener;
use std::sync::Arc;

use camino::Utf8Path;
use fnpod_config::Config;
use fnpod_protocol::{Request, Response};
use mockall::mock;
use rstest::rstest;
use signal_hook::consts::{SIGINT, SIGTERM};

use crate::lifecycle::{
    ExitReason, LaunchError, LifecycleController, LifecycleReporter, LifecycleState,
    ShutdownError, ShutdownSignal, ShutdownTrigger, SignalWatch, StopReason, configured_handler,
};
use crate::transport::{DrainReport, ListenerError};

pub(crate) mod support;

use support::{HelloHandler, LifecycleEvent, ManualShutdown, RecordingReporter, SocketDir};

mock! {
    Reporter {}
    impl LifecycleReporter for Reporter {
        fn starting(&self, socket: &Utf8Path);
        fn bound(&self, socket: &Utf8Path);
        fn bind_failed(&self, socket: &Utf8Path, error: &ListenerError);
        fn draining(&self, reason: &StopReason, in_flight: usize);
        fn stopped(&self, report: &DrainReport);
        fn exited(&self, exit_code: u8);
    }
}

fn controller(
    socket: &SocketDir,
    signal: ManualShutdown,
    reporter: MockReporter,
) -> LifecycleController<ManualShutdown> {
    LifecycleController::new(
        Config::new(socket.path()),
        Arc::new(HelloHandler::default()),
        signal,
        Arc::new(reporter),
    )
}

#[test]
fn each_transition_is_reported_once() {
    let socket = SocketDir::new();
    let expected = socket.path().to_owned();
    let mut reporter = MockReporter::new();
    reporter
        .expect_starting()
        .withf(move |path| path == expected.as_path())
        .times(1)
        .return_const(());
    reporter.expect_bound().times(1).return_const(());
    reporter
        .expect_draining()
        .withf(|reason, in_flight| *reason == StopReason::Signal(SIGINT) && *in_flight == 0)
        .times(1)
        .return_const(());
    reporter
        .expect_stopped()
        .withf(|report| report.is_clean())
        .times(1)
        .return_const(());
    reporter.expect_bind_failed().never();
    reporter.expect_exited().never();

    let mut pod = controller(&socket, ManualShutdown::pretriggered(SIGINT), reporter);
    let reason = pod.run().expect("pod should stop cleanly");

    assert_eq!(reason, ExitReason::Requested { signal: SIGINT });
    assert_eq!(pod.state(), LifecycleState::Stopped);
    assert!(!socket.path().exists());
}

#[test]
fn bind_failure_is_reported_and_nothing_else_runs() {
    let socket = SocketDir::new();
    let _owner = UnixListener::bind(socket.path()).expect("bind owner");
    let mut reporter = MockReporter::new();
    reporter.expect_starting().times(1).return_const(());
    reporter
        .expect_bind_failed()
        .withf(|_, error| matches!(error, ListenerError::UnixInUse { .. }))
        .times(1)
        .return_const(());
    reporter.expect_bound().never();
    reporter.expect_draining().never();
    reporter.expect_stopped().never();

    let mut pod = controller(&socket, ManualShutdown::pretriggered(SIGTERM), reporter);
    let error = pod.run().expect_err("bind should fail");

    assert!(matches!(error, LaunchError::Bind { .. }));
    assert_eq!(pod.state(), LifecycleState::Created);
}

/// Reports an accept-loop failure as soon as it is installed.
struct FailedListener;

impl ShutdownSignal for FailedListener {
    fn install(&self, trigger: ShutdownTrigger) -> Result<SignalWatch, ShutdownError> {
        trigger.listener_failed("failed to accept connection: bad file descriptor");
        Ok(SignalWatch::detached())
    }
}

#[test]
fn listener_failure_drains_and_exits_with_failure() {
    let socket = SocketDir::new();
    let reporter = Arc::new(RecordingReporter::default());
    let mut pod = LifecycleController::new(
        Config::new(socket.path()),
        Arc::new(HelloHandler::default()),
        FailedListener,
        Arc::clone(&reporter) as Arc<dyn LifecycleReporter>,
    );

    let reason = pod.run().expect("pod should stop after draining");

    assert!(
        matches!(&reason, ExitReason::ListenerFailed { message } if message.contains("bad file descriptor")),
        "got {reason:?}"
    );
    assert_eq!(reason.exit_code(), 2);
    assert_eq!(pod.state(), LifecycleState::Stopped);
    assert!(reporter.saw(|event| matches!(
        event,
        LifecycleEvent::Draining(StopReason::ListenerFailed(message)) if message.contains("accept")
    )));
    assert!(reporter.saw(|event| matches!(event, LifecycleEvent::Stopped(report) if report.is_clean())));
    assert!(!socket.path().exists(), "socket file should be removed");
}

#[rstest]
#[case::requested(StopReason::Signal(SIGTERM), 0)]
#[case::listener_failure(StopReason::ListenerFailed("accept failed".to_owned()), 2)]
fn exit_codes_follow_the_stop_reason(#[case] reason: StopReason, #[case] code: u8) {
    assert_eq!(ExitReason::from(reason).exit_code(), code);
}

#[test]
fn configuration_without_a_command_replies_with_the_static_body() {
    let config = Config::load_from_iter(["fnpod", "/tmp/pod.sock", "--reply-body", "pong"])
        .expect("parse");
    let handler = configured_handler(&config);

    let response = handler
        .invoke(Request::new("GET", "/"), Response::for_script("s"))
        .expect("invoke");

    assert_eq!(response.body, "pong");
    assert_eq!(response.script, "s");
}

#[test]
fn configuration_with_a_command_runs_it() {
    let config = Config::new("/tmp/pod.sock").with_command([
        "sh",
        "-c",
        "cat >/dev/null; printf '{\"body\":\"from command\",\"status_code\":201}'",
    ]);
    let handler = configured_handler(&config);

    let response = handler
        .invoke(Request::new("POST", "/run"), Response::for_script("job.sh"))
        .expect("invoke");

    assert_eq!(response.body, "from command");
    assert_eq!(response.status_code, 201);
    assert_eq!(response.script, "job.sh");
}
