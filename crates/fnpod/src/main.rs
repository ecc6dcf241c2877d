//! Entry point for the `fnpod` binary: loads configuration, runs the pod
//! until it is told to stop and maps the outcome to an exit status.

use std::process::ExitCode;

use fnpod::{LifecycleReporter, StructuredLifecycleReporter, run_pod};
use fnpod_config::Config;

/// Exit status for failures before the pod started accepting.
const LAUNCH_FAILURE: u8 = 1;

fn main() -> ExitCode {
    let config = match Config::load() {
        Ok(config) => config,
        Err(error) => error.exit(),
    };
    let reporter = StructuredLifecycleReporter::new();
    let code = match run_pod(&config) {
        Ok(reason) => reason.exit_code(),
        Err(error) => {
            report_launch_failure(&error);
            LAUNCH_FAILURE
        }
    };
    reporter.exited(code);
    ExitCode::from(code)
}

#[expect(
    clippy::print_stderr,
    reason = "launch failures must reach the operator even without telemetry"
)]
fn report_launch_failure(error: &fnpod::LaunchError) {
    eprintln!("fnpod: {error}");
}
