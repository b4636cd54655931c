//! Binary entry point for the crucible plugin validator.
//!
//! The same executable serves both roles: invoked with the worker-mode
//! marker it becomes the isolated validation worker, otherwise it parses
//! command-line arguments and acts as the supervisor.

use std::process::ExitCode;

use crucible_cli::suite::BasicSuite;
use crucible_cli::telemetry::{self, LogFormat};
use crucible_supervisor::{WORKER_MODE_FLAG, maybe_run_as_worker};

fn main() -> ExitCode {
    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|arg| arg == WORKER_MODE_FLAG) {
        // The worker parses no flags, so its diagnostics are configured
        // from the environment. They go to stderr, keeping stdout free
        // for protocol frames.
        if telemetry::initialise(&telemetry::environment_filter(), LogFormat::Compact).is_err() {
            drop(telemetry::initialise(
                telemetry::DEFAULT_LOG_FILTER,
                LogFormat::Compact,
            ));
        }
    }
    if let Some(code) = maybe_run_as_worker(&args, &BasicSuite) {
        return code;
    }
    crucible_cli::run()
}
