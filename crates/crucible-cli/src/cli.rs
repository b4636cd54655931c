//! Argument parsing and the supervisor-mode run loop.

use std::process::ExitCode;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use clap::Parser;
use tracing::error;

use crucible_proto::{ValidationOptions, ValidationTarget};
use crucible_supervisor::{ProcessLauncher, ValidationListener, Validator};

use crate::report::ConsoleListener;
use crate::suite::BasicSuite;
use crate::telemetry::{self, LogFormat};

/// Tracing target for supervisor-mode runs.
const CLI_TARGET: &str = "crucible_cli";

/// How long the run loop sleeps when no events are queued.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Command-line interface for the crucible plugin validator.
#[derive(Parser, Debug)]
#[command(
    name = "crucible",
    about = "Validates audio plugins inside an isolated worker process"
)]
pub(crate) struct Cli {
    /// Plugin paths or identifiers to validate, in order.
    #[arg(value_name = "PLUGIN", required = true)]
    pub(crate) targets: Vec<String>,

    /// Strictness level from 1 (lenient) to 10 (paranoid).
    #[arg(long, default_value_t = 5)]
    pub(crate) strictness: u8,

    /// Per-target timeout in milliseconds.
    #[arg(long, value_name = "MS", default_value_t = 30_000)]
    pub(crate) timeout_ms: u64,

    /// Asks the test suite for verbose log output.
    #[arg(long)]
    pub(crate) verbose: bool,

    /// Seed for randomised checks.
    #[arg(long, default_value_t = 0, allow_negative_numbers = true)]
    pub(crate) seed: i64,

    /// How many times each target is validated.
    #[arg(long, default_value_t = 1)]
    pub(crate) repeats: u32,

    /// Restricts the run to one check category; repeatable.
    #[arg(long = "category", value_name = "NAME")]
    pub(crate) categories: Vec<String>,

    /// Runs checks in this process instead of a worker. Debugging only:
    /// a crashing plugin takes the supervisor down with it.
    #[arg(long)]
    pub(crate) in_process: bool,

    /// Diagnostic log encoding on stderr.
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    pub(crate) log_format: LogFormat,

    /// Diagnostic log filter, in `tracing` `EnvFilter` syntax.
    #[arg(long, default_value = "info")]
    pub(crate) log_filter: String,
}

impl Cli {
    fn targets(&self) -> Vec<ValidationTarget> {
        self.targets.iter().map(ValidationTarget::path).collect()
    }

    fn options(&self) -> ValidationOptions {
        ValidationOptions::default()
            .with_strictness(self.strictness)
            .with_timeout_ms(self.timeout_ms)
            .with_verbose(self.verbose)
            .with_random_seed(self.seed)
            .with_repeats(self.repeats)
            .with_categories(self.categories.clone())
    }
}

/// Parses the command line and runs one validation to completion.
#[must_use]
pub fn run() -> ExitCode {
    run_cli(&Cli::parse())
}

fn run_cli(cli: &Cli) -> ExitCode {
    if let Err(err) = telemetry::initialise(&cli.log_filter, cli.log_format) {
        return fail_before_telemetry(&err.to_string());
    }

    let launcher = match ProcessLauncher::current_exe() {
        Ok(launcher) => launcher,
        Err(err) => {
            error!(target: CLI_TARGET, error = %err, "cannot prepare worker launcher");
            return ExitCode::FAILURE;
        }
    };

    let mut validator = Validator::new(Box::new(launcher), Arc::new(BasicSuite));
    validator.set_in_process(cli.in_process);

    let report = ConsoleListener::new();
    let listener = Arc::clone(&report) as Arc<dyn ValidationListener>;
    validator.add_listener(&listener);

    if !validator.validate(&cli.targets(), cli.options()) {
        // A failed connect queues a connection-lost event; drain it so
        // the report reflects what happened.
        validator.poll_events();
        error!(target: CLI_TARGET, "validation could not be started");
        return ExitCode::FAILURE;
    }

    while !report.finished() {
        if validator.poll_events() == 0 {
            thread::sleep(POLL_INTERVAL);
        }
    }
    validator.disconnect();

    if report.connection_was_lost() || report.total_failures() > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}

#[allow(
    clippy::print_stderr,
    reason = "telemetry failed to come up, so there is nowhere else to report it"
)]
fn fail_before_telemetry(message: &str) -> ExitCode {
    eprintln!("crucible: {message}");
    ExitCode::FAILURE
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("parse")
    }

    #[test]
    fn a_target_is_required() {
        assert!(Cli::try_parse_from(["crucible"]).is_err());
    }

    #[test]
    fn defaults_match_the_protocol_defaults() {
        let cli = parse(&["crucible", "/plugins/Gain.vst3"]);
        assert_eq!(cli.options(), ValidationOptions::default());
        assert!(!cli.in_process);
        assert_eq!(cli.log_format, LogFormat::Compact);
        assert_eq!(cli.log_filter, "info");
    }

    #[test]
    fn flags_flow_into_the_options() {
        let cli = parse(&[
            "crucible",
            "--strictness",
            "9",
            "--timeout-ms",
            "5000",
            "--verbose",
            "--seed",
            "-7",
            "--repeats",
            "3",
            "--category",
            "basic",
            "--category",
            "parameters",
            "/plugins/Gain.vst3",
        ]);
        let options = cli.options();
        assert_eq!(options.strictness_level(), 9);
        assert_eq!(options.timeout_ms(), 5000);
        assert!(options.verbose());
        assert_eq!(options.random_seed(), -7);
        assert_eq!(options.repeats(), 3);
        assert_eq!(
            options.categories(),
            ["basic".to_owned(), "parameters".to_owned()].as_slice()
        );
    }

    #[rstest]
    #[case::one(&["crucible", "a.vst3"], 1)]
    #[case::many(&["crucible", "a.vst3", "b.so", "c.clap"], 3)]
    fn every_positional_becomes_a_target(#[case] args: &[&str], #[case] expected: usize) {
        let cli = parse(args);
        let targets = cli.targets();
        assert_eq!(targets.len(), expected);
        assert_eq!(targets[0], ValidationTarget::path("a.vst3"));
    }

    #[test]
    fn out_of_range_strictness_is_clamped() {
        let cli = parse(&["crucible", "--strictness", "42", "a.vst3"]);
        assert_eq!(cli.options().strictness_level(), 10);
    }
}
