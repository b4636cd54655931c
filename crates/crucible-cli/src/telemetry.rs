//! Structured telemetry initialisation for the supervisor binary.

use std::io::{self, IsTerminal};

use clap::ValueEnum;
use once_cell::sync::OnceCell;
use tracing::{Subscriber, subscriber::SetGlobalDefaultError};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;

static TELEMETRY_GUARD: OnceCell<()> = OnceCell::new();

/// Environment variable consulted for the log filter when there is no
/// parsed command line, i.e. in worker mode.
pub const LOG_FILTER_ENV: &str = "CRUCIBLE_LOG";

/// Default filter applied when neither a flag nor the environment
/// provides one.
pub const DEFAULT_LOG_FILTER: &str = "info";

/// Output encoding for diagnostic logs.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, ValueEnum)]
pub enum LogFormat {
    /// Single-line human-readable records.
    #[default]
    Compact,
    /// Newline-delimited JSON records.
    Json,
}

/// Handle returned when telemetry has been initialised.
#[derive(Debug, Default, Clone, Copy)]
pub struct TelemetryHandle;

/// Errors encountered while configuring telemetry.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to parse the configured log filter expression.
    #[error("invalid log filter: {0}")]
    Filter(String),
    /// Failed to install the tracing subscriber.
    #[error("failed to install telemetry subscriber: {0}")]
    Subscriber(SetGlobalDefaultError),
}

/// Configures the global tracing subscriber when invoked for the first
/// time.
///
/// Repeated calls are idempotent: the first invocation installs the
/// global subscriber, subsequent ones return a fresh [`TelemetryHandle`]
/// without touching the global state again.
///
/// # Errors
///
/// Returns [`TelemetryError::Filter`] for an unparseable filter
/// expression and [`TelemetryError::Subscriber`] if a global subscriber
/// was installed by other means first.
pub fn initialise(filter: &str, format: LogFormat) -> Result<TelemetryHandle, TelemetryError> {
    TELEMETRY_GUARD
        .get_or_try_init(|| install_subscriber(filter, format))
        .map(|_| TelemetryHandle)
}

/// Returns the filter expression for a process with no parsed command
/// line: the [`LOG_FILTER_ENV`] variable if set, otherwise
/// [`DEFAULT_LOG_FILTER`].
#[must_use]
pub fn environment_filter() -> String {
    filter_or_default(std::env::var(LOG_FILTER_ENV).ok())
}

fn filter_or_default(configured: Option<String>) -> String {
    configured.unwrap_or_else(|| String::from(DEFAULT_LOG_FILTER))
}

fn install_subscriber(filter: &str, format: LogFormat) -> Result<(), TelemetryError> {
    let filter =
        EnvFilter::try_new(filter).map_err(|error| TelemetryError::Filter(error.to_string()))?;

    let builder = |filter: EnvFilter| {
        fmt::Subscriber::builder()
            .with_env_filter(filter)
            .with_target(true)
            .with_level(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            // Diagnostics go to stderr: stdout carries the validation
            // report in supervisor mode and protocol frames in worker
            // mode.
            .with_writer(io::stderr)
            .with_ansi(io::stderr().is_terminal())
    };

    let subscriber: Box<dyn Subscriber + Send + Sync> = match format {
        LogFormat::Json => {
            let json = builder(filter).json().flatten_event(true).finish();
            Box::new(json)
        }
        LogFormat::Compact => Box::new(builder(filter).compact().finish()),
    };

    tracing::subscriber::set_global_default(subscriber).map_err(TelemetryError::Subscriber)
}
