//! Entry point executed inside the validation worker process.
//!
//! The same binary acts as supervisor or worker: when the reserved
//! marker appears in the invocation arguments, [`maybe_run_as_worker`]
//! takes over before normal startup. The worker reads exactly one
//! `REQUEST` frame from stdin, drives the [`TestSuite`] over every
//! target in order, writes each progress frame immediately (flushing so
//! back-pressure blocks rather than drops), then writes `ALL_COMPLETE`
//! and exits.
//!
//! The worker deliberately catches nothing from the suite itself: a
//! crashing plugin takes this process down, which the supervisor
//! observes as a lost connection. That is the isolation boundary.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use thiserror::Error;
use tracing::debug;

use crucible_proto::{
    FrameTag, ProtocolError, ValidationEvent, ValidationRequest, read_frame, write_frame,
};

use crate::suite::TestSuite;

/// Tracing target for worker-side operations.
const WORKER_TARGET: &str = "crucible_supervisor::worker";

/// Reserved invocation marker that routes a process into worker mode.
pub const WORKER_MODE_FLAG: &str = "--validator-worker";

/// Errors that end a worker run abnormally.
///
/// These surface only as a non-zero exit code; protocol-level results
/// always travel over the stream, never the exit status.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The request stream closed before a request arrived.
    #[error("stream closed before a validation request arrived")]
    MissingRequest,

    /// A protocol encode/decode or stream failure.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Runs the worker entry point if the marker is present in `args`.
///
/// Returns `None` when the marker is absent so the caller can continue
/// with normal startup. Keeps no supervisor-side state: everything the
/// worker needs arrives over stdin.
#[must_use]
pub fn maybe_run_as_worker(args: &[String], suite: &dyn TestSuite) -> Option<ExitCode> {
    if !args.iter().any(|arg| arg == WORKER_MODE_FLAG) {
        return None;
    }

    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    Some(match run_worker(stdin, stdout, suite) {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    })
}

/// Executes one validation run over the given streams.
///
/// # Errors
///
/// Returns [`WorkerError::MissingRequest`] if the input closes before a
/// request frame arrives, or a [`WorkerError::Protocol`] failure for a
/// malformed request or a write error on the event stream.
pub fn run_worker(
    mut input: impl Read,
    mut output: impl Write,
    suite: &dyn TestSuite,
) -> Result<(), WorkerError> {
    let Some((tag, payload)) = read_frame(&mut input)? else {
        return Err(WorkerError::MissingRequest);
    };
    if tag != FrameTag::Request {
        return Err(WorkerError::Protocol(ProtocolError::UnexpectedFrame { tag }));
    }
    let request = ValidationRequest::decode(&payload)?;

    debug!(
        target: WORKER_TARGET,
        targets = request.targets().len(),
        strictness = request.options().strictness_level(),
        "worker received validation request"
    );

    run_request(&request, suite, &mut |event| write_event(&mut output, &event))?;
    Ok(())
}

/// Drives the suite over every target of a request, emitting events in
/// the order the protocol guarantees: `Started`, any `Log` lines, then
/// `ItemComplete` per target, with `AllComplete` last.
///
/// Shared between the worker process and the supervisor's in-process
/// debugging mode so both produce identical event sequences.
pub(crate) fn run_request<E>(
    request: &ValidationRequest,
    suite: &dyn TestSuite,
    emit: &mut dyn FnMut(ValidationEvent) -> Result<(), E>,
) -> Result<(), E> {
    let options = request.options();
    let repeats = options.repeats().max(1);

    for target in request.targets() {
        let target_id = target.id();
        emit(ValidationEvent::Started {
            target_id: target_id.clone(),
        })?;

        let mut failure_count = 0u32;
        for _ in 0..repeats {
            let mut log_failure: Option<E> = None;
            let failures = suite.run(target, options, &mut |line: &str| {
                if log_failure.is_none() {
                    if let Err(err) = emit(ValidationEvent::Log {
                        text: line.to_owned(),
                    }) {
                        log_failure = Some(err);
                    }
                }
            });
            if let Some(err) = log_failure {
                return Err(err);
            }
            failure_count = failure_count.saturating_add(failures);
        }

        emit(ValidationEvent::ItemComplete {
            target_id,
            failure_count,
        })?;
    }

    emit(ValidationEvent::AllComplete)
}

/// Runs a request on the calling thread, queueing events on `sink`.
///
/// Backs the supervisor's in-process debugging mode. The event sequence
/// is identical to an out-of-process run; only the isolation is gone.
pub(crate) fn run_in_process(
    request: &ValidationRequest,
    suite: &dyn TestSuite,
    sink: &std::sync::mpsc::Sender<ValidationEvent>,
) {
    // A send failure means the supervisor's receiver is gone, which
    // cannot happen while it is calling us; ignore it regardless.
    drop(run_request(request, suite, &mut |event| sink.send(event)));
}

/// Encodes and writes one event frame, flushing before returning.
fn write_event(output: &mut impl Write, event: &ValidationEvent) -> Result<(), WorkerError> {
    let (tag, payload) = event.encode()?;
    write_frame(output, tag, &payload)?;
    Ok(())
}
