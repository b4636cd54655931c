//! Ownership of one validation worker process and its byte stream.
//!
//! A [`ProcessChannel`] pairs a spawned worker with its stdio connection:
//! it writes `REQUEST` frames to the worker's stdin and runs a background
//! thread that blocks on the worker's stdout, decoding event frames and
//! handing them to the supervisor through an `mpsc` sender. Stream
//! closure or a malformed frame outside an orderly shutdown is treated as
//! a crash: the channel transitions to [`ConnectionState::Crashed`] and a
//! synthetic [`ValidationEvent::ConnectionLost`] is queued.
//!
//! Spawning is abstracted behind [`WorkerLauncher`] so tests can connect
//! the channel to scripted in-memory pipes instead of real processes.

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crucible_proto::{FrameTag, ValidationEvent, ValidationRequest, read_frame, write_frame};

/// Tracing target for channel operations.
const CHANNEL_TARGET: &str = "crucible_supervisor::channel";

/// How long a worker gets to exit on its own after its stdin closes.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Poll interval while waiting out the shutdown grace period.
const SHUTDOWN_POLL: Duration = Duration::from_millis(25);

/// Lifecycle state of a channel.
///
/// `Crashed` is reachable from `Connected` at any time and is terminal
/// for the channel; recovery means building a new channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No worker process is attached.
    Disconnected,
    /// A worker is being spawned.
    Launching,
    /// The worker is live and the reader thread is running.
    Connected,
    /// The stream died before the run completed.
    Crashed,
}

/// Errors raised by channel operations.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The worker process could not be created.
    #[error("failed to spawn validation worker: {message}")]
    Spawn {
        /// Human-readable failure description.
        message: String,
        /// Optional underlying I/O error.
        #[source]
        source: Option<Arc<std::io::Error>>,
    },

    /// An operation required a live connection and there is none.
    #[error("no live connection to a validation worker")]
    NotConnected,

    /// Writing the request frame to the worker failed.
    #[error("failed to send request to worker: {source}")]
    Send {
        /// Underlying protocol error.
        #[source]
        source: crucible_proto::ProtocolError,
    },
}

/// Handle to a running worker used during teardown.
pub trait WorkerHandle: Send {
    /// Returns the exit code if the worker has exited.
    ///
    /// # Errors
    ///
    /// Propagates the underlying wait failure.
    fn try_wait(&mut self) -> std::io::Result<Option<i32>>;

    /// Forcibly terminates the worker.
    ///
    /// # Errors
    ///
    /// Propagates the underlying kill failure.
    fn kill(&mut self) -> std::io::Result<()>;
}

/// The three capabilities a launcher hands over: the request stream, the
/// event stream, and a teardown handle.
pub struct WorkerLink {
    /// Writes `REQUEST` frames to the worker.
    pub writer: Box<dyn Write + Send>,
    /// Blocking reader over the worker's event frames.
    pub reader: Box<dyn Read + Send>,
    /// Handle used to wait for or kill the worker.
    pub handle: Box<dyn WorkerHandle>,
}

/// Creates worker processes (or stand-ins) on demand.
///
/// The production implementation is [`ProcessLauncher`]; tests inject
/// scripted links, the same seam the plugin executor trait provides in
/// comparable process-hosting code.
pub trait WorkerLauncher: Send {
    /// Launches one worker and returns its connection.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Spawn`] if the worker cannot be created.
    fn launch(&self) -> Result<WorkerLink, ChannelError>;
}

/// Launches real worker processes by re-invoking an executable with the
/// worker-mode marker in its arguments.
pub struct ProcessLauncher {
    program: PathBuf,
    marker: String,
}

impl ProcessLauncher {
    /// Creates a launcher for the given program and marker argument.
    #[must_use]
    pub fn new(program: PathBuf, marker: impl Into<String>) -> Self {
        Self {
            program,
            marker: marker.into(),
        }
    }

    /// Creates a launcher that re-invokes the current executable with
    /// [`crate::worker::WORKER_MODE_FLAG`].
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Spawn`] if the current executable path
    /// cannot be resolved.
    pub fn current_exe() -> Result<Self, ChannelError> {
        let program = std::env::current_exe().map_err(|err| ChannelError::Spawn {
            message: String::from("could not resolve current executable"),
            source: Some(Arc::new(err)),
        })?;
        Ok(Self::new(program, crate::worker::WORKER_MODE_FLAG))
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self) -> Result<WorkerLink, ChannelError> {
        debug!(
            target: CHANNEL_TARGET,
            program = %self.program.display(),
            marker = %self.marker,
            "spawning validation worker"
        );

        let mut child = Command::new(&self.program)
            .arg(&self.marker)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|err| ChannelError::Spawn {
                message: format!("failed to start {}", self.program.display()),
                source: Some(Arc::new(err)),
            })?;

        let stdin = child.stdin.take().ok_or_else(|| ChannelError::Spawn {
            message: String::from("failed to capture worker stdin"),
            source: None,
        })?;
        let stdout = child.stdout.take().ok_or_else(|| ChannelError::Spawn {
            message: String::from("failed to capture worker stdout"),
            source: None,
        })?;

        debug!(target: CHANNEL_TARGET, pid = child.id(), "validation worker spawned");

        Ok(WorkerLink {
            writer: Box::new(stdin),
            reader: Box::new(stdout),
            handle: Box::new(ChildHandle(child)),
        })
    }
}

struct ChildHandle(Child);

impl WorkerHandle for ChildHandle {
    fn try_wait(&mut self) -> std::io::Result<Option<i32>> {
        Ok(self.0.try_wait()?.map(|status| status.code().unwrap_or(-1)))
    }

    fn kill(&mut self) -> std::io::Result<()> {
        self.0.kill()?;
        // Reap so the dead worker does not linger as a zombie.
        self.0.wait().map(|_| ())
    }
}

/// One worker process plus its bidirectional stream connection.
///
/// At most one request is in flight per channel; serialising requests is
/// the supervisor's job. Dropping the channel tears the worker down.
pub struct ProcessChannel {
    state: Arc<Mutex<ConnectionState>>,
    writer: Option<Box<dyn Write + Send>>,
    handle: Option<Box<dyn WorkerHandle>>,
    shutting_down: Arc<AtomicBool>,
    reader_thread: Option<JoinHandle<()>>,
}

impl ProcessChannel {
    /// Spawns a worker via `launcher` and starts the background reader,
    /// which delivers decoded events to `sink`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Spawn`] if the worker or the reader thread
    /// cannot be created.
    pub fn connect(
        launcher: &dyn WorkerLauncher,
        sink: Sender<ValidationEvent>,
    ) -> Result<Self, ChannelError> {
        let state = Arc::new(Mutex::new(ConnectionState::Launching));
        let link = launcher.launch()?;
        let shutting_down = Arc::new(AtomicBool::new(false));

        let reader_thread = {
            let state = Arc::clone(&state);
            let shutting_down = Arc::clone(&shutting_down);
            let mut reader = link.reader;
            thread::Builder::new()
                .name(String::from("crucible-reader"))
                .spawn(move || reader_loop(&mut reader, &sink, &state, &shutting_down))
                .map_err(|err| ChannelError::Spawn {
                    message: String::from("failed to start channel reader thread"),
                    source: Some(Arc::new(err)),
                })?
        };

        *lock_state(&state) = ConnectionState::Connected;

        Ok(Self {
            state,
            writer: Some(link.writer),
            handle: Some(link.handle),
            shutting_down,
            reader_thread: Some(reader_thread),
        })
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *lock_state(&self.state)
    }

    /// Returns whether the worker connection is live.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Writes one `REQUEST` frame to the worker and flushes it.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::NotConnected`] without a live connection,
    /// or [`ChannelError::Send`] if encoding or writing fails.
    pub fn send(&mut self, request: &ValidationRequest) -> Result<(), ChannelError> {
        if self.state() != ConnectionState::Connected {
            return Err(ChannelError::NotConnected);
        }
        let writer = self.writer.as_mut().ok_or(ChannelError::NotConnected)?;
        let payload = request
            .encode()
            .map_err(|source| ChannelError::Send { source })?;

        debug!(
            target: CHANNEL_TARGET,
            targets = request.targets().len(),
            request_bytes = payload.len(),
            "sending validation request"
        );

        write_frame(writer, FrameTag::Request, &payload)
            .map_err(|source| ChannelError::Send { source })
    }

    /// Tears the worker down: closes its stdin, waits out a bounded grace
    /// period, then kills it. Idempotent; the synthetic `ConnectionLost`
    /// event is suppressed because the teardown is supervisor initiated.
    pub fn disconnect(&mut self) {
        self.shutting_down.store(true, Ordering::SeqCst);

        // Closing the request stream asks the worker to exit on its own.
        drop(self.writer.take());

        if let Some(mut handle) = self.handle.take() {
            wait_or_kill(handle.as_mut());
        }
        // The reader thread unblocks on worker EOF and exits on its own;
        // with `shutting_down` set it emits nothing, so it is detached
        // rather than joined.
        drop(self.reader_thread.take());

        *lock_state(&self.state) = ConnectionState::Disconnected;
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for ProcessChannel {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ProcessChannel")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

fn lock_state(state: &Mutex<ConnectionState>) -> MutexGuard<'_, ConnectionState> {
    // The state is a plain enum; a poisoned guard is still coherent.
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Waits for the worker to exit within the grace period, killing it if
/// it does not.
fn wait_or_kill(handle: &mut dyn WorkerHandle) {
    let deadline = Instant::now() + SHUTDOWN_GRACE;
    loop {
        match handle.try_wait() {
            Ok(Some(code)) => {
                debug!(target: CHANNEL_TARGET, code, "validation worker exited");
                return;
            }
            Ok(None) if Instant::now() < deadline => thread::sleep(SHUTDOWN_POLL),
            Ok(None) => {
                warn!(
                    target: CHANNEL_TARGET,
                    grace_ms = u64::try_from(SHUTDOWN_GRACE.as_millis()).unwrap_or(u64::MAX),
                    "worker did not exit within grace period, killing"
                );
                drop(handle.kill());
                return;
            }
            Err(err) => {
                warn!(
                    target: CHANNEL_TARGET,
                    error = %err,
                    "failed to poll worker exit status, killing"
                );
                drop(handle.kill());
                return;
            }
        }
    }
}

/// Blocking decode loop run on the channel's background thread.
///
/// Any abnormal end of stream — EOF, read failure, or a malformed frame —
/// is folded into a single synthetic `ConnectionLost` event unless the
/// supervisor initiated the shutdown.
fn reader_loop(
    reader: &mut Box<dyn Read + Send>,
    sink: &Sender<ValidationEvent>,
    state: &Mutex<ConnectionState>,
    shutting_down: &AtomicBool,
) {
    let lost = loop {
        match read_frame(reader) {
            Ok(Some((tag, payload))) => match ValidationEvent::decode(tag, &payload) {
                Ok(event) => {
                    debug!(target: CHANNEL_TARGET, ?tag, "received worker event");
                    if sink.send(event).is_err() {
                        // The supervisor dropped its receiver; nobody is
                        // listening any more.
                        break false;
                    }
                }
                Err(err) => {
                    warn!(
                        target: CHANNEL_TARGET,
                        error = %err,
                        "malformed frame from worker, treating as crash"
                    );
                    break true;
                }
            },
            Ok(None) => break !shutting_down.load(Ordering::SeqCst),
            Err(err) => {
                if shutting_down.load(Ordering::SeqCst) {
                    break false;
                }
                warn!(
                    target: CHANNEL_TARGET,
                    error = %err,
                    "worker stream failed, treating as crash"
                );
                break true;
            }
        }
    };

    if lost {
        *lock_state(state) = ConnectionState::Crashed;
        drop(sink.send(ValidationEvent::ConnectionLost));
    }
}
