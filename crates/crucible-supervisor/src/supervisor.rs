//! Public-facing validation controller.
//!
//! [`Validator`] owns zero-or-one [`ProcessChannel`], serialises
//! validation requests, and re-dispatches worker events onto the owning
//! thread: the background reader only ever pushes decoded events into an
//! `mpsc` queue, and listener callbacks run exclusively inside
//! [`Validator::poll_events`], called by whichever thread owns the
//! `Validator`. Listeners are therefore never invoked concurrently with
//! supervisor API calls made from that thread.

use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;

use tracing::{debug, warn};

use crucible_proto::{ValidationEvent, ValidationOptions, ValidationRequest, ValidationTarget};

use crate::channel::{ProcessChannel, WorkerLauncher};
use crate::listener::{ListenerRegistry, ValidationListener};
use crate::suite::TestSuite;
use crate::worker;

/// Tracing target for supervisor operations.
const SUPERVISOR_TARGET: &str = "crucible_supervisor::supervisor";

/// Connection attempts per `validate()` call: the first try plus one
/// transparent retry.
const CONNECT_ATTEMPTS: u32 = 2;

/// Supervises validation runs executed in an isolated worker process.
///
/// At most one request is in flight at a time; `validate()` on a busy
/// supervisor fails fast rather than interleaving runs. A crash
/// mid-validation is reported once as `connection_lost` to every
/// listener and is not retried automatically.
///
/// The type is deliberately not `Sync`: its public API belongs to one
/// owning thread, and cross-thread traffic is confined to the internal
/// event queue.
///
/// # Example
///
/// ```no_run
/// use std::sync::Arc;
/// use crucible_proto::{ValidationOptions, ValidationTarget};
/// use crucible_supervisor::{ProcessLauncher, TestSuite, Validator};
/// # struct NullSuite;
/// # impl TestSuite for NullSuite {
/// #     fn run(
/// #         &self,
/// #         _: &ValidationTarget,
/// #         _: &ValidationOptions,
/// #         _: &mut dyn FnMut(&str),
/// #     ) -> u32 { 0 }
/// # }
///
/// let launcher = ProcessLauncher::current_exe().expect("resolve executable");
/// let mut validator = Validator::new(Box::new(launcher), Arc::new(NullSuite));
/// let targets = vec![ValidationTarget::path("/plugins/Gain.vst3")];
/// if validator.validate(&targets, ValidationOptions::default()) {
///     loop {
///         validator.poll_events();
///         // ... until a listener reports completion
///         # break;
///     }
/// }
/// ```
pub struct Validator {
    launcher: Box<dyn WorkerLauncher>,
    suite: Arc<dyn TestSuite>,
    listeners: ListenerRegistry,
    channel: Option<ProcessChannel>,
    events_tx: Sender<ValidationEvent>,
    events_rx: Receiver<ValidationEvent>,
    busy: bool,
    in_process: bool,
}

impl Validator {
    /// Creates a supervisor that spawns workers via `launcher` and, in
    /// in-process mode, runs `suite` directly.
    #[must_use]
    pub fn new(launcher: Box<dyn WorkerLauncher>, suite: Arc<dyn TestSuite>) -> Self {
        let (events_tx, events_rx) = channel();
        Self {
            launcher,
            suite,
            listeners: ListenerRegistry::new(),
            channel: None,
            events_tx,
            events_rx,
            busy: false,
            in_process: false,
        }
    }

    /// Starts validating `targets` with `options`.
    ///
    /// Returns `false` immediately — with no state change — when
    /// `targets` is empty or a request is already outstanding. Otherwise
    /// ensures a connected channel (retrying the connect exactly once;
    /// if the retry also fails, listeners receive `connection_lost` and
    /// the call returns `false`), queues the request, and returns `true`
    /// without waiting for completion.
    pub fn validate(&mut self, targets: &[ValidationTarget], options: ValidationOptions) -> bool {
        if targets.is_empty() {
            debug!(target: SUPERVISOR_TARGET, "rejecting validate call with no targets");
            return false;
        }
        if self.busy {
            debug!(
                target: SUPERVISOR_TARGET,
                "rejecting validate call while a request is outstanding"
            );
            return false;
        }

        let request = ValidationRequest::new(targets.to_vec(), options);

        if self.in_process {
            // Debug-only path: run the worker logic on the calling
            // thread. No crash isolation.
            worker::run_in_process(&request, self.suite.as_ref(), &self.events_tx);
            self.busy = true;
            return true;
        }

        if !self.ensure_connection() {
            drop(self.events_tx.send(ValidationEvent::ConnectionLost));
            return false;
        }

        let Some(channel) = self.channel.as_mut() else {
            return false;
        };
        match channel.send(&request) {
            Ok(()) => {
                self.busy = true;
                true
            }
            Err(err) => {
                warn!(
                    target: SUPERVISOR_TARGET,
                    error = %err,
                    "failed to queue validation request"
                );
                self.channel = None;
                drop(self.events_tx.send(ValidationEvent::ConnectionLost));
                false
            }
        }
    }

    /// Switches between isolated and in-process execution.
    ///
    /// In-process mode is for debugging only: the suite runs on the
    /// calling thread and a crashing plugin brings the supervisor down
    /// with it.
    pub const fn set_in_process(&mut self, in_process: bool) {
        self.in_process = in_process;
    }

    /// Returns whether a live worker connection exists. No side effects.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.channel.as_ref().is_some_and(ProcessChannel::is_connected)
    }

    /// Returns whether a request is currently outstanding.
    #[must_use]
    pub const fn is_busy(&self) -> bool {
        self.busy
    }

    /// Registers a listener for lifecycle events.
    pub fn add_listener(&self, listener: &Arc<dyn ValidationListener>) {
        self.listeners.add(listener);
    }

    /// Removes a listener; safe to call from inside its own callback.
    pub fn remove_listener(&self, listener: &Arc<dyn ValidationListener>) {
        self.listeners.remove(listener);
    }

    /// Delivers every queued worker event to the listeners, on the
    /// calling thread, and returns how many were delivered.
    ///
    /// `AllComplete` and `ConnectionLost` mark the outstanding request
    /// (if any) as finished so a subsequent [`Validator::validate`] is
    /// accepted again; `ConnectionLost` also tears the dead channel
    /// down.
    pub fn poll_events(&mut self) -> usize {
        let mut delivered = 0usize;
        while let Ok(event) = self.events_rx.try_recv() {
            match &event {
                ValidationEvent::AllComplete => {
                    self.busy = false;
                }
                ValidationEvent::ConnectionLost => {
                    self.busy = false;
                    if let Some(mut channel) = self.channel.take() {
                        channel.disconnect();
                    }
                }
                _ => {}
            }
            self.dispatch(&event);
            delivered += 1;
        }
        delivered
    }

    /// Tears down the worker, ending any run in progress.
    ///
    /// Cancelling a run this way is crash-equivalent for listeners:
    /// when a request was outstanding they receive exactly one
    /// `connection_lost`, and no further events from the cancelled run
    /// are delivered. With no run outstanding the teardown is silent.
    /// The supervisor accepts new requests immediately either way.
    pub fn disconnect(&mut self) {
        let run_cancelled = self.busy && self.channel.is_some();
        if let Some(mut channel) = self.channel.take() {
            channel.disconnect();
            // Undelivered events from the dead channel must not outlive
            // it.
            self.reset_event_queue();
        }
        self.busy = false;
        if run_cancelled {
            self.dispatch(&ValidationEvent::ConnectionLost);
        }
    }

    /// Connects (or reuses) the channel, retrying a failed connect once.
    fn ensure_connection(&mut self) -> bool {
        if self
            .channel
            .as_ref()
            .is_some_and(ProcessChannel::is_connected)
        {
            return true;
        }
        if let Some(mut dead) = self.channel.take() {
            dead.disconnect();
        }
        // Anything still queued was produced by a discarded channel, a
        // failed connect, or a worker that died while idle; delivering
        // it against the run about to start would end that run for no
        // reason.
        self.reset_event_queue();

        for attempt in 1..=CONNECT_ATTEMPTS {
            match ProcessChannel::connect(self.launcher.as_ref(), self.events_tx.clone()) {
                Ok(channel) => {
                    self.channel = Some(channel);
                    return true;
                }
                Err(err) => warn!(
                    target: SUPERVISOR_TARGET,
                    attempt,
                    error = %err,
                    "validation worker connect failed"
                ),
            }
        }
        false
    }

    /// Replaces the event queue, dropping whatever the old one held.
    ///
    /// A reader thread still holding the old sender finds its sends
    /// failing and exits quietly.
    fn reset_event_queue(&mut self) {
        let (events_tx, events_rx) = channel();
        self.events_tx = events_tx;
        self.events_rx = events_rx;
    }

    fn dispatch(&self, event: &ValidationEvent) {
        match event {
            ValidationEvent::Started { target_id } => self
                .listeners
                .notify(|listener| listener.validation_started(target_id)),
            ValidationEvent::Log { text } => self
                .listeners
                .notify(|listener| listener.log_message(text)),
            ValidationEvent::ItemComplete {
                target_id,
                failure_count,
            } => self
                .listeners
                .notify(|listener| listener.item_complete(target_id, *failure_count)),
            ValidationEvent::AllComplete => self
                .listeners
                .notify(|listener| listener.all_items_complete()),
            ValidationEvent::ConnectionLost => self
                .listeners
                .notify(|listener| listener.connection_lost()),
        }
    }
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Validator")
            .field("connected", &self.is_connected())
            .field("busy", &self.busy)
            .field("in_process", &self.in_process)
            .field("listeners", &self.listeners)
            .finish_non_exhaustive()
    }
}
