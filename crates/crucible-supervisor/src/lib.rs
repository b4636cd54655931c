//! Out-of-process validation supervisor.
//!
//! The `crucible-supervisor` crate is the control plane that runs plugin
//! validation inside an isolated worker process so a crashing or hanging
//! plugin cannot take down the supervising application. The
//! [`Validator`] owns at most one [`channel::ProcessChannel`], serialises
//! validation requests onto it, and marshals the worker's progress events
//! back to registered [`ValidationListener`]s on the thread that owns the
//! supervisor.
//!
//! The actual checks are external: they live behind the [`TestSuite`]
//! trait and are invoked by the [`worker`] entry point inside the child
//! process. The same binary acts as supervisor or worker depending on a
//! startup marker (see [`worker::maybe_run_as_worker`]).
//!
//! # Architecture
//!
//! ```text
//! caller ── validate() ──> Validator ── REQUEST frame ──> worker process
//!                              ^                               │
//!                              │    event frames (background   │
//!                        poll_events() <── reader thread) <────┘
//!                              │
//!                              v
//!                       listener callbacks
//! ```

pub mod channel;
pub mod listener;
pub mod suite;
pub mod supervisor;
pub mod worker;

#[cfg(test)]
mod tests;

pub use self::channel::{
    ChannelError, ConnectionState, ProcessChannel, ProcessLauncher, WorkerHandle, WorkerLauncher,
    WorkerLink,
};
pub use self::listener::{ListenerRegistry, ValidationListener};
pub use self::suite::TestSuite;
pub use self::supervisor::Validator;
pub use self::worker::{WORKER_MODE_FLAG, WorkerError, maybe_run_as_worker, run_worker};
