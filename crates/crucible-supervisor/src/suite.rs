//! The external test-suite collaborator interface.
//!
//! The checks themselves are out of scope for this crate: a suite is
//! whatever the embedding application plugs in. The supervisor only
//! defines the calling convention, which the worker entry point uses for
//! every target of a run.

use crucible_proto::{ValidationOptions, ValidationTarget};

/// A pluggable validation suite executed once per target.
///
/// Implementations run whatever checks they see fit, report progress
/// through the `log` sink, and return the number of failed checks (zero
/// means the target passed). Log lines are forwarded to the supervisor
/// verbatim, in order, before the target's completion event.
///
/// A suite runs inside the worker process, so it is free to crash: that
/// is the isolation boundary working as intended, and the supervisor
/// reports it as a lost connection.
pub trait TestSuite: Send + Sync {
    /// Validates one target with the given options.
    fn run(
        &self,
        target: &ValidationTarget,
        options: &ValidationOptions,
        log: &mut dyn FnMut(&str),
    ) -> u32;
}
