//! Console report listener for interactive runs.

#![allow(
    clippy::print_stdout,
    reason = "the validation report is this binary's stdout contract"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crucible_supervisor::ValidationListener;

#[derive(Debug, Default)]
struct ReportState {
    items_complete: u32,
    total_failures: u64,
    finished: bool,
    connection_lost: bool,
}

/// Prints validation progress to stdout and records the final outcome so
/// the binary can derive its exit code.
#[derive(Debug, Default)]
pub struct ConsoleListener {
    state: Mutex<ReportState>,
}

impl ConsoleListener {
    /// Creates a listener ready for registration with a supervisor.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Returns whether the run has ended, successfully or not.
    #[must_use]
    pub fn finished(&self) -> bool {
        self.lock().finished
    }

    /// Returns whether the run ended because the worker vanished.
    #[must_use]
    pub fn connection_was_lost(&self) -> bool {
        self.lock().connection_lost
    }

    /// Returns the failure total accumulated across all targets.
    #[must_use]
    pub fn total_failures(&self) -> u64 {
        self.lock().total_failures
    }

    fn lock(&self) -> MutexGuard<'_, ReportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ValidationListener for ConsoleListener {
    fn validation_started(&self, target_id: &str) {
        println!("validating: {target_id}");
    }

    fn log_message(&self, text: &str) {
        println!("  {text}");
    }

    fn item_complete(&self, target_id: &str, failure_count: u32) {
        let mut state = self.lock();
        state.items_complete += 1;
        state.total_failures += u64::from(failure_count);
        drop(state);
        if failure_count == 0 {
            println!("passed: {target_id}");
        } else {
            println!("FAILED: {target_id} ({failure_count} failure(s))");
        }
    }

    fn all_items_complete(&self) {
        let mut state = self.lock();
        state.finished = true;
        println!(
            "finished: {} target(s), {} failure(s)",
            state.items_complete, state.total_failures
        );
    }

    fn connection_lost(&self) {
        let mut state = self.lock();
        state.connection_lost = true;
        state.finished = true;
        drop(state);
        println!("connection to the validation worker was lost");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulates_failures_across_targets() {
        let listener = ConsoleListener::new();
        listener.validation_started("a");
        listener.item_complete("a", 2);
        listener.validation_started("b");
        listener.item_complete("b", 3);
        listener.all_items_complete();

        assert!(listener.finished());
        assert!(!listener.connection_was_lost());
        assert_eq!(listener.total_failures(), 5);
    }

    #[test]
    fn lost_connection_finishes_the_run() {
        let listener = ConsoleListener::new();
        listener.validation_started("a");
        listener.connection_lost();

        assert!(listener.finished());
        assert!(listener.connection_was_lost());
        assert_eq!(listener.total_failures(), 0);
    }
}
