//! Observer interface and weak-reference listener registry.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

/// Receives lifecycle notifications for validation runs.
///
/// All callbacks are invoked on the thread that owns the
/// [`Validator`](crate::Validator), inside
/// [`Validator::poll_events`](crate::Validator::poll_events) — never
/// concurrently with supervisor API calls made from that thread.
pub trait ValidationListener: Send + Sync {
    /// Validation of one target has begun.
    fn validation_started(&self, target_id: &str);

    /// A log line from the test suite.
    fn log_message(&self, text: &str);

    /// One target finished with the given failure count.
    fn item_complete(&self, target_id: &str, failure_count: u32);

    /// Every target of the run has been processed.
    fn all_items_complete(&self);

    /// The worker vanished before the run completed. Default is a no-op
    /// so implementers that do not care can ignore it.
    fn connection_lost(&self) {}
}

/// An ordered set of non-owning listener references.
///
/// The registry holds [`Weak`] references only: it never keeps a
/// listener alive, and entries whose listener has been dropped are
/// pruned on the next notification pass. Removal is explicit and safe to
/// call at any time, including from inside a listener's own callback.
#[derive(Default)]
pub struct ListenerRegistry {
    entries: Mutex<Vec<Weak<dyn ValidationListener>>>,
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a listener. Re-adding an already registered listener is
    /// a no-op, preserving its original position in the order.
    pub fn add(&self, listener: &Arc<dyn ValidationListener>) {
        let mut entries = self.lock();
        let already_present = entries
            .iter()
            .any(|entry| entry.upgrade().is_some_and(|held| Arc::ptr_eq(&held, listener)));
        if !already_present {
            entries.push(Arc::downgrade(listener));
        }
    }

    /// Removes a listener. Dead entries encountered on the way are
    /// dropped too.
    pub fn remove(&self, listener: &Arc<dyn ValidationListener>) {
        self.lock().retain(|entry| match entry.upgrade() {
            Some(held) => !Arc::ptr_eq(&held, listener),
            None => false,
        });
    }

    /// Returns the number of live registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock()
            .iter()
            .filter(|entry| entry.strong_count() > 0)
            .count()
    }

    /// Returns whether no live listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes `callback` for every registered listener, in registration
    /// order.
    ///
    /// Iterates over a snapshot and re-checks membership immediately
    /// before each call, so a listener removed mid-notification — even by
    /// its own callback — receives nothing further. The lock is never
    /// held across a callback, which keeps add/remove safe to call from
    /// inside one.
    pub fn notify(&self, callback: impl Fn(&dyn ValidationListener)) {
        let snapshot: Vec<Weak<dyn ValidationListener>> = self.lock().clone();

        for entry in snapshot {
            let still_registered = self
                .lock()
                .iter()
                .any(|candidate| Weak::ptr_eq(candidate, &entry));
            if !still_registered {
                continue;
            }
            if let Some(listener) = entry.upgrade() {
                callback(listener.as_ref());
            }
        }

        self.lock().retain(|entry| entry.strong_count() > 0);
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Weak<dyn ValidationListener>>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("ListenerRegistry")
            .field("listeners", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex as StdMutex;

    use super::*;

    #[derive(Default)]
    struct NamedListener {
        name: &'static str,
        seen: StdMutex<Vec<String>>,
    }

    impl NamedListener {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                seen: StdMutex::new(Vec::new()),
            })
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().expect("lock").clone()
        }
    }

    impl ValidationListener for NamedListener {
        fn validation_started(&self, target_id: &str) {
            self.seen
                .lock()
                .expect("lock")
                .push(format!("{}:{target_id}", self.name));
        }
        fn log_message(&self, _text: &str) {}
        fn item_complete(&self, _target_id: &str, _failure_count: u32) {}
        fn all_items_complete(&self) {}
    }

    fn as_dyn(listener: &Arc<NamedListener>) -> Arc<dyn ValidationListener> {
        Arc::clone(listener) as Arc<dyn ValidationListener>
    }

    #[test]
    fn notifies_in_registration_order() {
        let registry = ListenerRegistry::new();
        let first = NamedListener::new("a");
        let second = NamedListener::new("b");
        registry.add(&as_dyn(&first));
        registry.add(&as_dyn(&second));

        let order = StdMutex::new(Vec::new());
        registry.notify(|listener| {
            listener.validation_started("t");
            order.lock().expect("lock").push(());
        });

        assert_eq!(first.seen(), vec!["a:t".to_owned()]);
        assert_eq!(second.seen(), vec!["b:t".to_owned()]);
        assert_eq!(order.lock().expect("lock").len(), 2);
    }

    #[test]
    fn duplicate_add_is_ignored() {
        let registry = ListenerRegistry::new();
        let listener = NamedListener::new("a");
        registry.add(&as_dyn(&listener));
        registry.add(&as_dyn(&listener));
        assert_eq!(registry.len(), 1);

        registry.notify(|l| l.validation_started("t"));
        assert_eq!(listener.seen().len(), 1);
    }

    #[test]
    fn removed_listener_is_not_notified() {
        let registry = ListenerRegistry::new();
        let listener = NamedListener::new("a");
        registry.add(&as_dyn(&listener));
        registry.remove(&as_dyn(&listener));

        registry.notify(|l| l.validation_started("t"));
        assert!(listener.seen().is_empty());
        assert!(registry.is_empty());
    }

    #[test]
    fn dropped_listener_is_pruned_without_notification() {
        let registry = ListenerRegistry::new();
        let listener = NamedListener::new("a");
        registry.add(&as_dyn(&listener));
        drop(listener);

        registry.notify(|l| l.validation_started("t"));
        assert!(registry.is_empty());
    }

    /// Removes itself from the registry inside its own callback.
    struct SelfRemover {
        registry: Arc<ListenerRegistry>,
        this: StdMutex<Option<Arc<dyn ValidationListener>>>,
        calls: StdMutex<u32>,
    }

    impl ValidationListener for SelfRemover {
        fn validation_started(&self, _target_id: &str) {
            *self.calls.lock().expect("lock") += 1;
            if let Some(this) = self.this.lock().expect("lock").take() {
                self.registry.remove(&this);
            }
        }
        fn log_message(&self, _text: &str) {}
        fn item_complete(&self, _target_id: &str, _failure_count: u32) {}
        fn all_items_complete(&self) {}
    }

    #[test]
    fn removal_during_own_callback_is_safe_and_final() {
        let registry = Arc::new(ListenerRegistry::new());
        let remover = Arc::new(SelfRemover {
            registry: Arc::clone(&registry),
            this: StdMutex::new(None),
            calls: StdMutex::new(0),
        });
        let as_listener = Arc::clone(&remover) as Arc<dyn ValidationListener>;
        *remover.this.lock().expect("lock") = Some(Arc::clone(&as_listener));
        registry.add(&as_listener);

        registry.notify(|l| l.validation_started("first"));
        registry.notify(|l| l.validation_started("second"));

        assert_eq!(*remover.calls.lock().expect("lock"), 1);
        assert!(registry.is_empty());
    }
}
