//! Synchronous listener lists for stream events
//!
//! Unlike a broadcast channel, a [`Notifier`] calls its listeners inline, in the order
//! they were added, before `notify` returns. The combined stream relies on this to
//! recompute its aggregate state at the exact moment a child changes.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

type Listener<T> = Arc<dyn Fn(&T) + Send + Sync>;

/// Handle returned by [`Notifier::add_listener`], used to remove the listener again
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

/// A list of callbacks invoked with a shared reference to each notified value
///
/// A listener that panics is logged and skipped; the remaining listeners still run and
/// the notifier stays usable. Listeners may add or remove listeners while being
/// notified; such changes take effect from the next `notify`.
pub struct Notifier<T> {
    listeners: Mutex<Vec<(ListenerId, Listener<T>)>>,
    next_id: AtomicU64,
}

impl<T> Default for Notifier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Notifier<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Notifier")
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl<T> Notifier<T> {
    /// Create a notifier without listeners
    pub fn new() -> Self {
        Self {
            listeners: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
        }
    }

    /// Register a callback invoked on every subsequent `notify`
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.lock().push((id, Arc::new(listener)));
        id
    }

    /// Remove a listener; returns false if it was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    /// Remove every listener
    pub fn remove_all_listeners(&self) {
        self.lock().clear();
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().len()
    }

    /// Invoke every listener with `value`
    pub fn notify(&self, value: &T) {
        // Snapshot so listeners can (un)subscribe without deadlocking on the list
        let snapshot: Vec<(ListenerId, Listener<T>)> = self.lock().clone();

        for (id, listener) in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(value))) {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "non-string panic payload".to_string());
                tracing::error!(listener = id.0, panic = %message, "Listener panicked during notify");
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<(ListenerId, Listener<T>)>> {
        // A poisoned list is still structurally valid, listeners never run under the lock
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
