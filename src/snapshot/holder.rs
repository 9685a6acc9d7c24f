use std::sync::{Arc, PoisonError, RwLock};

use super::listeners::{Listeners, Subscription};

/// Callback invoked with `(next, prev)` after the snapshot changes.
pub type Listener<T> = dyn Fn(&Arc<T>, &Arc<T>) + Send + Sync;

/// Holds the current snapshot of a store and its subscribers.
///
/// Snapshots are never edited in place: a write swaps in a new `Arc<T>`.
/// Writing the snapshot that is already current completes without
/// notifying anyone.
pub struct SnapshotHolder<T> {
    state: RwLock<Arc<T>>,
    listeners: Arc<Listeners<Listener<T>>>,
}

impl<T: Send + Sync + 'static> SnapshotHolder<T> {
    /// Create a holder with the given initial snapshot.
    pub fn new(initial: T) -> Self {
        Self {
            state: RwLock::new(Arc::new(initial)),
            listeners: Listeners::new(),
        }
    }

    /// Get the current snapshot.
    pub fn get(&self) -> Arc<T> {
        Arc::clone(&self.state.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Swap in a new snapshot and notify subscribers in registration order.
    ///
    /// Returns `false` when `next` is the current snapshot; nothing is
    /// notified in that case.
    pub fn set(&self, next: Arc<T>) -> bool {
        let prev = {
            let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *state, Arc::clone(&next))
        };

        if Arc::ptr_eq(&prev, &next) {
            return false;
        }

        self.listeners.dispatch(|listener| listener(&next, &prev));
        true
    }

    /// Subscribe to snapshot changes.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<T>, &Arc<T>) + Send + Sync + 'static,
    {
        self.listeners.add(Arc::new(listener))
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.listeners.len()
    }
}
