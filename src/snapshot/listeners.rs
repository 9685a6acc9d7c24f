use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};

/// Ordered registry of listener callbacks.
///
/// Dispatch iterates over a copy of the registry taken when dispatch starts,
/// so listeners added mid-dispatch wait for the next round. Each entry is
/// re-checked before it is invoked, so listeners removed mid-dispatch are
/// skipped for the rest of the round.
pub(crate) struct Listeners<F: ?Sized> {
    next_id: AtomicU64,
    entries: Mutex<Vec<(u64, Arc<F>)>>,
}

impl<F: ?Sized + Send + Sync + 'static> Listeners<F> {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(0),
            entries: Mutex::new(Vec::new()),
        })
    }

    /// Register a listener at the end of the dispatch order.
    pub(crate) fn add(self: &Arc<Self>, listener: Arc<F>) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, listener));

        let registry: Weak<dyn Unsubscribe> = Arc::downgrade(self) as Weak<Self>;
        Subscription {
            id,
            registry: Some(registry),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn contains(&self, id: u64) -> bool {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .any(|(entry, _)| *entry == id)
    }

    /// Invoke `call` for every registered listener, in registration order.
    ///
    /// No lock is held while a listener runs.
    pub(crate) fn dispatch(&self, mut call: impl FnMut(&F)) {
        let round: Vec<(u64, Arc<F>)> = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for (id, listener) in round {
            if self.contains(id) {
                call(&listener);
            }
        }
    }
}

trait Unsubscribe: Send + Sync {
    fn remove(&self, id: u64);
}

impl<F: ?Sized + Send + Sync> Unsubscribe for Listeners<F> {
    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|(entry, _)| *entry != id);
    }
}

/// RAII handle for a registered listener.
///
/// Dropping the handle unsubscribes the listener. Use [`Subscription::detach`]
/// to keep the listener registered for the lifetime of the store.
#[must_use = "dropping a Subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    registry: Option<Weak<dyn Unsubscribe>>,
}

impl Subscription {
    /// Remove the listener. Calling this more than once is harmless.
    pub fn unsubscribe(&self) {
        if let Some(registry) = self.registry.as_ref().and_then(Weak::upgrade) {
            registry.remove(self.id);
        }
    }

    /// Keep the listener registered after this handle is dropped.
    pub fn detach(mut self) {
        self.registry = None;
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("detached", &self.registry.is_none())
            .finish()
    }
}
