use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::persist::{HydrationState, PersistOptions, PersistentStore, StorageSource};
use crate::snapshot::Subscription;
use crate::store::State;

/// How a signal's value is laid out inside its store and in storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Slot<T> {
    value: T,
}

/// Configuration of a [`SignalStore`].
#[derive(Debug, Clone)]
pub struct SignalOptions {
    name: String,
    storage: StorageSource,
    version: u32,
}

impl SignalOptions {
    /// Options for a signal persisted under `name` in the default storage,
    /// at version 0.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            storage: StorageSource::default(),
            version: 0,
        }
    }

    /// Use this storage instead of the process-wide default.
    pub fn storage(mut self, storage: impl Into<StorageSource>) -> Self {
        self.storage = storage.into();
        self
    }

    /// Schema version written with the value.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }
}

impl From<&str> for SignalOptions {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SignalOptions {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

/// A persisted store holding a single value of any type.
///
/// The value is stored as `{"value": ...}` so it goes through the same
/// envelope and hydration as object stores. Writes always replace the
/// value, and writing a value equal to the current one does nothing: no
/// notification, no storage write.
pub struct SignalStore<T> {
    store: PersistentStore<Slot<T>>,
}

impl<T: State + PartialEq> SignalStore<T> {
    /// Create a persisted signal and start hydrating it.
    pub fn new(initial: T, options: impl Into<SignalOptions>) -> StoreResult<Self> {
        let options = options.into();
        let persist = PersistOptions::new(options.name)
            .storage(options.storage)
            .version(options.version)
            .replace(true);

        Ok(Self {
            store: PersistentStore::new(Slot { value: initial }, persist)?,
        })
    }

    /// Get a clone of the current value.
    pub fn get(&self) -> T {
        self.store.read(|slot| slot.value.clone())
    }

    /// Read the value with a function without cloning.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.store.read(|slot| f(&slot.value))
    }

    /// Set a new value. Equal values are ignored.
    pub fn set(&self, value: T) {
        if self.store.read(|slot| slot.value == value) {
            return;
        }
        self.store.replace(Arc::new(Slot { value }));
    }

    /// Compute the new value from the current one, then [`set`](Self::set)
    /// it. The function runs exactly once.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        let next = self.store.read(|slot| f(&slot.value));
        self.set(next);
    }

    /// Subscribe to changes with a `(next, prev)` callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&T, &T) + Send + Sync + 'static,
    {
        self.store
            .subscribe(move |next, prev| callback(&next.value, &prev.value))
    }

    /// Storage key of the signal.
    pub fn name(&self) -> &str {
        self.store.name()
    }

    /// Load the stored value again.
    pub async fn rehydrate(&self) -> StoreResult<T> {
        let slot = self.store.rehydrate().await?;
        Ok(slot.value.clone())
    }

    /// `true` once a hydration run has succeeded and none is in flight.
    pub fn has_hydrated(&self) -> bool {
        self.store.has_hydrated()
    }

    /// Current position in the hydration state machine.
    pub fn hydration_state(&self) -> HydrationState {
        self.store.hydration_state()
    }

    /// Wait for the in-flight hydration run, if any, to finish.
    pub async fn wait_for_hydration(&self) -> HydrationState {
        self.store.wait_for_hydration().await
    }

    /// Register a listener for the start of every hydration run.
    pub fn on_hydrate<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&T) + Send + Sync + 'static,
    {
        self.store.on_hydrate(move |slot| listener(&slot.value))
    }

    /// Register a listener for the end of every hydration run.
    pub fn on_finish_hydration<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Result<&T, &StoreError>) + Send + Sync + 'static,
    {
        self.store
            .on_finish_hydration(move |outcome| listener(outcome.map(|slot| &slot.value)))
    }

    /// Remove the stored value, keeping the in-memory one.
    pub async fn clear_storage(&self) -> StoreResult<()> {
        self.store.clear_storage().await
    }

    /// Wait until every write issued so far has reached storage.
    pub async fn flush(&self) -> StoreResult<()> {
        self.store.flush().await
    }
}

impl<T: State + PartialEq> fmt::Debug for SignalStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalStore")
            .field("name", &self.store.name())
            .field("version", &self.store.version())
            .field("hydration", &self.store.hydration_state())
            .finish_non_exhaustive()
    }
}

impl<T> Clone for SignalStore<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}
