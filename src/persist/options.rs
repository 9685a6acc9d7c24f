use std::fmt;
use std::future::Future;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Serialize;
use serde_json::Value;

use super::storage::{StateStorage, StorageSource};
use crate::error::{StoreError, StoreResult};

/// Error type migrate functions may fail with.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Upgrades a persisted state from the version it was stored at.
pub type MigrateFn = Arc<dyn Fn(Value, u32) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;

/// Projects the state onto the part that is written to storage.
pub type PartializeFn<T> = Arc<dyn Fn(&T) -> StoreResult<Value> + Send + Sync>;

/// Reconciles loaded state (if any) with the state in memory.
pub type MergeFn<T> = Arc<dyn Fn(Option<Value>, &Arc<T>) -> StoreResult<T> + Send + Sync>;

/// Called once a hydration run finishes, with its outcome.
pub type PostRehydrateFn<T> = Box<dyn FnOnce(Result<&Arc<T>, &StoreError>) + Send>;

/// Called when a hydration run starts; may return a callback for its end.
pub type OnRehydrateFn<T> = Arc<dyn Fn(&Arc<T>) -> Option<PostRehydrateFn<T>> + Send + Sync>;

/// Configuration of a persisted store.
///
/// Only `name` is required. A bare name converts into options with every
/// other setting at its default.
pub struct PersistOptions<T> {
    pub(crate) name: String,
    pub(crate) replace: Option<bool>,
    pub(crate) storage: StorageSource,
    pub(crate) partialize: Option<PartializeFn<T>>,
    pub(crate) on_rehydrate_storage: Option<OnRehydrateFn<T>>,
    pub(crate) version: u32,
    pub(crate) migrate: Option<MigrateFn>,
    pub(crate) merge: Option<MergeFn<T>>,
    pub(crate) skip_hydration: bool,
}

impl<T: 'static> PersistOptions<T> {
    /// Options for a store persisted under `name`, a key that should be
    /// unique within its storage.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            replace: None,
            storage: StorageSource::default(),
            partialize: None,
            on_rehydrate_storage: None,
            version: 0,
            migrate: None,
            merge: None,
            skip_hydration: false,
        }
    }

    /// Make updates replace the state (`true`) or merge into it (`false`,
    /// the default).
    pub fn replace(mut self, replace: bool) -> Self {
        self.replace = Some(replace);
        self
    }

    /// Use a fixed storage instead of [`MemoryStorage::global`](super::MemoryStorage::global).
    pub fn storage(mut self, storage: impl Into<StorageSource>) -> Self {
        self.storage = storage.into();
        self
    }

    /// Use a storage built by `factory` when the store is created.
    pub fn storage_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Arc<dyn StateStorage> + Send + Sync + 'static,
    {
        self.storage = StorageSource::factory(factory);
        self
    }

    /// Only persist the part of the state `f` selects. The in-memory state
    /// is unaffected.
    pub fn partialize<F, P>(mut self, f: F) -> Self
    where
        F: Fn(&T) -> P + Send + Sync + 'static,
        P: Serialize,
    {
        self.partialize = Some(Arc::new(move |state: &T| -> StoreResult<Value> {
            Ok(serde_json::to_value(f(state))?)
        }));
        self
    }

    /// Hook run at the start of every hydration. The callback it returns,
    /// if any, runs when that hydration finishes.
    pub fn on_rehydrate_storage<F>(mut self, f: F) -> Self
    where
        F: Fn(&Arc<T>) -> Option<PostRehydrateFn<T>> + Send + Sync + 'static,
    {
        self.on_rehydrate_storage = Some(Arc::new(f));
        self
    }

    /// Schema version written with every envelope. Defaults to 0.
    pub fn version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Upgrade stored state written at another version.
    ///
    /// Without a migrate function, state stored at another version is
    /// discarded and the initial state is kept.
    pub fn migrate<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Value, u32) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.migrate = Some(Arc::new(move |state, version| f(state, version).boxed()));
        self
    }

    /// Replace the default reconciliation of loaded and in-memory state.
    pub fn merge<F>(mut self, f: F) -> Self
    where
        F: Fn(Option<Value>, &Arc<T>) -> StoreResult<T> + Send + Sync + 'static,
    {
        self.merge = Some(Arc::new(f));
        self
    }

    /// Do not hydrate when the store is created; call `rehydrate` instead.
    pub fn skip_hydration(mut self, skip: bool) -> Self {
        self.skip_hydration = skip;
        self
    }

    /// Storage key of the store.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: 'static> From<&str> for PersistOptions<T> {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl<T: 'static> From<String> for PersistOptions<T> {
    fn from(name: String) -> Self {
        Self::new(name)
    }
}

impl<T> fmt::Debug for PersistOptions<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistOptions")
            .field("name", &self.name)
            .field("replace", &self.replace)
            .field("storage", &self.storage)
            .field("version", &self.version)
            .field("partialize", &self.partialize.is_some())
            .field("migrate", &self.migrate.is_some())
            .field("merge", &self.merge.is_some())
            .field("skip_hydration", &self.skip_hydration)
            .finish()
    }
}
