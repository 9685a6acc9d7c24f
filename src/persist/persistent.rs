use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use super::codec;
use super::hydration::{HydrationController, HydrationState};
use super::options::{PersistOptions, PostRehydrateFn};
use super::worker::StorageWorker;
use crate::error::{json_kind, StoreError, StoreResult};
use crate::snapshot::Subscription;
use crate::store::{MergePolicy, Next, State, Store};

struct Inner<T> {
    store: Store<T>,
    options: PersistOptions<T>,
    storage: StorageWorker,
    hydration: HydrationController<T>,
    /// Cleared while `skip_hydration` holds off writes until the first
    /// successful hydration, so defaults never overwrite stored state.
    writes_enabled: AtomicBool,
}

/// A key/value store whose state is persisted to a [`StateStorage`].
///
/// Every update is written to storage after the in-memory snapshot has
/// changed and subscribers have been notified; write failures are logged
/// and never undo the update. Unless `skip_hydration` is set, the stored
/// state is loaded in the background as soon as the store is created.
///
/// Clones share the same state, storage worker and hydration state.
///
/// [`StateStorage`]: super::StateStorage
pub struct PersistentStore<T> {
    inner: Arc<Inner<T>>,
}

impl<T: State> PersistentStore<T> {
    /// Create a persisted store and start hydrating it.
    ///
    /// `initial` must serialize to a key/value mapping; anything else is
    /// rejected before storage is touched. Must be called from within a
    /// Tokio runtime.
    pub fn new(initial: T, options: impl Into<PersistOptions<T>>) -> StoreResult<Self> {
        let options = options.into();

        let shape = serde_json::to_value(&initial)?;
        if !shape.is_object() {
            return Err(StoreError::NonObjectInitialState {
                name: options.name.clone(),
                kind: json_kind(&shape),
            });
        }

        let runtime = Handle::try_current().map_err(|_| StoreError::NoRuntime)?;
        let policy = options
            .replace
            .map(MergePolicy::from_replace_flag)
            .unwrap_or(MergePolicy::Merge);
        let storage = StorageWorker::spawn(&runtime, options.storage.resolve());
        let skip_hydration = options.skip_hydration;

        debug!(name = %options.name, version = options.version, skip_hydration, "creating persisted store");
        let store = Self {
            inner: Arc::new(Inner {
                store: Store::with_policy(initial, policy),
                storage,
                hydration: HydrationController::new(),
                writes_enabled: AtomicBool::new(!skip_hydration),
                options,
            }),
        };

        if !skip_hydration {
            let post = store.inner.begin_hydration();
            let inner = Arc::clone(&store.inner);
            runtime.spawn(async move {
                let _ = inner.complete_hydration(post).await;
            });
        }

        Ok(store)
    }

    /// Storage key of the store.
    pub fn name(&self) -> &str {
        &self.inner.options.name
    }

    /// Schema version written with every envelope.
    pub fn version(&self) -> u32 {
        self.inner.options.version
    }

    /// The policy applied when a call does not pass its own `replace` flag.
    pub fn policy(&self) -> MergePolicy {
        self.inner.store.policy()
    }

    /// Get the current snapshot.
    pub fn get_state(&self) -> Arc<T> {
        self.inner.store.get_state()
    }

    /// Read state without cloning the snapshot handle.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        self.inner.store.read(f)
    }

    /// Apply an update (see [`Store::set_state`]) and persist the result.
    /// Passing the current snapshot neither notifies nor writes.
    pub fn set_state(&self, next: impl Into<Next<T>>, replace: Option<bool>) -> StoreResult<()> {
        if self.inner.store.apply(next.into(), replace)? {
            self.inner.persist();
        }
        Ok(())
    }

    /// Compute the update from the current snapshot and persist the result.
    pub fn update<F>(&self, f: F, replace: Option<bool>) -> StoreResult<()>
    where
        F: FnOnce(&Arc<T>) -> Next<T>,
    {
        if self.inner.store.apply_with(f, replace)? {
            self.inner.persist();
        }
        Ok(())
    }

    /// Replace the snapshot and persist it. Passing the current snapshot is
    /// a no-op and returns `false`.
    pub fn replace(&self, next: Arc<T>) -> bool {
        let changed = self.inner.store.replace(next);
        if changed {
            self.inner.persist();
        }
        changed
    }

    /// Edit a copy of the current state, replace the snapshot with it and
    /// persist it.
    pub fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        self.inner.store.mutate(f);
        self.inner.persist();
    }

    /// Subscribe to state changes with a `(next, prev)` callback.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<T>, &Arc<T>) + Send + Sync + 'static,
    {
        self.inner.store.subscribe(callback)
    }

    /// Load the stored state again.
    ///
    /// Resolves with the hydrated state, or with the error that finish
    /// listeners were given. A run that resolves after a newer one still
    /// writes its result.
    pub async fn rehydrate(&self) -> StoreResult<Arc<T>> {
        let post = self.inner.begin_hydration();
        self.inner.complete_hydration(post).await
    }

    /// `true` once a hydration run has succeeded and none is in flight.
    pub fn has_hydrated(&self) -> bool {
        self.inner.hydration.has_hydrated()
    }

    /// Current position in the hydration state machine.
    pub fn hydration_state(&self) -> HydrationState {
        self.inner.hydration.state()
    }

    /// Wait for the in-flight hydration run, if any, to finish.
    pub async fn wait_for_hydration(&self) -> HydrationState {
        self.inner.hydration.wait().await
    }

    /// Register a listener for the start of every hydration run.
    pub fn on_hydrate<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&Arc<T>) + Send + Sync + 'static,
    {
        self.inner.hydration.on_hydrate(listener)
    }

    /// Register a listener for the end of every hydration run.
    pub fn on_finish_hydration<F>(&self, listener: F) -> Subscription
    where
        F: Fn(Result<&Arc<T>, &StoreError>) + Send + Sync + 'static,
    {
        self.inner.hydration.on_finish_hydration(listener)
    }

    /// Remove the stored state. The in-memory state and hydration state are
    /// left as they are.
    pub async fn clear_storage(&self) -> StoreResult<()> {
        self.inner.storage.remove_item(&self.inner.options.name).await
    }

    /// Wait until every write issued so far has reached storage.
    pub async fn flush(&self) -> StoreResult<()> {
        self.inner.storage.flush().await
    }
}

impl<T: State> Inner<T> {
    fn encode(&self, state: &T) -> StoreResult<String> {
        let projected = match &self.options.partialize {
            Some(partialize) => partialize(state)?,
            None => serde_json::to_value(state)?,
        };
        codec::serialize(projected, self.options.version)
    }

    /// Queue a write of the current state.
    fn persist(&self) {
        if !self.writes_enabled.load(Ordering::SeqCst) {
            return;
        }

        let state = self.store.get_state();
        let queued = self
            .encode(&state)
            .and_then(|payload| self.storage.set_item_detached(&self.options.name, payload));
        if let Err(e) = queued {
            warn!(name = %self.options.name, error = %e, "failed to persist state");
        }
    }

    /// Synchronous half of a hydration run: enter `Hydrating`, notify start
    /// listeners and run the rehydrate hook.
    fn begin_hydration(&self) -> Option<PostRehydrateFn<T>> {
        let current = self.store.get_state();
        self.hydration.begin(&current);
        self.options
            .on_rehydrate_storage
            .as_ref()
            .and_then(|hook| hook(&current))
    }

    async fn complete_hydration(&self, post: Option<PostRehydrateFn<T>>) -> StoreResult<Arc<T>> {
        match self.load().await {
            Ok(loaded) => {
                if let Some(post) = post {
                    post(Ok(&loaded));
                }
                self.writes_enabled.store(true, Ordering::SeqCst);
                let state = self.store.get_state();
                self.hydration.finish(Ok(&state));
                Ok(state)
            }
            Err(e) => {
                warn!(name = %self.options.name, error = %e, "hydration failed");
                if let Some(post) = post {
                    post(Err(&e));
                }
                self.hydration.finish(Err(&e));
                Err(e)
            }
        }
    }

    async fn load(&self) -> StoreResult<Arc<T>> {
        let name = &self.options.name;
        let raw = self.storage.get_item(name).await?;
        let decoded =
            codec::deserialize(raw.as_deref(), self.options.version, self.options.migrate.as_ref()).await?;
        let migrated = decoded.is_migrated();

        let current = self.store.get_state();
        let merged = match &self.options.merge {
            Some(merge) => merge(decoded.into_state(), &current)?,
            None => codec::merge_persisted(decoded.into_state(), &current)?,
        };
        self.store.replace(Arc::new(merged));

        let state = self.store.get_state();
        if migrated {
            let payload = self.encode(&state)?;
            self.storage.set_item(name, payload).await?;
            debug!(%name, version = self.options.version, "re-persisted migrated state");
        }
        Ok(state)
    }
}

impl<T: State> fmt::Debug for PersistentStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistentStore")
            .field("name", &self.inner.options.name)
            .field("version", &self.inner.options.version)
            .field("hydration", &self.inner.hydration.state())
            .finish_non_exhaustive()
    }
}

impl<T> Clone for PersistentStore<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persist::{MemoryStorage, StateStorage};
    use serde::{Deserialize, Serialize};
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Prefs {
        theme: String,
        font_size: u32,
    }

    fn prefs() -> Prefs {
        Prefs {
            theme: "light".to_string(),
            font_size: 12,
        }
    }

    async fn stored(storage: &MemoryStorage, name: &str) -> Option<serde_json::Value> {
        storage
            .get_item(name)
            .await
            .unwrap()
            .map(|raw| serde_json::from_str(&raw).unwrap())
    }

    #[tokio::test]
    async fn hydrates_from_storage_on_creation() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_item("prefs", r#"{"state":{"theme":"dark"},"version":0}"#.to_string())
            .await
            .unwrap();

        let store = PersistentStore::new(prefs(), PersistOptions::new("prefs").storage(storage.clone())).unwrap();
        assert_eq!(store.wait_for_hydration().await, HydrationState::Hydrated);

        assert_eq!(store.get_state().theme, "dark");
        assert_eq!(store.get_state().font_size, 12);
    }

    #[tokio::test]
    async fn updates_are_written_to_storage() {
        let storage = Arc::new(MemoryStorage::new());
        let store = PersistentStore::new(prefs(), PersistOptions::new("prefs").storage(storage.clone())).unwrap();
        store.wait_for_hydration().await;

        store.set_state(json!({"font_size": 14}), None).unwrap();
        store.flush().await.unwrap();

        assert_eq!(
            stored(&storage, "prefs").await,
            Some(json!({"state": {"theme": "light", "font_size": 14}, "version": 0}))
        );
    }

    #[tokio::test]
    async fn partialize_limits_what_is_written() {
        let storage = Arc::new(MemoryStorage::new());
        let options = PersistOptions::new("prefs")
            .storage(storage.clone())
            .version(3)
            .partialize(|state: &Prefs| json!({"theme": state.theme}));
        let store = PersistentStore::new(prefs(), options).unwrap();
        store.wait_for_hydration().await;

        store.mutate(|state| state.font_size = 20);
        store.flush().await.unwrap();

        assert_eq!(
            stored(&storage, "prefs").await,
            Some(json!({"state": {"theme": "light"}, "version": 3}))
        );
        assert_eq!(store.get_state().font_size, 20);
    }

    #[tokio::test]
    async fn scalar_initial_state_is_rejected() {
        let err = PersistentStore::new(5, "number").unwrap_err();
        assert!(matches!(
            err,
            StoreError::NonObjectInitialState { kind: "number", .. }
        ));
    }

    #[tokio::test]
    async fn debug_shows_name_and_hydration() {
        let storage = Arc::new(MemoryStorage::new());
        let store = PersistentStore::new(prefs(), PersistOptions::new("prefs").storage(storage).version(4)).unwrap();
        store.wait_for_hydration().await;

        let debug = format!("{store:?}");
        assert!(debug.contains("\"prefs\""));
        assert!(debug.contains("version: 4"));
        assert!(debug.contains("Hydrated"));
    }

    #[test]
    fn requires_a_runtime() {
        let err = PersistentStore::new(prefs(), "prefs").unwrap_err();
        assert!(matches!(err, StoreError::NoRuntime));
    }

    #[tokio::test]
    async fn skip_hydration_defers_load_and_writes() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_item("prefs", r#"{"state":{"theme":"dark"},"version":0}"#.to_string())
            .await
            .unwrap();

        let store = PersistentStore::new(
            prefs(),
            PersistOptions::new("prefs").storage(storage.clone()).skip_hydration(true),
        )
        .unwrap();
        assert_eq!(store.hydration_state(), HydrationState::Idle);

        store.set_state(json!({"font_size": 30}), None).unwrap();
        store.flush().await.unwrap();
        assert_eq!(
            stored(&storage, "prefs").await,
            Some(json!({"state": {"theme": "dark"}, "version": 0}))
        );

        let state = store.rehydrate().await.unwrap();
        assert_eq!(state.theme, "dark");
        assert_eq!(state.font_size, 30);
        assert!(store.has_hydrated());

        store.set_state(json!({"font_size": 31}), None).unwrap();
        store.flush().await.unwrap();
        assert_eq!(
            stored(&storage, "prefs").await,
            Some(json!({"state": {"theme": "dark", "font_size": 31}, "version": 0}))
        );
    }

    #[tokio::test]
    async fn rehydrate_hook_sees_start_and_end() {
        let storage = Arc::new(MemoryStorage::new());
        let started = Arc::new(AtomicUsize::new(0));
        let ended = Arc::new(AtomicUsize::new(0));

        let started_clone = started.clone();
        let ended_clone = ended.clone();
        let options = PersistOptions::new("prefs")
            .storage(storage.clone())
            .skip_hydration(true)
            .on_rehydrate_storage(move |_current: &Arc<Prefs>| {
                started_clone.fetch_add(1, Ordering::SeqCst);
                let ended = ended_clone.clone();
                Some(Box::new(move |outcome: Result<&Arc<Prefs>, &StoreError>| {
                    assert!(outcome.is_ok());
                    ended.fetch_add(1, Ordering::SeqCst);
                }) as PostRehydrateFn<Prefs>)
            });
        let store = PersistentStore::new(prefs(), options).unwrap();

        store.rehydrate().await.unwrap();
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(ended.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn custom_merge_is_used() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .set_item("prefs", r#"{"state":{"theme":"dark","font_size":99},"version":0}"#.to_string())
            .await
            .unwrap();

        // Keep the in-memory font size, take only the stored theme.
        let options = PersistOptions::new("prefs")
            .storage(storage.clone())
            .merge(|persisted: Option<serde_json::Value>, current: &Arc<Prefs>| {
                let mut next = current.as_ref().clone();
                if let Some(theme) = persisted.as_ref().and_then(|p| p["theme"].as_str()) {
                    next.theme = theme.to_string();
                }
                Ok(next)
            });
        let store = PersistentStore::new(prefs(), options).unwrap();
        store.wait_for_hydration().await;

        assert_eq!(*store.get_state(), Prefs { theme: "dark".to_string(), font_size: 12 });
    }
}
