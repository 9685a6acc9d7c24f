use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use super::merge::{MergePolicy, Next};
use crate::error::StoreResult;
use crate::snapshot::{SnapshotHolder, Subscription};

/// Bounds shared by every state type a store can hold.
pub trait State: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> State for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

struct Inner<T> {
    holder: SnapshotHolder<T>,
    policy: MergePolicy,
}

/// An in-memory state container with merge or replace updates.
///
/// The store's policy is decided once, at construction: key/value shaped
/// states merge updates into the snapshot, everything else is replaced.
/// Individual calls may override it with their `replace` flag.
///
/// Clones share the same snapshot and subscribers.
pub struct Store<T> {
    inner: Arc<Inner<T>>,
}

impl<T: State> Store<T> {
    /// Create a new store, inferring its policy from the shape of `initial`.
    pub fn new(initial: T) -> StoreResult<Self> {
        let shape = serde_json::to_value(&initial)?;
        Ok(Self::with_policy(initial, MergePolicy::infer(&shape)))
    }

    /// Create a new store with an explicit policy.
    pub fn with_policy(initial: T, policy: MergePolicy) -> Self {
        debug!(?policy, "creating store");
        Self {
            inner: Arc::new(Inner {
                holder: SnapshotHolder::new(initial),
                policy,
            }),
        }
    }

    /// The policy applied when a call does not pass its own `replace` flag.
    pub fn policy(&self) -> MergePolicy {
        self.inner.policy
    }

    /// Get the current snapshot.
    pub fn get_state(&self) -> Arc<T> {
        self.inner.holder.get()
    }

    /// Read state without cloning the snapshot handle.
    pub fn read<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&T) -> R,
    {
        f(self.inner.holder.get().as_ref())
    }

    /// Apply an update under the store's policy, or under the policy named
    /// by `replace` when given.
    ///
    /// Merge updates must be key/value patches; anything else is rejected
    /// and the snapshot is left untouched. Passing the current snapshot is a
    /// no-op under either policy.
    pub fn set_state(&self, next: impl Into<Next<T>>, replace: Option<bool>) -> StoreResult<()> {
        self.apply(next.into(), replace).map(|_| ())
    }

    /// Like [`Store::set_state`], reporting whether the snapshot changed.
    pub(crate) fn apply(&self, next: Next<T>, replace: Option<bool>) -> StoreResult<bool> {
        let prev = self.inner.holder.get();
        if let Next::Full(next) = &next {
            if Arc::ptr_eq(next, &prev) {
                return Ok(false);
            }
        }

        let policy = self.inner.policy.resolve(replace);
        let next = policy.apply(&prev, next)?;
        Ok(self.inner.holder.set(next))
    }

    /// Compute the update from the current snapshot, then apply it like
    /// [`Store::set_state`]. The updater runs exactly once.
    pub fn update<F>(&self, f: F, replace: Option<bool>) -> StoreResult<()>
    where
        F: FnOnce(&Arc<T>) -> Next<T>,
    {
        self.apply_with(f, replace).map(|_| ())
    }

    pub(crate) fn apply_with<F>(&self, f: F, replace: Option<bool>) -> StoreResult<bool>
    where
        F: FnOnce(&Arc<T>) -> Next<T>,
    {
        let prev = self.inner.holder.get();
        self.apply(f(&prev), replace)
    }

    /// Replace the snapshot. Passing the current snapshot is a no-op and
    /// returns `false`.
    pub fn replace(&self, next: Arc<T>) -> bool {
        self.inner.holder.set(next)
    }

    /// Edit a copy of the current state and replace the snapshot with it.
    pub fn mutate<F>(&self, f: F)
    where
        F: FnOnce(&mut T),
    {
        let mut state = (*self.inner.holder.get()).clone();
        f(&mut state);
        self.inner.holder.set(Arc::new(state));
    }

    /// Subscribe to state changes.
    ///
    /// The callback receives `(next, prev)` after every change, until the
    /// returned handle is dropped.
    pub fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Arc<T>, &Arc<T>) + Send + Sync + 'static,
    {
        self.inner.holder.subscribe(callback)
    }
}

impl<T> Clone for Store<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use serde::Deserialize;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct AppState {
        count: usize,
        name: String,
    }

    fn app_state() -> AppState {
        AppState {
            count: 0,
            name: "test".to_string(),
        }
    }

    #[test]
    fn object_state_defaults_to_merge() {
        let store = Store::new(app_state()).unwrap();
        assert_eq!(store.policy(), MergePolicy::Merge);

        store.set_state(json!({"count": 42}), None).unwrap();
        assert_eq!(store.get_state().count, 42);
        assert_eq!(store.get_state().name, "test");
    }

    #[test]
    fn scalar_state_defaults_to_replace() {
        let store = Store::new(5).unwrap();
        assert_eq!(store.policy(), MergePolicy::Replace);

        store.set_state(Next::value(9), None).unwrap();
        assert_eq!(*store.get_state(), 9);
    }

    #[test]
    fn store_update() {
        let store = Store::new(app_state()).unwrap();

        store
            .update(|state| Next::patch(json!({"count": state.count + 10})), None)
            .unwrap();

        assert_eq!(store.get_state().count, 10);
    }

    #[test]
    fn store_mutate() {
        let store = Store::new(app_state()).unwrap();
        let before = store.get_state();

        store.mutate(|state| state.count += 1);

        assert_eq!(before.count, 0);
        assert_eq!(store.get_state().count, 1);
    }

    #[test]
    fn replace_flag_overrides_merge() {
        let store = Store::new(app_state()).unwrap();

        let err = store.set_state(json!({"count": 1}), Some(true)).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
        assert_eq!(store.get_state().count, 0);

        store
            .set_state(json!({"count": 3, "name": "other"}), Some(true))
            .unwrap();
        assert_eq!(*store.get_state(), AppState { count: 3, name: "other".to_string() });
    }

    #[test]
    fn non_object_patch_is_rejected() {
        let store = Store::new(app_state()).unwrap();
        let err = store.set_state(json!("oops"), None).unwrap_err();
        assert!(matches!(err, StoreError::NonObjectPatch { kind: "string" }));
    }

    #[test]
    fn store_subscribe() {
        let store = Store::new(app_state()).unwrap();

        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let _sub = store.subscribe(move |_next, _prev| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(call_count.load(Ordering::SeqCst), 0);

        store.mutate(|state| state.count += 1);
        assert_eq!(call_count.load(Ordering::SeqCst), 1);

        // Merge always produces a new snapshot, even for an empty patch.
        store.set_state(json!({}), None).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 2);

        // Replacing with the current snapshot does not.
        store.replace(store.get_state());
        assert_eq!(call_count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn updater_returning_current_snapshot_is_silent() {
        let store = Store::new(1).unwrap();
        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();

        let _sub = store.subscribe(move |_, _| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        store.update(|prev| Next::Full(prev.clone()), None).unwrap();
        assert_eq!(call_count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn current_snapshot_is_silent_under_merge() {
        let store = Store::new(app_state()).unwrap();
        assert_eq!(store.policy(), MergePolicy::Merge);

        let call_count = Arc::new(AtomicUsize::new(0));
        let call_count_clone = call_count.clone();
        let _sub = store.subscribe(move |_, _| {
            call_count_clone.fetch_add(1, Ordering::SeqCst);
        });

        let before = store.get_state();
        store.update(|prev| Next::Full(prev.clone()), None).unwrap();
        store.set_state(store.get_state(), None).unwrap();
        store.set_state(store.get_state(), Some(false)).unwrap();

        assert_eq!(call_count.load(Ordering::SeqCst), 0);
        assert!(Arc::ptr_eq(&before, &store.get_state()));
    }

    #[test]
    fn clones_share_state() {
        let store = Store::new(app_state()).unwrap();
        let other = store.clone();

        other.mutate(|state| state.name = "shared".to_string());
        assert_eq!(store.read(|state| state.name.clone()), "shared");
    }
}
