//! # Larder
//!
//! Small reactive state containers with optional versioned persistence.
//!
//! ## Stores
//!
//! - [`Store<T>`] - In-memory state with `(next, prev)` subscriptions
//! - [`PersistentStore<T>`] - A key/value store saved to a [`StateStorage`]
//!   and loaded back ("hydrated") on creation
//! - [`SignalStore<T>`] - A persisted single value of any type
//!
//! ## Updates
//!
//! Updates are either shallow-merged into the snapshot or replace it, as
//! decided by a [`MergePolicy`]. Stores whose initial state is a key/value
//! mapping merge by default; every other store replaces. Any single call can
//! override that with its `replace` flag.
//!
//! Snapshots are immutable `Arc<T>` values: an update swaps in a new
//! snapshot and notifies subscribers synchronously, in registration order.
//! Swapping in the snapshot that is already current notifies no one.
//!
//! ## Read-only fields
//!
//! There is no runtime distinction between writable and derived fields.
//! Keep derived values out of the state type and compute them from the
//! snapshot with methods on `T`.
//!
//! ```
//! use larder::{Next, Store};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Counter {
//!     count: u32,
//!     label: String,
//! }
//!
//! let store = Store::new(Counter { count: 0, label: "clicks".into() }).unwrap();
//! store.set_state(serde_json::json!({ "count": 1 }), None).unwrap();
//! store
//!     .update(|prev| Next::patch(serde_json::json!({ "count": prev.count + 1 })), None)
//!     .unwrap();
//! assert_eq!(store.get_state().count, 2);
//! assert_eq!(store.get_state().label, "clicks");
//! ```

pub mod error;
pub mod persist;
pub mod signal;
pub mod snapshot;
pub mod store;

// Re-export main types for convenience
pub use error::{StorageError, StoreError, StoreResult};
pub use persist::{
    FileStorage, HydrationState, MemoryStorage, PersistOptions, PersistentStore, StateStorage,
    StorageSource,
};
pub use signal::{SignalOptions, SignalStore};
pub use snapshot::{SnapshotHolder, Subscription};
pub use store::{MergePolicy, Next, State, Store};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn it_works() {
        // Basic smoke test
        let store = Store::new(0).unwrap();
        assert_eq!(*store.get_state(), 0);
        store.set_state(Next::value(42), None).unwrap();
        assert_eq!(*store.get_state(), 42);
    }
}
