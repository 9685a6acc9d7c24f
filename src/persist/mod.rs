//! Persistence for stores.
//!
//! A [`PersistentStore`] writes its state to a [`StateStorage`] as a
//! versioned JSON envelope after every update, and loads it back
//! ("hydrates") when it is created or when asked to. Stored state written
//! at another schema version goes through the configured migrate function,
//! or is discarded when there is none.

pub mod codec;
mod hydration;
mod options;
mod persistent;
mod storage;
mod worker;

pub use codec::{Decoded, PersistEnvelope};
pub use hydration::{FinishListener, HydrateListener, HydrationController, HydrationState};
pub use options::{
    BoxError, MergeFn, MigrateFn, OnRehydrateFn, PartializeFn, PersistOptions, PostRehydrateFn,
};
pub use persistent::PersistentStore;
pub use storage::{FileStorage, MemoryStorage, StateStorage, StorageSource};
