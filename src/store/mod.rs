//! In-memory stores.
//!
//! A [`Store`] wraps a snapshot holder with a [`MergePolicy`] deciding
//! whether updates are shallow-merged into the snapshot or replace it.

mod merge;
mod store;

pub(crate) use merge::shallow_merge;
pub use merge::{MergePolicy, Next};
pub use store::{State, Store};
