//! Snapshot storage and change notification.
//!
//! Every store in this crate is built over a [`SnapshotHolder`]: it owns the
//! current immutable snapshot and the ordered list of subscribers.

mod holder;
mod listeners;

pub use holder::{Listener, SnapshotHolder};
pub(crate) use listeners::Listeners;
pub use listeners::Subscription;
