//! Persisted single-value stores.
//!
//! A [`SignalStore`] holds one value of any type (number, string, list...)
//! and persists it like an object store by wrapping it in a one-field
//! object.

mod signal;

pub use signal::{SignalOptions, SignalStore};
