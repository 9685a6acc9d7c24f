/// Errors raised by a storage backend.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// I/O error from the underlying medium.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Backend-specific failure.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Errors from store construction, updates and persistence.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A persisted object store was given an initial state that is not a
    /// key/value mapping.
    #[error("persisted store `{name}` requires a plain object initial state, got {kind}")]
    NonObjectInitialState { name: String, kind: &'static str },

    /// A merge update was given a patch that is not a key/value mapping.
    #[error("merge update requires an object patch, got {kind}")]
    NonObjectPatch { kind: &'static str },

    /// Encoding or decoding a state value failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The storage backend failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A migration function rejected the persisted state.
    #[error("migration from version {from} to {to} failed: {reason}")]
    Migration { from: u32, to: u32, reason: String },

    /// Persisted stores host their storage worker on a Tokio runtime.
    #[error("persisted stores must be created inside a Tokio runtime")]
    NoRuntime,

    /// The storage worker has shut down.
    #[error("storage worker is closed")]
    WorkerClosed,
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Name of a JSON value's shape, for error messages.
pub(crate) fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "boolean",
        serde_json::Value::Number(_) => "number",
        serde_json::Value::String(_) => "string",
        serde_json::Value::Array(_) => "array",
        serde_json::Value::Object(_) => "object",
    }
}
