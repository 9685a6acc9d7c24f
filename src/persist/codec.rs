//! Versioned envelope encoding for persisted state.
//!
//! Wire format: `{"state": <state>, "version": <integer>}` as UTF-8 JSON,
//! stored under the store's name.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Number, Value};
use tracing::{debug, error};

use super::options::MigrateFn;
use crate::error::{StoreError, StoreResult};
use crate::store::{shallow_merge, State};

/// The unit written to storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistEnvelope {
    pub state: Value,
    /// Envelopes without a version are treated as current. Any JSON number
    /// is accepted when reading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<Number>,
}

/// Outcome of decoding a stored blob.
#[derive(Debug, Clone, PartialEq)]
pub enum Decoded {
    /// Nothing usable is stored.
    Missing,
    /// The stored state is at the expected version.
    Current(Value),
    /// The stored state was migrated to the expected version and should be
    /// written back.
    Migrated(Value),
    /// The stored state was at another version and could not be migrated,
    /// either because no migration was configured or because the stored
    /// version is not a `u32`; it is dropped.
    Discarded { stored_version: Number },
}

impl Decoded {
    /// The state to hydrate from, if any.
    pub fn into_state(self) -> Option<Value> {
        match self {
            Decoded::Current(state) | Decoded::Migrated(state) => Some(state),
            Decoded::Missing | Decoded::Discarded { .. } => None,
        }
    }

    pub fn is_migrated(&self) -> bool {
        matches!(self, Decoded::Migrated(_))
    }
}

/// Encode `state` at `version`.
pub fn serialize(state: Value, version: u32) -> StoreResult<String> {
    let envelope = PersistEnvelope {
        state,
        version: Some(Number::from(version)),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a stored blob, migrating it when its version differs from
/// `expected`.
pub async fn deserialize(
    raw: Option<&str>,
    expected: u32,
    migrate: Option<&MigrateFn>,
) -> StoreResult<Decoded> {
    let Some(raw) = raw else {
        return Ok(Decoded::Missing);
    };
    let Some(envelope) = serde_json::from_str::<Option<PersistEnvelope>>(raw)? else {
        return Ok(Decoded::Missing);
    };

    let Some(number) = envelope.version else {
        return Ok(Decoded::Current(envelope.state));
    };
    let stored = number.as_u64().and_then(|v| u32::try_from(v).ok());

    match stored {
        Some(stored) if stored == expected => Ok(Decoded::Current(envelope.state)),
        Some(stored) => match migrate {
            Some(migrate) => {
                debug!(from = stored, to = expected, "migrating persisted state");
                let state = migrate(envelope.state, stored).await.map_err(|e| StoreError::Migration {
                    from: stored,
                    to: expected,
                    reason: e.to_string(),
                })?;
                Ok(Decoded::Migrated(state))
            }
            None => {
                error!(
                    stored_version = stored,
                    expected_version = expected,
                    "persisted state could not be migrated since no migrate function was provided"
                );
                Ok(Decoded::Discarded {
                    stored_version: number,
                })
            }
        },
        None => {
            error!(
                stored_version = %number,
                expected_version = expected,
                "persisted state has a version that cannot be migrated"
            );
            Ok(Decoded::Discarded {
                stored_version: number,
            })
        }
    }
}

/// Default reconciliation of loaded state with the in-memory state.
///
/// Key/value persisted state is shallow-merged over `current`; any other
/// persisted value replaces it. With nothing persisted, `current` is kept.
pub fn merge_persisted<T: State>(persisted: Option<Value>, current: &Arc<T>) -> StoreResult<T> {
    match persisted {
        None => Ok(current.as_ref().clone()),
        Some(patch @ Value::Object(_)) => shallow_merge(current.as_ref(), patch),
        Some(other) => Ok(serde_json::from_value(other)?),
    }
}
