use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{json_kind, StoreError, StoreResult};

/// How an update is combined with the current snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MergePolicy {
    /// Shallow merge: the update's top-level keys overwrite the snapshot's.
    Merge,
    /// The update replaces the snapshot wholesale.
    Replace,
}

impl MergePolicy {
    /// Structural default for a state shape: key/value mappings merge,
    /// everything else is replaced.
    pub fn infer(shape: &Value) -> Self {
        if shape.is_object() {
            MergePolicy::Merge
        } else {
            MergePolicy::Replace
        }
    }

    /// Policy named by a `replace` flag.
    pub fn from_replace_flag(replace: bool) -> Self {
        if replace {
            MergePolicy::Replace
        } else {
            MergePolicy::Merge
        }
    }

    /// Resolve the policy for a single call: an explicit per-call flag wins
    /// over the store's own policy.
    pub fn resolve(self, replace: Option<bool>) -> Self {
        replace.map(Self::from_replace_flag).unwrap_or(self)
    }

    /// Combine `prev` with `next` under this policy.
    pub fn apply<T>(self, prev: &Arc<T>, next: Next<T>) -> StoreResult<Arc<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        match (self, next) {
            (MergePolicy::Replace, Next::Full(state)) => Ok(state),
            (MergePolicy::Replace, Next::Patch(value)) => Ok(Arc::new(serde_json::from_value(value)?)),
            (MergePolicy::Merge, Next::Full(state)) => {
                let patch = serde_json::to_value(&*state)?;
                shallow_merge(prev.as_ref(), patch).map(Arc::new)
            }
            (MergePolicy::Merge, Next::Patch(patch)) => shallow_merge(prev.as_ref(), patch).map(Arc::new),
        }
    }
}

/// The value handed to a store update.
#[derive(Debug)]
pub enum Next<T> {
    /// A complete state value.
    Full(Arc<T>),
    /// A JSON patch (under merge) or a complete state written as JSON
    /// (under replace).
    Patch(Value),
}

impl<T> Next<T> {
    /// Wrap a complete state value.
    pub fn value(state: T) -> Self {
        Next::Full(Arc::new(state))
    }

    /// Wrap a JSON patch.
    pub fn patch(patch: Value) -> Self {
        Next::Patch(patch)
    }
}

impl<T> From<Arc<T>> for Next<T> {
    fn from(state: Arc<T>) -> Self {
        Next::Full(state)
    }
}

impl<T> From<Value> for Next<T> {
    fn from(patch: Value) -> Self {
        Next::Patch(patch)
    }
}

/// Overwrite the top-level keys of `base` with those of `patch` and decode
/// the result. Nested values are replaced, never merged.
pub(crate) fn shallow_merge<T>(base: &T, patch: Value) -> StoreResult<T>
where
    T: Serialize + DeserializeOwned,
{
    let patch = match patch {
        Value::Object(map) => map,
        other => {
            return Err(StoreError::NonObjectPatch {
                kind: json_kind(&other),
            })
        }
    };

    let mut merged = match serde_json::to_value(base)? {
        Value::Object(map) => map,
        _ => Map::new(),
    };
    merged.extend(patch);

    Ok(serde_json::from_value(Value::Object(merged))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        age: u32,
        tags: Vec<String>,
    }

    fn profile() -> Arc<Profile> {
        Arc::new(Profile {
            name: "ada".to_string(),
            age: 36,
            tags: vec!["math".to_string()],
        })
    }

    #[test]
    fn infer_from_shape() {
        assert_eq!(MergePolicy::infer(&json!({"a": 1})), MergePolicy::Merge);
        assert_eq!(MergePolicy::infer(&json!([1, 2])), MergePolicy::Replace);
        assert_eq!(MergePolicy::infer(&json!(3)), MergePolicy::Replace);
        assert_eq!(MergePolicy::infer(&Value::Null), MergePolicy::Replace);
    }

    #[test]
    fn per_call_flag_wins() {
        assert_eq!(MergePolicy::Merge.resolve(Some(true)), MergePolicy::Replace);
        assert_eq!(MergePolicy::Replace.resolve(Some(false)), MergePolicy::Merge);
        assert_eq!(MergePolicy::Merge.resolve(None), MergePolicy::Merge);
    }

    #[test]
    fn merge_keeps_untouched_keys() {
        let next = MergePolicy::Merge
            .apply(&profile(), Next::patch(json!({"age": 37})))
            .unwrap();
        assert_eq!(next.name, "ada");
        assert_eq!(next.age, 37);
        assert_eq!(next.tags, vec!["math".to_string()]);
    }

    #[test]
    fn merge_replaces_nested_values_wholesale() {
        let next = MergePolicy::Merge
            .apply(&profile(), Next::patch(json!({"tags": ["logic"]})))
            .unwrap();
        assert_eq!(next.tags, vec!["logic".to_string()]);
    }

    #[test]
    fn merge_rejects_non_object_patch() {
        let err = MergePolicy::Merge
            .apply(&profile(), Next::patch(json!(5)))
            .unwrap_err();
        assert!(matches!(err, StoreError::NonObjectPatch { kind: "number" }));
    }

    #[test]
    fn replace_keeps_snapshot_identity() {
        let state = profile();
        let next = MergePolicy::Replace
            .apply(&profile(), Next::Full(state.clone()))
            .unwrap();
        assert!(Arc::ptr_eq(&state, &next));
    }

    #[test]
    fn replace_requires_complete_value() {
        let err = MergePolicy::Replace
            .apply(&profile(), Next::patch(json!({"age": 1})))
            .unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[test]
    fn merge_into_scalar_uses_patch_alone() {
        let prev: Arc<Value> = Arc::new(json!(7));
        let next = MergePolicy::Merge
            .apply(&prev, Next::patch(json!({"a": 1})))
            .unwrap();
        assert_eq!(*next, json!({"a": 1}));
    }
}
