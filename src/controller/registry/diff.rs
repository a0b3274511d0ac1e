//! # Structural Diff
//!
//! JSON merge patch (RFC 7386) generation and application over the
//! projections produced by [`TrackedKind`](super::TrackedKind).
//!
//! Semantics are fixed and explicit: objects are diffed key by key, removed
//! keys become `null`, and arrays and scalars are replaced wholesale. There is
//! no positional merging of lists.

use serde_json::{Map, Value};

/// Compute the merge patch turning `from` into `to`.
///
/// Returns `None` when the two values are structurally equal, which is the
/// signal that no write must be issued.
#[must_use]
pub fn merge_patch(from: &Value, to: &Value) -> Option<Value> {
    if from == to {
        return None;
    }
    match (from, to) {
        (Value::Object(from_map), Value::Object(to_map)) => {
            let mut patch = Map::new();
            for (key, to_value) in to_map {
                match from_map.get(key) {
                    Some(from_value) => {
                        if let Some(child) = merge_patch(from_value, to_value) {
                            patch.insert(key.clone(), child);
                        }
                    }
                    None => {
                        patch.insert(key.clone(), strip_nulls(to_value));
                    }
                }
            }
            for key in from_map.keys() {
                if !to_map.contains_key(key) {
                    patch.insert(key.clone(), Value::Null);
                }
            }
            if patch.is_empty() {
                None
            } else {
                Some(Value::Object(patch))
            }
        }
        _ => Some(strip_nulls(to)),
    }
}

/// Apply a merge patch in place
pub fn apply_merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                apply_merge_patch(
                    target_map.entry(key.clone()).or_insert(Value::Null),
                    value,
                );
            }
        }
    }
}

/// Null means "delete" in a merge patch, so nulls inside newly added values are dropped
fn strip_nulls(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .filter(|(_, v)| !v.is_null())
                .map(|(k, v)| (k.clone(), strip_nulls(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}
