//! Depth-first search of a page payload for the first timestamp past the cutoff.

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::age::AgePolicy;

/// Field holding a post's capture time in API payloads.
pub const TIMESTAMP_FIELD: &str = "taken_at";

/// Return the first `field` value (in payload order) that `policy` classifies as old.
///
/// At each object the object's own `field` is checked before any nested value;
/// nested objects and arrays are then walked in source order, so an early
/// sibling's subtree wins over a later sibling's direct field.
#[must_use]
pub fn find_old_timestamp<'a>(
    value: &'a Value,
    field: &str,
    policy: &AgePolicy,
    now: DateTime<Utc>,
) -> Option<&'a Value> {
    match value {
        Value::Object(map) => {
            if let Some(candidate) = map.get(field) {
                if candidate.is_number() && policy.is_old_at(candidate, now) {
                    return Some(candidate);
                }
            }
            map.values()
                .filter(|v| v.is_object() || v.is_array())
                .find_map(|v| find_old_timestamp(v, field, policy, now))
        }
        Value::Array(items) => items
            .iter()
            .find_map(|v| find_old_timestamp(v, field, policy, now)),
        _ => None,
    }
}
