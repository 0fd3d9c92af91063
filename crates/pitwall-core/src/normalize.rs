//! Wire-key normalization.
//!
//! The upstream feed mixes snake_case and PascalCase keys and carries
//! feed-internal bookkeeping keys. Every payload is normalized once, in the
//! processor, before it enters the canonical tree: keys become camelCase and
//! private keys are dropped at every depth.

use serde_json::Value;

/// Feed-internal bookkeeping key, never admitted into the state tree.
pub const PRIVATE_KEY: &str = "_kf";

/// Convert a wire key to camelCase.
///
/// Handles both `snake_case` (`driver_list` -> `driverList`) and PascalCase
/// (`TimingData` -> `timingData`). Keys already in camelCase pass through
/// unchanged.
#[must_use]
pub fn to_camel_case(key: &str) -> String {
    if key.contains('_') {
        let mut parts = key.split('_').filter(|p| !p.is_empty());
        let mut out = match parts.next() {
            Some(first) => first.to_lowercase(),
            None => return String::new(),
        };
        for part in parts {
            let mut chars = part.chars();
            if let Some(first) = chars.next() {
                out.extend(first.to_uppercase());
                out.extend(chars.flat_map(char::to_lowercase));
            }
        }
        return out;
    }

    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Whether a key is feed-internal and must be dropped during normalization.
#[must_use]
pub fn is_private_key(key: &str) -> bool {
    key == PRIVATE_KEY
}

/// Recursively normalize every object key in a tree.
///
/// Private keys are removed at every depth; arrays are normalized
/// element-wise; scalars pass through unchanged.
#[must_use]
pub fn normalize_keys(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let normalized = map
                .iter()
                .filter(|(key, _)| !is_private_key(key))
                .map(|(key, child)| (to_camel_case(key), normalize_keys(child)))
                .collect();
            Value::Object(normalized)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize_keys).collect()),
        other => other.clone(),
    }
}
