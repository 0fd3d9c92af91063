//! Deterministic merge of a base state tree with a partial update tree.
//!
//! # Merge Rules
//!
//! Most specific first:
//!
//! | Update node | Behavior |
//! |-------------|----------|
//! | Scalar (string/number/bool/null) | Replaces the base node entirely |
//! | Object under a replace-by-key parent | Each present key replaces the whole base record at that key |
//! | Plain object | Recursive key-by-key merge |
//! | Array | Replaces the base array, unless the topic root is marked extend |
//!
//! Replace-by-key parents are the keyed registries of the feed: the driver
//! registry (`driverList`) and every per-driver `lines` map. A record update
//! for driver "1" replaces driver "1" wholesale; there is never a field-level
//! union inside such a record.
//!
//! Keys are assumed to be normalized (see [`crate::normalize`]) before a tree
//! reaches this module. Merging is pure and does no I/O; a rejected update
//! leaves the base untouched.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::topics::{self, ArrayStrategy};

/// Malformed update rejected as a whole.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MergeError {
    /// The top level of an update must be an object keyed by canonical roots.
    #[error("update must be an object at the top level, got {0}")]
    NotAnObject(&'static str),
}

/// Per-tree merge policy: which parents replace by key, which topic roots
/// extend arrays.
#[derive(Debug, Clone)]
pub struct MergeRules {
    replace_by_key_parents: BTreeSet<String>,
    extend_array_roots: BTreeSet<String>,
}

impl Default for MergeRules {
    fn default() -> Self {
        Self::standard()
    }
}

impl MergeRules {
    /// The policy table for the known topic catalog.
    #[must_use]
    pub fn standard() -> Self {
        let replace_by_key_parents = ["driverList", "lines"]
            .into_iter()
            .map(str::to_string)
            .collect();

        let extend_array_roots = topics::SUBSCRIBED_TOPICS
            .iter()
            .map(|topic| topics::canonical_key(topic))
            .filter(|key| topics::array_strategy(key) == ArrayStrategy::Extend)
            .collect();

        Self {
            replace_by_key_parents,
            extend_array_roots,
        }
    }

    /// Whether an object stored under `key` merges its children wholesale.
    #[must_use]
    pub fn replaces_by_key(&self, key: &str) -> bool {
        self.replace_by_key_parents.contains(key)
    }

    /// Whether arrays under the topic root `key` extend instead of replace.
    #[must_use]
    pub fn extends_arrays(&self, root_key: &str) -> bool {
        self.extend_array_roots.contains(root_key)
    }
}

/// Merge `update` into `base`.
///
/// Deterministic and order-dependent: applying the same update sequence to the
/// same base always yields the same tree.
///
/// # Errors
///
/// Returns [`MergeError::NotAnObject`] when the update's top level is not an
/// object; `base` is left unchanged in that case.
pub fn merge(base: &mut Value, update: &Value, rules: &MergeRules) -> Result<(), MergeError> {
    let Value::Object(update_map) = update else {
        return Err(MergeError::NotAnObject(value_kind(update)));
    };

    if !base.is_object() {
        *base = Value::Object(Map::new());
    }
    if let Value::Object(base_map) = base {
        for (root_key, update_node) in update_map {
            let extend_arrays = rules.extends_arrays(root_key);
            match base_map.get_mut(root_key) {
                Some(base_node) => {
                    merge_node(base_node, update_node, root_key, extend_arrays, rules);
                }
                None => {
                    base_map.insert(root_key.clone(), update_node.clone());
                }
            }
        }
    }

    Ok(())
}

fn merge_node(
    base: &mut Value,
    update: &Value,
    key: &str,
    extend_arrays: bool,
    rules: &MergeRules,
) {
    match update {
        Value::Object(update_map) => {
            let Value::Object(base_map) = base else {
                // Structured update over a scalar or array base: replace.
                *base = update.clone();
                return;
            };

            if rules.replaces_by_key(key) {
                // Keyed registry: whole-record replacement per present key.
                for (record_key, record) in update_map {
                    base_map.insert(record_key.clone(), record.clone());
                }
                return;
            }

            for (child_key, update_child) in update_map {
                match base_map.get_mut(child_key) {
                    Some(base_child) => {
                        merge_node(base_child, update_child, child_key, extend_arrays, rules);
                    }
                    None => {
                        base_map.insert(child_key.clone(), update_child.clone());
                    }
                }
            }
        }
        Value::Array(update_items) => {
            if extend_arrays {
                if let Value::Array(base_items) = base {
                    base_items.extend(update_items.iter().cloned());
                    return;
                }
            }
            *base = update.clone();
        }
        scalar => {
            // Scalars (including null) replace the base node entirely, even a
            // structured one.
            *base = scalar.clone();
        }
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rules() -> MergeRules {
        MergeRules::standard()
    }

    #[test]
    fn driver_record_replaced_wholesale() {
        let mut base = json!({
            "driverList": {
                "1": {"firstName": "Max", "teamName": "Red Bull"},
                "44": {"firstName": "Lewis"}
            }
        });
        let update = json!({
            "driverList": {
                "1": {"firstName": "Max", "position": 1}
            }
        });

        merge(&mut base, &update, &rules()).unwrap();

        // Full replace, never a field union of the two records.
        assert_eq!(
            base["driverList"]["1"],
            json!({"firstName": "Max", "position": 1})
        );
        // Untouched sibling key survives byte-for-byte.
        assert_eq!(base["driverList"]["44"], json!({"firstName": "Lewis"}));
    }

    #[test]
    fn timing_lines_replace_by_key() {
        let mut base = json!({
            "timingData": {
                "sessionPart": 1,
                "lines": {
                    "44": {"position": 3, "gapToLeader": "+1.2"},
                    "16": {"position": 4}
                }
            }
        });
        let update = json!({
            "timingData": {
                "lines": {"44": {"position": 2}}
            }
        });

        merge(&mut base, &update, &rules()).unwrap();

        assert_eq!(base["timingData"]["lines"]["44"], json!({"position": 2}));
        assert_eq!(base["timingData"]["lines"]["16"], json!({"position": 4}));
        // Sibling fields of the lines map merge normally.
        assert_eq!(base["timingData"]["sessionPart"], json!(1));
    }

    #[test]
    fn plain_objects_merge_recursively() {
        let mut base = json!({
            "sessionInfo": {"name": "Race", "meeting": {"country": "Italy"}}
        });
        let update = json!({
            "sessionInfo": {"meeting": {"circuit": "Monza"}}
        });

        merge(&mut base, &update, &rules()).unwrap();

        assert_eq!(
            base["sessionInfo"],
            json!({"name": "Race", "meeting": {"country": "Italy", "circuit": "Monza"}})
        );
    }

    #[test]
    fn arrays_replaced_by_default() {
        let mut base = json!({
            "raceControlMessages": {"messages": [1, 2, 3]}
        });
        let update = json!({
            "raceControlMessages": {"messages": [4, 5]}
        });

        merge(&mut base, &update, &rules()).unwrap();
        assert_eq!(base["raceControlMessages"]["messages"], json!([4, 5]));
    }

    #[test]
    fn arrays_extended_under_extend_roots() {
        let mut base = json!({"positionData": {"position": [1, 2, 3]}});
        let update = json!({"positionData": {"position": [4, 5]}});

        merge(&mut base, &update, &rules()).unwrap();
        assert_eq!(base["positionData"]["position"], json!([1, 2, 3, 4, 5]));
    }

    #[test]
    fn scalar_replaces_structured_base() {
        let mut base = json!({"trackStatus": {"status": "1", "message": "AllClear"}});
        let update = json!({"trackStatus": "unknown"});

        merge(&mut base, &update, &rules()).unwrap();
        assert_eq!(base["trackStatus"], json!("unknown"));
    }

    #[test]
    fn null_replaces_base_node() {
        let mut base = json!({"lapCount": {"currentLap": 10}});
        let update = json!({"lapCount": null});

        merge(&mut base, &update, &rules()).unwrap();
        assert_eq!(base["lapCount"], Value::Null);
    }

    #[test]
    fn new_keys_added() {
        let mut base = json!({});
        let update = json!({"weatherData": {"airTemp": "24.1"}});

        merge(&mut base, &update, &rules()).unwrap();
        assert_eq!(base["weatherData"]["airTemp"], json!("24.1"));
    }

    #[test]
    fn non_object_update_rejected_whole() {
        let mut base = json!({"lapCount": {"currentLap": 10}});
        let before = base.clone();

        let err = merge(&mut base, &json!([1, 2]), &rules()).unwrap_err();
        assert!(matches!(err, MergeError::NotAnObject("array")));
        assert_eq!(base, before);

        let err = merge(&mut base, &json!("nope"), &rules()).unwrap_err();
        assert!(matches!(err, MergeError::NotAnObject("string")));
        assert_eq!(base, before);
    }

    #[test]
    fn replay_is_deterministic() {
        let updates = [
            json!({"timingData": {"lines": {"44": {"position": 3}}}}),
            json!({"driverList": {"44": {"firstName": "Lewis"}}}),
            json!({"timingData": {"lines": {"44": {"position": 2}, "1": {"position": 1}}}}),
        ];

        let mut first = json!({});
        let mut second = json!({});
        for update in &updates {
            merge(&mut first, update, &rules()).unwrap();
            merge(&mut second, update, &rules()).unwrap();
        }

        assert_eq!(first, second);
    }
}
