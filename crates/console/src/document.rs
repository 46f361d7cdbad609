//! Path-addressed access into hierarchical configuration documents.
//!
//! Paths are dot-separated, with `name[index]` selecting an array element:
//! `streamSettings.tlsSettings.certificates[0].keyFile`. The resolver is
//! total: `get` never fails for a parsed path, and `set` materializes any
//! missing intermediate nodes instead of erroring.

use std::fmt;

use serde_json::{Map, Value};

/// One step of a [`FieldPath`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Step {
    /// Object field access.
    Field(String),
    /// Object field access followed by an array index (`clients[0]`).
    Indexed(String, usize),
}

/// A parsed document path.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath {
    steps: Vec<Step>,
    raw: String,
}

/// Error raised when a path string cannot be parsed.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("invalid field path {path:?}: {reason}")]
pub struct PathError {
    /// The offending path string.
    pub path: String,
    /// What was wrong with it.
    pub reason: &'static str,
}

impl FieldPath {
    /// Parses a dot/index path. Empty segments and malformed index
    /// selectors are rejected.
    pub fn parse(path: &str) -> Result<Self, PathError> {
        let err = |reason| PathError {
            path: path.to_string(),
            reason,
        };

        if path.is_empty() {
            return Err(err("path is empty"));
        }

        let mut steps = Vec::new();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(err("empty segment"));
            }
            match segment.find('[') {
                None => {
                    if segment.contains(']') {
                        return Err(err("']' without '['"));
                    }
                    steps.push(Step::Field(segment.to_string()));
                }
                Some(open) => {
                    if open == 0 {
                        return Err(err("index selector without field name"));
                    }
                    let Some(rest) = segment[open + 1..].strip_suffix(']') else {
                        return Err(err("unterminated index selector"));
                    };
                    let index: usize = rest
                        .parse()
                        .map_err(|_| err("index selector is not a number"))?;
                    steps.push(Step::Indexed(segment[..open].to_string(), index));
                }
            }
        }

        Ok(Self {
            steps,
            raw: path.to_string(),
        })
    }

    /// The steps in order.
    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// The original path string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Reads the value at `path`. `None` means the path is absent, which is
/// distinct from a present `null` or empty string.
pub fn get<'a>(document: &'a Value, path: &FieldPath) -> Option<&'a Value> {
    let mut current = document;
    for step in &path.steps {
        current = match step {
            Step::Field(name) => current.as_object()?.get(name)?,
            Step::Indexed(name, index) => current.as_object()?.get(name)?.as_array()?.get(*index)?,
        };
    }
    Some(current)
}

/// Writes `value` at `path`, creating any missing intermediate objects and
/// arrays. Arrays grow (padded with `null`) and are never shrunk. An
/// intermediate node of the wrong shape is replaced, so the write always
/// lands.
pub fn set(document: &mut Value, path: &FieldPath, value: Value) {
    let mut current = document;
    let last = path.steps.len() - 1;
    for (position, step) in path.steps.iter().enumerate() {
        let is_last = position == last;
        match step {
            Step::Field(name) => {
                let object = ensure_object(current);
                if is_last {
                    object.insert(name.clone(), value);
                    return;
                }
                current = object.entry(name.clone()).or_insert(Value::Null);
            }
            Step::Indexed(name, index) => {
                let object = ensure_object(current);
                let slot = object.entry(name.clone()).or_insert(Value::Null);
                let array = ensure_array(slot);
                if array.len() <= *index {
                    array.resize(*index + 1, Value::Null);
                }
                if is_last {
                    array[*index] = value;
                    return;
                }
                current = &mut array[*index];
            }
        }
    }
}

/// Deep-merges `patch` into `base`: objects merge per key, everything else
/// is replaced. Used to apply partial `update` mutations onto the stored
/// document before validation.
pub fn merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge(existing, patch_value),
                    None => {
                        base_map.insert(key.clone(), patch_value.clone());
                    }
                }
            }
        }
        (base_slot, patch_value) => *base_slot = patch_value.clone(),
    }
}

fn ensure_object(slot: &mut Value) -> &mut Map<String, Value> {
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    match slot {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

fn ensure_array(slot: &mut Value) -> &mut Vec<Value> {
    if !slot.is_array() {
        *slot = Value::Array(Vec::new());
    }
    match slot {
        Value::Array(array) => array,
        _ => unreachable!(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn path(p: &str) -> FieldPath {
        FieldPath::parse(p).expect("valid path")
    }

    #[test]
    fn parse_accepts_fields_and_indexes() {
        let parsed = path("settings.clients[0].id");
        assert_eq!(
            parsed.steps(),
            &[
                Step::Field("settings".into()),
                Step::Indexed("clients".into(), 0),
                Step::Field("id".into()),
            ]
        );
        assert_eq!(parsed.as_str(), "settings.clients[0].id");
    }

    #[test]
    fn parse_rejects_malformed_paths() {
        for bad in ["", "a..b", "a.[0]", "a.b[x]", "a.b[0", "a.b]"] {
            assert!(FieldPath::parse(bad).is_err(), "expected error for {bad:?}");
        }
    }

    #[test]
    fn get_distinguishes_absent_from_null() {
        let doc = json!({"a": {"b": null, "c": ""}});
        assert_eq!(get(&doc, &path("a.b")), Some(&Value::Null));
        assert_eq!(get(&doc, &path("a.c")), Some(&json!("")));
        assert_eq!(get(&doc, &path("a.d")), None);
        assert_eq!(get(&doc, &path("a.d.e.f")), None);
    }

    #[test]
    fn get_never_panics_on_shape_mismatch() {
        let doc = json!({"a": 5, "b": [1, 2]});
        assert_eq!(get(&doc, &path("a.b")), None);
        assert_eq!(get(&doc, &path("b[5]")), None);
        assert_eq!(get(&doc, &path("b[0].c")), None);
    }

    #[test]
    fn set_then_get_round_trips() {
        let mut doc = json!({});
        let p = path("streamSettings.tlsSettings.certificates[0].keyFile");
        set(&mut doc, &p, json!("/path/to/key.key"));
        assert_eq!(get(&doc, &p), Some(&json!("/path/to/key.key")));
    }

    #[test]
    fn set_materializes_intermediates_and_pads_arrays() {
        let mut doc = json!({});
        set(&mut doc, &path("settings.clients[2].id"), json!("uuid"));
        let clients = doc["settings"]["clients"].as_array().expect("array");
        assert_eq!(clients.len(), 3);
        assert_eq!(clients[0], Value::Null);
        assert_eq!(clients[1], Value::Null);
        assert_eq!(clients[2]["id"], "uuid");
    }

    #[test]
    fn set_leaves_siblings_untouched() {
        let mut doc = json!({
            "tag": "vless-in",
            "settings": {"decryption": "none", "clients": [{"id": "old", "flow": "x"}]}
        });
        set(&mut doc, &path("settings.clients[0].id"), json!("new"));
        assert_eq!(doc["tag"], "vless-in");
        assert_eq!(doc["settings"]["decryption"], "none");
        assert_eq!(doc["settings"]["clients"][0]["flow"], "x");
        assert_eq!(doc["settings"]["clients"][0]["id"], "new");
    }

    #[test]
    fn set_replaces_wrong_shape_intermediates() {
        let mut doc = json!({"a": 7});
        set(&mut doc, &path("a.b[1].c"), json!(true));
        assert_eq!(doc["a"]["b"][1]["c"], true);
    }

    #[test]
    fn merge_is_deep_for_objects_and_replacing_for_leaves() {
        let mut base = json!({
            "port": 443,
            "settings": {"clients": [{"id": "a"}], "decryption": "none"}
        });
        merge(
            &mut base,
            &json!({"port": 8443, "settings": {"decryption": "custom"}}),
        );
        assert_eq!(base["port"], 8443);
        assert_eq!(base["settings"]["decryption"], "custom");
        assert_eq!(base["settings"]["clients"][0]["id"], "a");
    }
}
