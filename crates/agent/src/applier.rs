//! Applies pushed change sets to the local configuration state.
//!
//! A change set is all-or-nothing: the mutations run against a scratch copy
//! and commit together with the version advance, so a failing mutation
//! leaves both the documents and the applied version untouched. The error
//! is reported back to the console verbatim.

use proxyfleet_common::proto::{ConfigMutation, MutationOp};
use serde_json::Value;

use crate::state::PersistedState;

/// Why a change set could not be applied.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ApplyError {
    #[error("{kind} {tag:?} already exists")]
    AlreadyExists { kind: &'static str, tag: String },
    #[error("{kind} {tag:?} does not exist")]
    Missing { kind: &'static str, tag: String },
    #[error("{op} mutation for {tag:?} is missing its document")]
    MissingDocument { op: &'static str, tag: String },
    #[error("change set targets version {target} but {current} is already applied")]
    StaleTarget { target: i64, current: i64 },
}

/// Applies a change set and advances the applied version to `target`.
pub fn apply_change_set(
    state: &mut PersistedState,
    target_version: i64,
    mutations: &[ConfigMutation],
) -> Result<(), ApplyError> {
    if target_version <= state.applied_version {
        return Err(ApplyError::StaleTarget {
            target: target_version,
            current: state.applied_version,
        });
    }

    let mut documents = state.documents.clone();
    for mutation in mutations {
        let kind = mutation.kind.as_str();
        let bucket = documents.entry(kind.to_string()).or_default();
        match mutation.op {
            MutationOp::Create => {
                if bucket.contains_key(&mutation.tag) {
                    return Err(ApplyError::AlreadyExists {
                        kind,
                        tag: mutation.tag.clone(),
                    });
                }
                let document = required_document(mutation)?;
                bucket.insert(mutation.tag.clone(), document.clone());
            }
            MutationOp::Update => {
                let Some(existing) = bucket.get_mut(&mutation.tag) else {
                    return Err(ApplyError::Missing {
                        kind,
                        tag: mutation.tag.clone(),
                    });
                };
                let document = required_document(mutation)?;
                merge(existing, document);
            }
            MutationOp::Delete => {
                if bucket.remove(&mutation.tag).is_none() {
                    return Err(ApplyError::Missing {
                        kind,
                        tag: mutation.tag.clone(),
                    });
                }
            }
        }
    }

    state.documents = documents;
    state.applied_version = target_version;
    state.applied_at = Some(chrono::Utc::now());
    Ok(())
}

fn required_document(mutation: &ConfigMutation) -> Result<&Value, ApplyError> {
    mutation.document.as_ref().ok_or(ApplyError::MissingDocument {
        op: mutation.op.as_str(),
        tag: mutation.tag.clone(),
    })
}

/// Deep merge: objects merge per key, everything else is replaced.
fn merge(base: &mut Value, patch: &Value) {
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

#[cfg(test)]
mod tests {
    use super::*;
    use proxyfleet_common::proto::ConfigKind;
    use serde_json::json;

    fn create(tag: &str, document: Value) -> ConfigMutation {
        ConfigMutation {
            op: MutationOp::Create,
            kind: ConfigKind::Inbound,
            tag: tag.into(),
            document: Some(document),
        }
    }

    #[test]
    fn create_update_delete_in_one_change_set() {
        let mut state = PersistedState::default();
        apply_change_set(
            &mut state,
            1,
            &[create("socks-in", json!({"tag": "socks-in", "port": 1080}))],
        )
        .expect("apply create");
        assert_eq!(state.applied_version, 1);

        apply_change_set(
            &mut state,
            2,
            &[
                ConfigMutation {
                    op: MutationOp::Update,
                    kind: ConfigKind::Inbound,
                    tag: "socks-in".into(),
                    document: Some(json!({"port": 1081})),
                },
                create("http-in", json!({"tag": "http-in", "port": 8080})),
            ],
        )
        .expect("apply update+create");

        let inbounds = &state.documents["inbound"];
        assert_eq!(inbounds["socks-in"]["port"], 1081);
        assert_eq!(inbounds["socks-in"]["tag"], "socks-in");
        assert_eq!(inbounds.len(), 2);
        assert_eq!(state.applied_version, 2);

        apply_change_set(
            &mut state,
            3,
            &[ConfigMutation {
                op: MutationOp::Delete,
                kind: ConfigKind::Inbound,
                tag: "http-in".into(),
                document: None,
            }],
        )
        .expect("apply delete");
        assert!(!state.documents["inbound"].contains_key("http-in"));
        assert_eq!(state.applied_version, 3);
    }

    #[test]
    fn failing_mutation_rolls_back_the_whole_change_set() {
        let mut state = PersistedState::default();
        apply_change_set(
            &mut state,
            1,
            &[create("socks-in", json!({"tag": "socks-in"}))],
        )
        .expect("seed");

        let err = apply_change_set(
            &mut state,
            2,
            &[
                create("http-in", json!({"tag": "http-in"})),
                ConfigMutation {
                    op: MutationOp::Delete,
                    kind: ConfigKind::Inbound,
                    tag: "ghost".into(),
                    document: None,
                },
            ],
        )
        .expect_err("delete of missing tag");
        assert_eq!(
            err,
            ApplyError::Missing {
                kind: "inbound",
                tag: "ghost".into()
            }
        );

        // Neither the partial create nor the version advance survived.
        assert!(!state.documents["inbound"].contains_key("http-in"));
        assert_eq!(state.applied_version, 1);
    }

    #[test]
    fn duplicate_create_is_rejected() {
        let mut state = PersistedState::default();
        apply_change_set(&mut state, 1, &[create("a", json!({}))]).expect("seed");
        let err = apply_change_set(&mut state, 2, &[create("a", json!({}))])
            .expect_err("duplicate");
        assert!(matches!(err, ApplyError::AlreadyExists { .. }));
    }

    #[test]
    fn stale_targets_are_rejected_so_version_never_decreases() {
        let mut state = PersistedState {
            applied_version: 5,
            ..Default::default()
        };
        let err = apply_change_set(&mut state, 5, &[create("a", json!({}))])
            .expect_err("stale target");
        assert_eq!(
            err,
            ApplyError::StaleTarget {
                target: 5,
                current: 5
            }
        );
        assert_eq!(state.applied_version, 5);
    }
}
