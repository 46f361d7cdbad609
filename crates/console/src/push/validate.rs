//! Turns submitted mutations into a fully validated, fully materialized
//! change set before a version is assigned.

use std::collections::HashMap;

use proxyfleet_common::proto::{ConfigKind, ConfigMutation, MutationOp};
use serde_json::Value;
use uuid::Uuid;

use crate::document;
use crate::persistence::{configs, Db};
use crate::schema::SchemaRegistry;
use crate::validator;

use super::SubmitError;

/// Validates the submitted mutations against the schema registry and the
/// agent's stored documents. Update mutations come in as partial patches
/// and leave as complete merged documents, so the change log, the wire, and
/// the materialized state all carry the same content.
pub async fn prepare_mutations(
    db: &Db,
    schemas: &SchemaRegistry,
    agent_id: Uuid,
    mutations: Vec<ConfigMutation>,
) -> Result<Vec<ConfigMutation>, SubmitError> {
    if mutations.is_empty() {
        return Err(SubmitError::Invalid("push has no mutations".into()));
    }

    // Documents as they will exist after the mutations that precede the one
    // being checked; later mutations may reference earlier ones.
    let mut pending: HashMap<(ConfigKind, String), Option<Value>> = HashMap::new();
    let mut prepared = Vec::with_capacity(mutations.len());

    for mutation in mutations {
        if mutation.tag.trim().is_empty() {
            return Err(SubmitError::Invalid("mutation tag cannot be empty".into()));
        }
        let key = (mutation.kind, mutation.tag.clone());
        let existing = match pending.get(&key) {
            Some(state) => state.clone(),
            None => stored_document(db, agent_id, mutation.kind, &mutation.tag).await?,
        };

        let prepared_mutation = match mutation.op {
            MutationOp::Create => {
                if existing.is_some() {
                    return Err(SubmitError::Invalid(format!(
                        "{} {:?} already exists",
                        mutation.kind.as_str(),
                        mutation.tag
                    )));
                }
                let document = normalized_document(&mutation)?;
                validate_document(schemas, mutation.kind, &document)?;
                pending.insert(key, Some(document.clone()));
                ConfigMutation {
                    document: Some(document),
                    ..mutation
                }
            }
            MutationOp::Update => {
                let Some(mut merged) = existing else {
                    return Err(SubmitError::Invalid(format!(
                        "{} {:?} does not exist",
                        mutation.kind.as_str(),
                        mutation.tag
                    )));
                };
                let patch = normalized_document(&mutation)?;
                document::merge(&mut merged, &patch);
                validate_document(schemas, mutation.kind, &merged)?;
                pending.insert(key, Some(merged.clone()));
                ConfigMutation {
                    document: Some(merged),
                    ..mutation
                }
            }
            MutationOp::Delete => {
                if existing.is_none() {
                    return Err(SubmitError::Invalid(format!(
                        "{} {:?} does not exist",
                        mutation.kind.as_str(),
                        mutation.tag
                    )));
                }
                pending.insert(key, None);
                ConfigMutation {
                    document: None,
                    ..mutation
                }
            }
        };
        prepared.push(prepared_mutation);
    }

    Ok(prepared)
}

async fn stored_document(
    db: &Db,
    agent_id: Uuid,
    kind: ConfigKind,
    tag: &str,
) -> Result<Option<Value>, SubmitError> {
    let record = configs::get_document(db, agent_id, kind, tag)
        .await
        .map_err(SubmitError::Storage)?;
    match record {
        Some(record) => {
            let document = serde_json::from_str(&record.document_json)
                .map_err(|err| SubmitError::Storage(err.into()))?;
            Ok(Some(document))
        }
        None => Ok(None),
    }
}

/// The mutation document must be a JSON object; its `tag` field is forced
/// to the mutation's tag so the two can never drift apart.
fn normalized_document(mutation: &ConfigMutation) -> Result<Value, SubmitError> {
    let Some(document) = &mutation.document else {
        return Err(SubmitError::Invalid(format!(
            "{} mutation for {:?} is missing its document",
            mutation.op.as_str(),
            mutation.tag
        )));
    };
    if !document.is_object() {
        return Err(SubmitError::Invalid(format!(
            "document for {:?} must be an object",
            mutation.tag
        )));
    }
    if let Some(tag) = document.get("tag").and_then(Value::as_str) {
        if !tag.is_empty() && tag != mutation.tag {
            return Err(SubmitError::Invalid(format!(
                "document tag {tag:?} does not match mutation tag {:?}",
                mutation.tag
            )));
        }
    }
    let mut document = document.clone();
    if let Some(map) = document.as_object_mut() {
        map.insert("tag".into(), Value::String(mutation.tag.clone()));
    }
    Ok(document)
}

fn validate_document(
    schemas: &SchemaRegistry,
    kind: ConfigKind,
    document: &Value,
) -> Result<(), SubmitError> {
    let protocol = SchemaRegistry::discriminant(kind, document);
    let schema = schemas.get(kind, protocol)?;
    let errors = validator::validate(schema, document);
    if errors.is_empty() {
        Ok(())
    } else {
        Err(SubmitError::Validation(errors))
    }
}
