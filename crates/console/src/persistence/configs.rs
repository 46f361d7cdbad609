use chrono::{DateTime, Utc};
use proxyfleet_common::proto::{ConfigKind, ConfigMutation, MutationOp};
use sqlx::{FromRow, SqliteConnection};
use uuid::Uuid;

use super::Db;
use crate::Result;

/// Materialized current state of one configuration document.
#[derive(Debug, Clone, FromRow)]
pub struct ConfigDocumentRecord {
    pub agent_id: Uuid,
    pub kind: String,
    pub tag: String,
    pub document_json: String,
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}

/// One row of the per-agent change log.
#[derive(Debug, Clone, FromRow)]
pub struct ConfigChangeRecord {
    pub agent_id: Uuid,
    pub version: i64,
    pub seq: i64,
    pub kind: String,
    pub tag: String,
    pub action: String,
    pub content_json: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Latest assigned change-log version for an agent (0 when none).
pub async fn latest_version(pool: &Db, agent_id: Uuid) -> Result<i64> {
    let version: Option<i64> =
        sqlx::query_scalar("SELECT MAX(version) FROM config_changes WHERE agent_id = ?1")
            .bind(agent_id)
            .fetch_one(pool)
            .await?;
    Ok(version.unwrap_or(0))
}

pub async fn get_document(
    pool: &Db,
    agent_id: Uuid,
    kind: ConfigKind,
    tag: &str,
) -> Result<Option<ConfigDocumentRecord>> {
    let record = sqlx::query_as::<_, ConfigDocumentRecord>(
        r#"
        SELECT agent_id, kind, tag, document_json, version, updated_at
        FROM config_documents
        WHERE agent_id = ?1 AND kind = ?2 AND tag = ?3
        "#,
    )
    .bind(agent_id)
    .bind(kind.as_str())
    .bind(tag)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}

pub async fn list_documents(
    pool: &Db,
    agent_id: Uuid,
    kind: ConfigKind,
) -> Result<Vec<ConfigDocumentRecord>> {
    let records = sqlx::query_as::<_, ConfigDocumentRecord>(
        r#"
        SELECT agent_id, kind, tag, document_json, version, updated_at
        FROM config_documents
        WHERE agent_id = ?1 AND kind = ?2
        ORDER BY tag ASC
        "#,
    )
    .bind(agent_id)
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;
    Ok(records)
}

/// Appends one push's change set at `version` and updates the materialized
/// documents, all inside the supplied transaction.
pub async fn record_change_set(
    tx: &mut SqliteConnection,
    agent_id: Uuid,
    version: i64,
    mutations: &[ConfigMutation],
) -> Result<()> {
    for (seq, mutation) in mutations.iter().enumerate() {
        let content_json = mutation
            .document
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        sqlx::query(
            r#"
            INSERT INTO config_changes (agent_id, version, seq, kind, tag, action, content_json)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(agent_id)
        .bind(version)
        .bind(seq as i64)
        .bind(mutation.kind.as_str())
        .bind(&mutation.tag)
        .bind(mutation.op.as_str())
        .bind(content_json.as_deref())
        .execute(&mut *tx)
        .await?;

        match mutation.op {
            MutationOp::Create | MutationOp::Update => {
                let document = mutation
                    .document
                    .as_ref()
                    .ok_or_else(|| anyhow::anyhow!("mutation without document"))?;
                sqlx::query(
                    r#"
                    INSERT INTO config_documents (agent_id, kind, tag, document_json, version, updated_at)
                    VALUES (?1, ?2, ?3, ?4, ?5, datetime('now'))
                    ON CONFLICT (agent_id, kind, tag)
                    DO UPDATE SET document_json = ?4, version = ?5, updated_at = datetime('now')
                    "#,
                )
                .bind(agent_id)
                .bind(mutation.kind.as_str())
                .bind(&mutation.tag)
                .bind(serde_json::to_string(document)?)
                .bind(version)
                .execute(&mut *tx)
                .await?;
            }
            MutationOp::Delete => {
                sqlx::query(
                    r#"
                    DELETE FROM config_documents
                    WHERE agent_id = ?1 AND kind = ?2 AND tag = ?3
                    "#,
                )
                .bind(agent_id)
                .bind(mutation.kind.as_str())
                .bind(&mutation.tag)
                .execute(&mut *tx)
                .await?;
            }
        }
    }
    Ok(())
}

/// Changes recorded after `since_version`, in version/seq order; the payload
/// for replaying an agent that reconnected behind the log head.
pub async fn list_changes_since(
    pool: &Db,
    agent_id: Uuid,
    since_version: i64,
) -> Result<Vec<ConfigChangeRecord>> {
    let records = sqlx::query_as::<_, ConfigChangeRecord>(
        r#"
        SELECT agent_id, version, seq, kind, tag, action, content_json, created_at
        FROM config_changes
        WHERE agent_id = ?1 AND version > ?2
        ORDER BY version ASC, seq ASC
        "#,
    )
    .bind(agent_id)
    .bind(since_version)
    .fetch_all(pool)
    .await?;
    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{agents, migrations};
    use serde_json::json;

    async fn seeded_agent(pool: &Db) -> Uuid {
        let agent = agents::create_agent(
            pool,
            agents::NewAgent {
                id: Uuid::new_v4(),
                name: "edge-1".into(),
                credential_hash: "hash".into(),
            },
        )
        .await
        .expect("create agent");
        agent.id
    }

    fn create_mutation(tag: &str) -> ConfigMutation {
        ConfigMutation {
            op: MutationOp::Create,
            kind: ConfigKind::Inbound,
            tag: tag.into(),
            document: Some(json!({"tag": tag, "protocol": "vless", "port": 443})),
        }
    }

    #[tokio::test]
    async fn versions_start_at_zero_and_advance_with_change_sets() {
        let pool = migrations::test_pool().await;
        let agent_id = seeded_agent(&pool).await;

        assert_eq!(latest_version(&pool, agent_id).await.expect("latest"), 0);

        let mut tx = pool.begin().await.expect("tx");
        record_change_set(&mut tx, agent_id, 1, &[create_mutation("vless-in")])
            .await
            .expect("record");
        tx.commit().await.expect("commit");

        assert_eq!(latest_version(&pool, agent_id).await.expect("latest"), 1);
        let doc = get_document(&pool, agent_id, ConfigKind::Inbound, "vless-in")
            .await
            .expect("get")
            .expect("document exists");
        assert_eq!(doc.version, 1);
    }

    #[tokio::test]
    async fn delete_mutations_remove_materialized_documents() {
        let pool = migrations::test_pool().await;
        let agent_id = seeded_agent(&pool).await;

        let mut tx = pool.begin().await.expect("tx");
        record_change_set(&mut tx, agent_id, 1, &[create_mutation("vless-in")])
            .await
            .expect("record");
        tx.commit().await.expect("commit");

        let mut tx = pool.begin().await.expect("tx");
        record_change_set(
            &mut tx,
            agent_id,
            2,
            &[ConfigMutation {
                op: MutationOp::Delete,
                kind: ConfigKind::Inbound,
                tag: "vless-in".into(),
                document: None,
            }],
        )
        .await
        .expect("record delete");
        tx.commit().await.expect("commit");

        assert!(get_document(&pool, agent_id, ConfigKind::Inbound, "vless-in")
            .await
            .expect("get")
            .is_none());

        let changes = list_changes_since(&pool, agent_id, 0).await.expect("changes");
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[1].action, "delete");
        assert!(changes[1].content_json.is_none());
    }

    #[tokio::test]
    async fn change_log_is_ordered_and_filterable() {
        let pool = migrations::test_pool().await;
        let agent_id = seeded_agent(&pool).await;

        for version in 1..=3 {
            let mut tx = pool.begin().await.expect("tx");
            record_change_set(
                &mut tx,
                agent_id,
                version,
                &[create_mutation(&format!("in-{version}"))],
            )
            .await
            .expect("record");
            tx.commit().await.expect("commit");
        }

        let tail = list_changes_since(&pool, agent_id, 1).await.expect("changes");
        let versions: Vec<_> = tail.iter().map(|c| c.version).collect();
        assert_eq!(versions, [2, 3]);
    }
}
