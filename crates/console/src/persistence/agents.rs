use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use super::Db;
use crate::Result;

/// Stored channel state (TEXT column, lowercase).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "TEXT", rename_all = "lowercase")]
pub enum ConnectionState {
    Connected,
    Disconnected,
}

impl From<ConnectionState> for proxyfleet_common::api::ConnectionState {
    fn from(value: ConnectionState) -> Self {
        match value {
            ConnectionState::Connected => Self::Connected,
            ConnectionState::Disconnected => Self::Disconnected,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct AgentRecord {
    pub id: Uuid,
    pub name: String,
    pub address: Option<String>,
    pub credential_hash: String,
    pub connection_state: ConnectionState,
    pub status_note: Option<String>,
    pub last_seen: Option<DateTime<Utc>>,
    pub applied_version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct NewAgent {
    pub id: Uuid,
    pub name: String,
    pub credential_hash: String,
}

const SELECT_COLUMNS: &str = r#"
    SELECT
        id,
        name,
        address,
        credential_hash,
        connection_state,
        status_note,
        last_seen,
        applied_version,
        created_at,
        updated_at
    FROM agents
"#;

pub async fn create_agent(pool: &Db, new_agent: NewAgent) -> Result<AgentRecord> {
    sqlx::query(
        r#"
        INSERT INTO agents (id, name, credential_hash, connection_state)
        VALUES (?1, ?2, ?3, ?4)
        "#,
    )
    .bind(new_agent.id)
    .bind(&new_agent.name)
    .bind(&new_agent.credential_hash)
    .bind(ConnectionState::Disconnected)
    .execute(pool)
    .await?;

    get_agent(pool, new_agent.id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("agent insert did not return row"))
}

pub async fn get_agent(pool: &Db, id: Uuid) -> Result<Option<AgentRecord>> {
    let record = sqlx::query_as::<_, AgentRecord>(&format!("{SELECT_COLUMNS} WHERE id = ?1"))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(record)
}

pub async fn list_agents(pool: &Db) -> Result<Vec<AgentRecord>> {
    let records = sqlx::query_as::<_, AgentRecord>(&format!("{SELECT_COLUMNS} ORDER BY created_at ASC"))
        .fetch_all(pool)
        .await?;
    Ok(records)
}

pub async fn delete_agent(pool: &Db, id: Uuid) -> Result<u64> {
    let result = sqlx::query("DELETE FROM agents WHERE id = ?1")
        .bind(id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}

pub async fn update_credential_hash(pool: &Db, id: Uuid, credential_hash: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET credential_hash = ?2, updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(credential_hash)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_connection_state(
    pool: &Db,
    id: Uuid,
    state: ConnectionState,
    last_seen: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET connection_state = ?2,
            last_seen = COALESCE(?3, last_seen),
            updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(state)
    .bind(last_seen)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_address(pool: &Db, id: Uuid, address: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET address = ?2, updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(address)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn update_status_note(pool: &Db, id: Uuid, note: &str) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET status_note = ?2, last_seen = ?3, updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(note)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn touch_last_seen(pool: &Db, id: Uuid) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET last_seen = ?2, updated_at = datetime('now')
        WHERE id = ?1
        "#,
    )
    .bind(id)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Advances the applied version, never decreasing it. Returns the number of
/// rows updated (0 when the reported version is not an advance).
pub async fn advance_applied_version(pool: &Db, id: Uuid, version: i64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        UPDATE agents
        SET applied_version = ?2, last_seen = ?3, updated_at = datetime('now')
        WHERE id = ?1 AND applied_version < ?2
        "#,
    )
    .bind(id)
    .bind(version)
    .bind(Utc::now())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}
