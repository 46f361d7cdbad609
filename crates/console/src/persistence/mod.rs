//! SQLite-backed storage for agents, configuration documents, and the
//! per-agent change log.

pub mod agents;
pub mod configs;
pub mod migrations;

pub use agents::{AgentRecord, ConnectionState, NewAgent};
pub use configs::{ConfigChangeRecord, ConfigDocumentRecord};

/// Shared connection pool type.
pub type Db = sqlx::SqlitePool;
