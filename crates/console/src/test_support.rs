//! Shared helpers for unit tests.

use std::sync::Arc;

use axum::http::HeaderName;

use crate::app_state::{AppState, OperatorAuth};
use crate::channel::ChannelHub;
use crate::config::{ChannelConfig, LimitsConfig, PushConfig};
use crate::events::EventBus;
use crate::persistence;
use crate::push::PushCoordinator;
use crate::schema::SchemaRegistry;
use crate::telemetry;

fn state_with_db(db: persistence::Db) -> AppState {
    let schemas = Arc::new(SchemaRegistry::builtin());
    let hub = ChannelHub::new();
    let events = EventBus::default();
    let coordinator = PushCoordinator::new(
        db.clone(),
        hub.clone(),
        events.clone(),
        schemas.clone(),
        PushConfig {
            poll_interval_ms: 20,
            poll_max_attempts: 25,
            queue_wait_secs: 1,
        },
    );
    AppState {
        db,
        schemas,
        hub,
        coordinator,
        events,
        operator_auth: OperatorAuth {
            tokens: vec!["secret-token".into()],
            header_name: HeaderName::from_static("authorization"),
        },
        token_pepper: "test-pepper".into(),
        advertised_url: "http://127.0.0.1:8080".into(),
        channel: ChannelConfig {
            heartbeat_interval_secs: 1,
            heartbeat_grace_secs: 2,
            handshake_timeout_secs: 2,
            outbox_capacity: 64,
        },
        limits: LimitsConfig {
            push_body_bytes: 256 * 1024,
            max_mutations_per_push: 64,
            max_field_len: 255,
        },
        metrics_handle: telemetry::init_metrics_recorder(),
    }
}

/// State with a lazily connected (never used) database, for pure handler
/// helpers.
pub(crate) fn test_state_sync() -> AppState {
    let db = sqlx::SqlitePool::connect_lazy("sqlite::memory:").expect("lazy pool");
    state_with_db(db)
}

/// State with a migrated in-memory database.
#[allow(dead_code)]
pub(crate) async fn test_state() -> AppState {
    let db = persistence::migrations::test_pool().await;
    state_with_db(db)
}
