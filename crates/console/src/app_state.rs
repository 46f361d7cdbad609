use std::sync::Arc;

use axum::http::HeaderName;
use metrics_exporter_prometheus::PrometheusHandle;
use subtle::ConstantTimeEq;

use crate::channel::ChannelHub;
use crate::config::{ChannelConfig, LimitsConfig};
use crate::events::EventBus;
use crate::persistence;
use crate::push::PushCoordinator;
use crate::schema::SchemaRegistry;

/// Shared application state passed into handlers and session tasks.
#[derive(Clone)]
pub struct AppState {
    pub db: persistence::Db,
    pub schemas: Arc<SchemaRegistry>,
    pub hub: ChannelHub,
    pub coordinator: PushCoordinator,
    pub events: EventBus,
    pub operator_auth: OperatorAuth,
    pub token_pepper: String,
    pub advertised_url: String,
    pub channel: ChannelConfig,
    pub limits: LimitsConfig,
    pub metrics_handle: PrometheusHandle,
}

/// Operator authentication configuration.
#[derive(Clone)]
pub struct OperatorAuth {
    pub tokens: Vec<String>,
    pub header_name: HeaderName,
}

impl OperatorAuth {
    /// Constant-time membership test against the configured tokens.
    pub fn is_valid_token(&self, candidate: &str) -> bool {
        self.tokens.iter().any(|token| {
            if token.len() != candidate.len() {
                return false;
            }
            token.as_bytes().ct_eq(candidate.as_bytes()).into()
        })
    }
}

#[allow(dead_code)]
fn _assert_app_state_bounds() {
    fn assert_bounds<T: Clone + Send + Sync + 'static>() {}
    assert_bounds::<AppState>();
}
