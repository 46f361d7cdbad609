//! HTTP surface: operator API, agent channel upgrade, and system endpoints.

pub mod agents;
pub mod channel;
pub mod events;
pub mod pushes;
pub mod schemas;

use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};

/// Extracts a bearer token from the configured operator header.
pub(crate) fn extract_bearer(headers: &HeaderMap, state: &AppState) -> ApiResult<String> {
    let value = headers
        .get(&state.operator_auth.header_name)
        .and_then(|value| value.to_str().ok())
        .ok_or_else(|| AppError::unauthorized("missing authorization header"))?;
    let token = value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .unwrap_or(value)
        .trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("empty bearer token"));
    }
    Ok(token.to_string())
}

/// Middleware guarding operator endpoints with a constant-time token check.
pub(crate) async fn require_operator(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let token = match extract_bearer(request.headers(), &state) {
        Ok(token) => token,
        Err(err) => return err.into_response(),
    };
    if !state.operator_auth.is_valid_token(&token) {
        return AppError::unauthorized("invalid operator token").into_response();
    }
    next.run(request).await
}

/// Health response body.
#[derive(Serialize, utoipa::ToSchema)]
pub(crate) struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Number of agents with a live channel.
    pub agents_connected: usize,
}

#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Health check", body = HealthResponse)),
    tag = "system"
)]
pub(crate) async fn healthz(State(state): State<AppState>) -> impl IntoResponse {
    let agents_connected = state.hub.connected_count().await;
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "ok",
            version: crate::version::VERSION,
            agents_connected,
        }),
    )
}

#[utoipa::path(
    get,
    path = "/metrics",
    responses((status = 200, description = "Prometheus metrics", content_type = "text/plain")),
    tag = "system"
)]
pub(crate) async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let body = state.metrics_handle.render();
    (
        StatusCode::OK,
        [(
            axum::http::header::CONTENT_TYPE,
            "text/plain; version=0.0.4",
        )],
        body,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers_with(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static(value));
        headers
    }

    fn state_for_tests() -> AppState {
        crate::test_support::test_state_sync()
    }

    #[tokio::test]
    async fn extract_bearer_strips_scheme_prefix() {
        let state = state_for_tests();
        let token =
            extract_bearer(&headers_with("Bearer secret-token"), &state).expect("token");
        assert_eq!(token, "secret-token");

        let token = extract_bearer(&headers_with("secret-token"), &state).expect("token");
        assert_eq!(token, "secret-token");
    }

    #[tokio::test]
    async fn extract_bearer_rejects_missing_or_empty() {
        let state = state_for_tests();
        assert!(extract_bearer(&HeaderMap::new(), &state).is_err());
        assert!(extract_bearer(&headers_with("Bearer "), &state).is_err());
    }
}
