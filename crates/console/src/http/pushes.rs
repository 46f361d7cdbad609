use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use proxyfleet_common::api::{PushStatusResponse, PushSubmitRequest, PushSubmitResponse};
use tower_http::limit::RequestBodyLimitLayer;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};

pub fn router(state: &AppState) -> Router<AppState> {
    let push_limit = state.limits.push_body_bytes;
    Router::new()
        .route(
            "/api/v1/agents/{agent_id}/pushes",
            post(submit_push).layer(RequestBodyLimitLayer::new(push_limit as usize)),
        )
        .route(
            "/api/v1/agents/{agent_id}/pushes/status",
            get(push_status),
        )
}

#[utoipa::path(
    post,
    path = "/api/v1/agents/{agent_id}/pushes",
    params(("agent_id" = Uuid, Path, description = "Agent identifier")),
    request_body = PushSubmitRequest,
    responses(
        (status = 202, description = "Push accepted with its target version", body = PushSubmitResponse),
        (status = 400, description = "Structurally invalid push or unknown protocol"),
        (status = 404, description = "Unknown agent"),
        (status = 422, description = "Document failed validation", body = proxyfleet_common::api::ValidationErrorBody)
    ),
    security(("operatorBearer" = [])),
    tag = "pushes"
)]
pub(crate) async fn submit_push(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
    Json(req): Json<PushSubmitRequest>,
) -> ApiResult<(StatusCode, Json<PushSubmitResponse>)> {
    if req.mutations.len() > state.limits.max_mutations_per_push {
        return Err(AppError::bad_request(format!(
            "push exceeds {} mutations",
            state.limits.max_mutations_per_push
        )));
    }
    let response = state.coordinator.submit(agent_id, req.mutations).await?;
    Ok((StatusCode::ACCEPTED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/agents/{agent_id}/pushes/status",
    params(("agent_id" = Uuid, Path, description = "Agent identifier")),
    responses(
        (status = 200, description = "Queue depth, in-flight push, applied version", body = PushStatusResponse),
        (status = 404, description = "Unknown agent")
    ),
    security(("operatorBearer" = [])),
    tag = "pushes"
)]
pub(crate) async fn push_status(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> ApiResult<Json<PushStatusResponse>> {
    Ok(Json(state.coordinator.status(agent_id).await?))
}
