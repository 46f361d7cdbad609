use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use proxyfleet_common::api::{
    AgentSummary, CreateAgentRequest, CreateAgentResponse, RegenerateCredentialResponse,
};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::ApiResult;
use crate::services::registry;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/agents", post(create_agent).get(list_agents))
        .route("/api/v1/agents/{agent_id}", get(get_agent))
        .route("/api/v1/agents/{agent_id}", delete(remove_agent))
        .route(
            "/api/v1/agents/{agent_id}/credential",
            post(regenerate_credential),
        )
}

#[utoipa::path(
    post,
    path = "/api/v1/agents",
    request_body = CreateAgentRequest,
    responses(
        (status = 201, description = "Agent registered; the credential is shown exactly once", body = CreateAgentResponse),
        (status = 400, description = "Invalid name"),
        (status = 409, description = "Name already taken")
    ),
    security(("operatorBearer" = [])),
    tag = "agents"
)]
pub(crate) async fn create_agent(
    State(state): State<AppState>,
    Json(req): Json<CreateAgentRequest>,
) -> ApiResult<(StatusCode, Json<CreateAgentResponse>)> {
    let response = registry::create_agent(&state, &req.name).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

#[utoipa::path(
    get,
    path = "/api/v1/agents",
    responses((status = 200, description = "Known agents", body = [AgentSummary])),
    security(("operatorBearer" = [])),
    tag = "agents"
)]
pub(crate) async fn list_agents(
    State(state): State<AppState>,
) -> ApiResult<Json<Vec<AgentSummary>>> {
    Ok(Json(registry::list_agents(&state).await?))
}

#[utoipa::path(
    get,
    path = "/api/v1/agents/{agent_id}",
    params(("agent_id" = Uuid, Path, description = "Agent identifier")),
    responses(
        (status = 200, description = "Agent record", body = AgentSummary),
        (status = 404, description = "Unknown agent")
    ),
    security(("operatorBearer" = [])),
    tag = "agents"
)]
pub(crate) async fn get_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> ApiResult<Json<AgentSummary>> {
    Ok(Json(registry::get_agent(&state, agent_id).await?))
}

#[utoipa::path(
    delete,
    path = "/api/v1/agents/{agent_id}",
    params(("agent_id" = Uuid, Path, description = "Agent identifier")),
    responses(
        (status = 204, description = "Agent removed; its channel is dropped and pending pushes fail"),
        (status = 404, description = "Unknown agent")
    ),
    security(("operatorBearer" = [])),
    tag = "agents"
)]
pub(crate) async fn remove_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    registry::remove_agent(&state, agent_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/v1/agents/{agent_id}/credential",
    params(("agent_id" = Uuid, Path, description = "Agent identifier")),
    responses(
        (status = 200, description = "New credential; the previous one is already invalid", body = RegenerateCredentialResponse),
        (status = 404, description = "Unknown agent")
    ),
    security(("operatorBearer" = [])),
    tag = "agents"
)]
pub(crate) async fn regenerate_credential(
    State(state): State<AppState>,
    Path(agent_id): Path<Uuid>,
) -> ApiResult<Json<RegenerateCredentialResponse>> {
    Ok(Json(registry::regenerate_credential(&state, agent_id).await?))
}
