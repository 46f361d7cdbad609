//! Operator-facing agent lifecycle (HTTP wrappers convert into these).

use proxyfleet_common::api::{
    AgentSummary, CreateAgentResponse, RegenerateCredentialResponse,
};
use tracing::info;
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::{ApiResult, AppError};
use crate::persistence::{agents, AgentRecord, NewAgent};
use crate::tokens::{generate_credential, hash_credential};

pub fn to_summary(record: AgentRecord) -> AgentSummary {
    AgentSummary {
        id: record.id,
        name: record.name,
        address: record.address,
        connection_state: record.connection_state.into(),
        status_note: record.status_note,
        last_seen: record.last_seen,
        applied_version: record.applied_version,
        created_at: record.created_at,
        updated_at: record.updated_at,
    }
}

/// Registers an agent and mints its one-time credential. Only the hash is
/// stored; the plaintext leaves this function exactly once.
pub async fn create_agent(state: &AppState, name: &str) -> ApiResult<CreateAgentResponse> {
    let name = name.trim();
    if name.is_empty() {
        return Err(AppError::bad_request("agent name cannot be empty"));
    }
    if name.len() > state.limits.max_field_len {
        return Err(AppError::bad_request("agent name is too long"));
    }

    let credential = generate_credential();
    let credential_hash = hash_credential(&credential, &state.token_pepper)?;

    let record = agents::create_agent(
        &state.db,
        NewAgent {
            id: Uuid::new_v4(),
            name: name.to_string(),
            credential_hash,
        },
    )
    .await?;

    info!(agent_id = %record.id, name = %record.name, "agent registered");

    Ok(CreateAgentResponse {
        agent_id: record.id,
        name: record.name,
        install_command: install_command(state, record.id, &credential),
        credential,
    })
}

pub async fn list_agents(state: &AppState) -> ApiResult<Vec<AgentSummary>> {
    let records = agents::list_agents(&state.db).await?;
    Ok(records.into_iter().map(to_summary).collect())
}

pub async fn get_agent(state: &AppState, agent_id: Uuid) -> ApiResult<AgentSummary> {
    let record = agents::get_agent(&state.db, agent_id)
        .await?
        .ok_or_else(|| AppError::not_found("agent not found"))?;
    Ok(to_summary(record))
}

/// Removes an agent: pending and queued pushes fail with `agent removed`,
/// the live channel is dropped, then the record (and its configuration
/// state) is deleted.
pub async fn remove_agent(state: &AppState, agent_id: Uuid) -> ApiResult<()> {
    agents::get_agent(&state.db, agent_id)
        .await?
        .ok_or_else(|| AppError::not_found("agent not found"))?;

    state.coordinator.cancel_agent(agent_id).await;
    state.hub.disconnect(agent_id).await;
    agents::delete_agent(&state.db, agent_id).await?;

    info!(%agent_id, "agent removed");
    Ok(())
}

/// Replaces the agent's credential. The old credential is rejected from the
/// moment the new hash is stored, and any session authenticated with it is
/// forcibly disconnected; reconnecting requires the new credential.
pub async fn regenerate_credential(
    state: &AppState,
    agent_id: Uuid,
) -> ApiResult<RegenerateCredentialResponse> {
    agents::get_agent(&state.db, agent_id)
        .await?
        .ok_or_else(|| AppError::not_found("agent not found"))?;

    let credential = generate_credential();
    let credential_hash = hash_credential(&credential, &state.token_pepper)?;
    let updated = agents::update_credential_hash(&state.db, agent_id, &credential_hash).await?;
    if updated == 0 {
        return Err(AppError::not_found("agent not found"));
    }

    state.hub.disconnect(agent_id).await;
    info!(%agent_id, "agent credential regenerated");

    Ok(RegenerateCredentialResponse {
        install_command: install_command(state, agent_id, &credential),
        credential,
    })
}

/// One-line install command embedding the console URL and the one-time
/// credential, mirroring what the registration screen hands operators.
pub fn install_command(state: &AppState, agent_id: Uuid, credential: &str) -> String {
    format!(
        "curl -fsSL {url}/install.sh | PROXYFLEET_AGENT__CONSOLE_URL={url} \
         PROXYFLEET_AGENT__AGENT_ID={agent_id} PROXYFLEET_AGENT__CREDENTIAL={credential} sh",
        url = state.advertised_url,
    )
}
