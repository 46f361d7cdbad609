//! Shared API DTOs used across console, agent, and tests.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::proto::ConfigMutation;

/// Channel connection state reported for an agent (wire format uses
/// lowercase values).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// A live channel is established and authenticated.
    Connected,
    /// No live channel.
    Disconnected,
}

impl ConnectionState {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connected => "connected",
            ConnectionState::Disconnected => "disconnected",
        }
    }
}

/// Lifecycle state of a push request.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PushState {
    /// Accepted, waiting behind earlier pushes or for the agent to connect.
    Queued,
    /// Delivered to the agent; awaiting the applied-version advance.
    Pending,
    /// The agent reported an applied version at or past the target.
    Confirmed,
    /// The agent reported an application error, or the agent was removed.
    Failed,
    /// The confirmation deadline elapsed.
    TimedOut,
}

impl PushState {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            PushState::Queued => "queued",
            PushState::Pending => "pending",
            PushState::Confirmed => "confirmed",
            PushState::Failed => "failed",
            PushState::TimedOut => "timedout",
        }
    }

    /// Whether the state is terminal (no further transitions).
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PushState::Confirmed | PushState::Failed | PushState::TimedOut
        )
    }
}

/// Agent record as reported to operators.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct AgentSummary {
    /// Agent identifier.
    pub id: Uuid,
    /// Display name chosen at registration.
    pub name: String,
    /// Network address learned from the agent's channel, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    /// Current channel state.
    pub connection_state: ConnectionState,
    /// Free-form note from the agent's latest status push.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_note: Option<String>,
    /// When the agent was last heard from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
    /// Last configuration version the agent confirmed as applied.
    pub applied_version: i64,
    /// Registration time.
    pub created_at: DateTime<Utc>,
    /// Last record update time.
    pub updated_at: DateTime<Utc>,
}

/// Request to register a new agent.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateAgentRequest {
    /// Display name; must be unique.
    pub name: String,
}

/// Response to agent registration. The credential is displayed exactly once
/// and can never be retrieved again, only regenerated.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateAgentResponse {
    /// Identifier of the new agent.
    pub agent_id: Uuid,
    /// Display name.
    pub name: String,
    /// One-time credential for the agent's channel handshake.
    pub credential: String,
    /// Shell command that installs and starts the agent with this credential.
    pub install_command: String,
}

/// Response to credential regeneration. The previous credential is rejected
/// from the moment this response is produced.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct RegenerateCredentialResponse {
    /// Replacement one-time credential.
    pub credential: String,
    /// Install command refreshed with the new credential.
    pub install_command: String,
}

/// Push submission payload.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PushSubmitRequest {
    /// Mutations to deliver, in application order.
    pub mutations: Vec<ConfigMutation>,
}

/// Response to push submission.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PushSubmitResponse {
    /// Identifier of the accepted push.
    pub push_id: Uuid,
    /// Configuration version the agent must reach for confirmation.
    pub target_version: i64,
    /// Initial push state.
    pub state: PushState,
}

/// Point-in-time view of one push request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, ToSchema)]
pub struct PushSnapshot {
    /// Push identifier.
    pub push_id: Uuid,
    /// Target configuration version.
    pub target_version: i64,
    /// Current state.
    pub state: PushState,
    /// Submission time.
    pub submitted_at: DateTime<Utc>,
    /// Failure reason when `state` is `failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response to a push status query.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PushStatusResponse {
    /// Pushes queued behind the in-flight one.
    pub queue_depth: usize,
    /// The push currently awaiting delivery or confirmation, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub in_flight: Option<PushSnapshot>,
    /// The most recently resolved push, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_resolved: Option<PushSnapshot>,
    /// The agent's last confirmed applied version.
    pub applied_version: i64,
}

/// One field-level validation error.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct FieldErrorEntry {
    /// Dot/index path of the offending field.
    pub path: String,
    /// Human-readable message.
    pub message: String,
}

/// Body returned when a submitted document fails validation.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ValidationErrorBody {
    /// Stable machine-readable code (`validation_failed`).
    pub code: String,
    /// Field-level errors in schema order.
    pub errors: Vec<FieldErrorEntry>,
}

/// Observer feed event names.
pub mod events {
    /// An agent's channel completed its handshake.
    pub const AGENT_CONNECTED: &str = "agent_connected";
    /// An agent's channel closed.
    pub const AGENT_DISCONNECTED: &str = "agent_disconnected";
    /// A push was confirmed.
    pub const PUSH_CONFIRMED: &str = "push_confirmed";
    /// A push failed.
    pub const PUSH_FAILED: &str = "push_failed";
    /// A push timed out.
    pub const PUSH_TIMED_OUT: &str = "push_timed_out";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_state_terminality() {
        assert!(!PushState::Queued.is_terminal());
        assert!(!PushState::Pending.is_terminal());
        assert!(PushState::Confirmed.is_terminal());
        assert!(PushState::Failed.is_terminal());
        assert!(PushState::TimedOut.is_terminal());
    }

    #[test]
    fn agent_summary_omits_empty_optionals() {
        let summary = AgentSummary {
            id: Uuid::nil(),
            name: "edge-1".into(),
            address: None,
            connection_state: ConnectionState::Disconnected,
            status_note: None,
            last_seen: None,
            applied_version: 0,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let value = serde_json::to_value(&summary).expect("serialize");
        assert!(value.get("address").is_none());
        assert!(value.get("last_seen").is_none());
        assert_eq!(value["connection_state"], "disconnected");
    }
}
