//! Messages exchanged over the persistent console⇄agent channel.
//!
//! The transport is message-oriented: each WebSocket text frame carries one
//! JSON-encoded [`AgentMessage`] or [`ConsoleMessage`]. A connection must
//! complete the `handshake`/`handshake-ack` exchange before any other
//! message is accepted; reconnecting always re-runs the handshake.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of configuration object managed per agent.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConfigKind {
    /// Inbound listener.
    Inbound,
    /// Outbound route.
    Outbound,
    /// Routing rule.
    Routing,
    /// Load balancer.
    Balancer,
}

impl ConfigKind {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigKind::Inbound => "inbound",
            ConfigKind::Outbound => "outbound",
            ConfigKind::Routing => "routing",
            ConfigKind::Balancer => "balancer",
        }
    }
}

/// Operation applied to one configuration document.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum MutationOp {
    /// Create a new document.
    Create,
    /// Merge a partial document into an existing one.
    Update,
    /// Delete an existing document.
    Delete,
}

impl MutationOp {
    /// Returns the canonical lowercase representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationOp::Create => "create",
            MutationOp::Update => "update",
            MutationOp::Delete => "delete",
        }
    }
}

/// One configuration document mutation inside a push.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, utoipa::ToSchema)]
pub struct ConfigMutation {
    /// Operation to perform.
    pub op: MutationOp,
    /// Kind of the target document.
    pub kind: ConfigKind,
    /// Tag of the target document (unique within its kind per agent).
    pub tag: String,
    /// Document contents; full for `create`, partial for `update`, absent
    /// for `delete`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document: Option<Value>,
}

/// Messages sent by an agent to the console.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AgentMessage {
    /// Credential exchange; must be the first message on every connection.
    Handshake {
        /// Agent identity.
        agent_id: Uuid,
        /// Opaque credential issued at registration.
        credential: String,
        /// Version the agent currently has applied.
        applied_version: i64,
    },
    /// Response to a console heartbeat.
    HeartbeatAck {
        /// Sequence number echoed from the heartbeat.
        seq: u64,
    },
    /// Reports the outcome of an `apply-config` message.
    Applied {
        /// New applied version on success; the attempted target on failure.
        version: i64,
        /// Application error, passed through to the push verbatim.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Agent-initiated note about connectivity-affecting events.
    StatusPush {
        /// Free-form status note, surfaced in the agent listing.
        note: String,
    },
}

/// Messages sent by the console to an agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConsoleMessage {
    /// Accepts a handshake and hands the agent its channel parameters.
    HandshakeAck {
        /// Interval at which the console will send heartbeats.
        heartbeat_interval_secs: u64,
    },
    /// Liveness probe; the agent must answer with `heartbeat-ack`.
    Heartbeat {
        /// Monotonic per-connection sequence number.
        seq: u64,
    },
    /// Delivers one versioned change set.
    ApplyConfig {
        /// Version the agent should report once the change set is applied.
        target_version: i64,
        /// Mutations in application order.
        mutations: Vec<ConfigMutation>,
    },
    /// Fatal protocol error; the console closes the connection after this.
    Error {
        /// Human-readable reason.
        message: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn handshake_wire_format_is_tagged_kebab_case() {
        let msg = AgentMessage::Handshake {
            agent_id: Uuid::nil(),
            credential: "secret".into(),
            applied_version: 3,
        };
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["type"], "handshake");
        assert_eq!(value["applied_version"], 3);
    }

    #[test]
    fn apply_config_round_trips() {
        let msg = ConsoleMessage::ApplyConfig {
            target_version: 7,
            mutations: vec![ConfigMutation {
                op: MutationOp::Create,
                kind: ConfigKind::Inbound,
                tag: "vless-in".into(),
                document: Some(json!({"tag": "vless-in", "port": 443})),
            }],
        };
        let encoded = serde_json::to_string(&msg).expect("serialize");
        let decoded: ConsoleMessage = serde_json::from_str(&encoded).expect("deserialize");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn applied_omits_absent_error() {
        let msg = AgentMessage::Applied {
            version: 5,
            error: None,
        };
        let value = serde_json::to_value(&msg).expect("serialize");
        assert_eq!(value["type"], "applied");
        assert!(value.get("error").is_none());
    }

    #[test]
    fn delete_mutation_omits_document() {
        let mutation = ConfigMutation {
            op: MutationOp::Delete,
            kind: ConfigKind::Routing,
            tag: "block-ads".into(),
            document: None,
        };
        let value = serde_json::to_value(&mutation).expect("serialize");
        assert_eq!(value["op"], "delete");
        assert_eq!(value["kind"], "routing");
        assert!(value.get("document").is_none());
    }
}
