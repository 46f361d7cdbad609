//! Observer feed: named events published to any interested collaborator
//! (dashboards, logs) without polling.

use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use proxyfleet_common::api::events;

/// One observer feed event.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    AgentConnected {
        agent_id: Uuid,
        applied_version: i64,
    },
    AgentDisconnected {
        agent_id: Uuid,
    },
    PushConfirmed {
        agent_id: Uuid,
        push_id: Uuid,
        version: i64,
    },
    PushFailed {
        agent_id: Uuid,
        push_id: Uuid,
        version: i64,
        reason: String,
    },
    PushTimedOut {
        agent_id: Uuid,
        push_id: Uuid,
        version: i64,
    },
}

impl Event {
    /// Stable event name used on the wire (SSE event field).
    pub fn name(&self) -> &'static str {
        match self {
            Event::AgentConnected { .. } => events::AGENT_CONNECTED,
            Event::AgentDisconnected { .. } => events::AGENT_DISCONNECTED,
            Event::PushConfirmed { .. } => events::PUSH_CONFIRMED,
            Event::PushFailed { .. } => events::PUSH_FAILED,
            Event::PushTimedOut { .. } => events::PUSH_TIMED_OUT,
        }
    }

    /// The agent the event concerns.
    pub fn agent_id(&self) -> Uuid {
        match self {
            Event::AgentConnected { agent_id, .. }
            | Event::AgentDisconnected { agent_id }
            | Event::PushConfirmed { agent_id, .. }
            | Event::PushFailed { agent_id, .. }
            | Event::PushTimedOut { agent_id, .. } => *agent_id,
        }
    }
}

/// One-to-many event fan-out. Slow subscribers lag and skip, they never
/// block publishers.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publishes an event; a feed with no subscribers drops it silently.
    pub fn publish(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
