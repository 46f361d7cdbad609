//! The console side of the persistent agent channel.
//!
//! One authenticated WebSocket session per agent. The [`ChannelHub`] tracks
//! live sessions so the push coordinator can deliver `apply-config`
//! messages; each session task owns its socket, its heartbeat timer, and
//! the registry updates for its agent.

pub mod session;

use std::collections::HashMap;
use std::sync::Arc;

use proxyfleet_common::proto::ConsoleMessage;
use tokio::sync::{mpsc, watch, RwLock};
use uuid::Uuid;

/// Channel-level delivery failure.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ChannelError {
    /// No live session for the agent.
    #[error("agent is not connected")]
    NotConnected,
    /// The session's outgoing buffer is full.
    #[error("agent outbox is full")]
    Backpressure,
}

/// Handle to one live session, held by the hub.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    session_id: Uuid,
    outbox: mpsc::Sender<ConsoleMessage>,
    close: Arc<watch::Sender<bool>>,
}

impl SessionHandle {
    fn new(outbox: mpsc::Sender<ConsoleMessage>) -> (Self, watch::Receiver<bool>) {
        let (close_tx, close_rx) = watch::channel(false);
        (
            Self {
                session_id: Uuid::new_v4(),
                outbox,
                close: Arc::new(close_tx),
            },
            close_rx,
        )
    }

    /// Asks the owning session task to shut down.
    pub fn request_close(&self) {
        let _ = self.close.send(true);
    }

    fn session_id(&self) -> Uuid {
        self.session_id
    }
}

/// Registry of live agent sessions.
#[derive(Debug, Clone, Default)]
pub struct ChannelHub {
    sessions: Arc<RwLock<HashMap<Uuid, SessionHandle>>>,
}

impl ChannelHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new session for an agent, returning its close signal.
    /// An existing session for the same agent is displaced and told to
    /// close: the newest authenticated connection wins.
    pub async fn register(
        &self,
        agent_id: Uuid,
        outbox: mpsc::Sender<ConsoleMessage>,
    ) -> (Uuid, watch::Receiver<bool>) {
        let (handle, close_rx) = SessionHandle::new(outbox);
        let session_id = handle.session_id();
        let displaced = {
            let mut sessions = self.sessions.write().await;
            sessions.insert(agent_id, handle)
        };
        if let Some(old) = displaced {
            old.request_close();
        }
        (session_id, close_rx)
    }

    /// Removes the agent's session if it is still the given one. Returns
    /// whether a removal happened (a replaced session must not clobber its
    /// successor's registry state).
    pub async fn unregister(&self, agent_id: Uuid, session_id: Uuid) -> bool {
        let mut sessions = self.sessions.write().await;
        match sessions.get(&agent_id) {
            Some(current) if current.session_id() == session_id => {
                sessions.remove(&agent_id);
                true
            }
            _ => false,
        }
    }

    /// Queues a message for the agent without blocking the caller.
    pub async fn send(&self, agent_id: Uuid, message: ConsoleMessage) -> Result<(), ChannelError> {
        let sessions = self.sessions.read().await;
        let handle = sessions.get(&agent_id).ok_or(ChannelError::NotConnected)?;
        handle
            .outbox
            .try_send(message)
            .map_err(|_| ChannelError::Backpressure)
    }

    /// Tells the agent's session to close, if one exists.
    pub async fn disconnect(&self, agent_id: Uuid) {
        let sessions = self.sessions.read().await;
        if let Some(handle) = sessions.get(&agent_id) {
            handle.request_close();
        }
    }

    pub async fn is_connected(&self, agent_id: Uuid) -> bool {
        self.sessions.read().await.contains_key(&agent_id)
    }

    pub async fn connected_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proxyfleet_common::proto::ConsoleMessage;

    #[tokio::test]
    async fn send_requires_a_registered_session() {
        let hub = ChannelHub::new();
        let agent_id = Uuid::new_v4();
        assert_eq!(
            hub.send(agent_id, ConsoleMessage::Heartbeat { seq: 1 }).await,
            Err(ChannelError::NotConnected)
        );

        let (tx, mut rx) = mpsc::channel(4);
        hub.register(agent_id, tx).await;
        hub.send(agent_id, ConsoleMessage::Heartbeat { seq: 1 })
            .await
            .expect("send");
        assert_eq!(rx.recv().await, Some(ConsoleMessage::Heartbeat { seq: 1 }));
    }

    #[tokio::test]
    async fn full_outbox_reports_backpressure() {
        let hub = ChannelHub::new();
        let agent_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(1);
        hub.register(agent_id, tx).await;

        hub.send(agent_id, ConsoleMessage::Heartbeat { seq: 1 })
            .await
            .expect("first fits");
        assert_eq!(
            hub.send(agent_id, ConsoleMessage::Heartbeat { seq: 2 }).await,
            Err(ChannelError::Backpressure)
        );
    }

    #[tokio::test]
    async fn newest_session_displaces_and_closes_the_old_one() {
        let hub = ChannelHub::new();
        let agent_id = Uuid::new_v4();

        let (tx_old, _rx_old) = mpsc::channel(4);
        let (old_session, mut old_close) = hub.register(agent_id, tx_old).await;

        let (tx_new, mut rx_new) = mpsc::channel(4);
        let (new_session, _new_close) = hub.register(agent_id, tx_new).await;

        old_close.changed().await.expect("close signal");
        assert!(*old_close.borrow());

        // The displaced session must not remove its successor.
        assert!(!hub.unregister(agent_id, old_session).await);
        assert!(hub.is_connected(agent_id).await);

        hub.send(agent_id, ConsoleMessage::Heartbeat { seq: 7 })
            .await
            .expect("send to new session");
        assert_eq!(rx_new.recv().await, Some(ConsoleMessage::Heartbeat { seq: 7 }));

        assert!(hub.unregister(agent_id, new_session).await);
        assert!(!hub.is_connected(agent_id).await);
    }

    #[tokio::test]
    async fn disconnect_signals_the_live_session() {
        let hub = ChannelHub::new();
        let agent_id = Uuid::new_v4();
        let (tx, _rx) = mpsc::channel(4);
        let (_session, mut close) = hub.register(agent_id, tx).await;

        hub.disconnect(agent_id).await;
        close.changed().await.expect("close signal");
        assert!(*close.borrow());
    }
}
