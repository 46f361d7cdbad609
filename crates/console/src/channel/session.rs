//! Per-agent session task behind the WebSocket upgrade.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket};
use proxyfleet_common::proto::{AgentMessage, ConfigMutation, ConsoleMessage, MutationOp};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::events::Event;
use crate::persistence::{agents, configs, ConnectionState};
use crate::telemetry;
use crate::tokens;

/// Drives one agent connection from upgrade to close.
pub async fn run_session(state: AppState, socket: WebSocket, peer: Option<SocketAddr>) {
    let mut socket = socket;

    let handshake_timeout = Duration::from_secs(state.channel.handshake_timeout_secs);
    let agent_id = match await_handshake(&state, &mut socket, handshake_timeout).await {
        Ok(agent_id) => agent_id,
        Err(reason) => {
            telemetry::record_handshake_rejected(reason);
            debug!(reason, "channel handshake rejected");
            let _ = socket
                .send(close_error_frame(&format!("handshake failed: {reason}")))
                .await;
            return;
        }
    };

    let (outbox_tx, mut outbox_rx) = mpsc::channel(state.channel.outbox_capacity);
    let (session_id, mut close_rx) = state.hub.register(agent_id, outbox_tx).await;

    if let Err(err) = agents::update_connection_state(
        &state.db,
        agent_id,
        ConnectionState::Connected,
        Some(chrono::Utc::now()),
    )
    .await
    {
        warn!(?err, %agent_id, "failed to mark agent connected");
    }
    if let Some(peer) = peer {
        if let Err(err) = agents::update_address(&state.db, agent_id, &peer.to_string()).await {
            warn!(?err, %agent_id, "failed to record agent address");
        }
    }

    let applied_version = agents::get_agent(&state.db, agent_id)
        .await
        .ok()
        .flatten()
        .map(|record| record.applied_version)
        .unwrap_or(0);

    telemetry::record_agent_connected(state.hub.connected_count().await);
    state.events.publish(Event::AgentConnected {
        agent_id,
        applied_version,
    });
    info!(%agent_id, applied_version, "agent channel connected");

    if let Err(err) = send_catch_up(&state, agent_id, applied_version).await {
        warn!(?err, %agent_id, "failed to queue catch-up change set");
    }

    let heartbeat_interval = Duration::from_secs(state.channel.heartbeat_interval_secs);
    let heartbeat_grace = Duration::from_secs(state.channel.heartbeat_grace_secs);
    let mut ticker = tokio::time::interval(heartbeat_interval);
    // The first tick fires immediately; the connection just authenticated,
    // so skip it.
    ticker.tick().await;

    let mut last_ack = Instant::now();
    let mut heartbeat_seq: u64 = 0;

    let disconnect_reason = loop {
        tokio::select! {
            changed = close_rx.changed() => {
                if changed.is_err() || *close_rx.borrow() {
                    break "closed";
                }
            }
            outgoing = outbox_rx.recv() => {
                let Some(message) = outgoing else {
                    break "closed";
                };
                if send_message(&mut socket, &message).await.is_err() {
                    break "transport_error";
                }
            }
            _ = ticker.tick() => {
                if last_ack.elapsed() > heartbeat_grace {
                    telemetry::record_heartbeat_timeout();
                    warn!(%agent_id, "heartbeat ack overdue, dropping channel");
                    break "heartbeat_timeout";
                }
                heartbeat_seq += 1;
                let heartbeat = ConsoleMessage::Heartbeat { seq: heartbeat_seq };
                if send_message(&mut socket, &heartbeat).await.is_err() {
                    break "transport_error";
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<AgentMessage>(text.as_str()) {
                            Ok(message) => {
                                if let Some(reason) =
                                    handle_agent_message(&state, agent_id, &mut last_ack, message).await
                                {
                                    let _ = socket.send(close_error_frame(reason)).await;
                                    break "protocol_error";
                                }
                            }
                            Err(err) => {
                                debug!(?err, %agent_id, "discarding unparseable channel message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break "agent_closed",
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(?err, %agent_id, "channel read error");
                        break "transport_error";
                    }
                }
            }
        }
    };

    let removed = state.hub.unregister(agent_id, session_id).await;
    if removed {
        if let Err(err) =
            agents::update_connection_state(&state.db, agent_id, ConnectionState::Disconnected, None)
                .await
        {
            warn!(?err, %agent_id, "failed to mark agent disconnected");
        }
        telemetry::record_agent_disconnected(state.hub.connected_count().await, disconnect_reason);
        state.events.publish(Event::AgentDisconnected { agent_id });
        info!(%agent_id, reason = disconnect_reason, "agent channel disconnected");
    }
}

/// Waits for the handshake, authenticates it, and acknowledges it.
/// Returns a rejection reason on any failure.
async fn await_handshake(
    state: &AppState,
    socket: &mut WebSocket,
    timeout: Duration,
) -> Result<Uuid, &'static str> {
    let first = tokio::time::timeout(timeout, socket.recv())
        .await
        .map_err(|_| "handshake_timeout")?;

    let Some(Ok(Message::Text(text))) = first else {
        return Err("no_handshake");
    };
    let message: AgentMessage =
        serde_json::from_str(text.as_str()).map_err(|_| "malformed_handshake")?;
    let AgentMessage::Handshake {
        agent_id,
        credential,
        applied_version,
    } = message
    else {
        return Err("handshake_expected_first");
    };

    let record = agents::get_agent(&state.db, agent_id)
        .await
        .map_err(|_| "storage_error")?
        .ok_or("unknown_agent")?;

    if !tokens::verify_credential(&credential, &record.credential_hash, &state.token_pepper) {
        return Err("invalid_credential");
    }

    if applied_version > 0 {
        if let Err(err) = agents::advance_applied_version(&state.db, agent_id, applied_version).await
        {
            warn!(?err, %agent_id, "failed to record handshake applied version");
        }
    }

    let ack = ConsoleMessage::HandshakeAck {
        heartbeat_interval_secs: state.channel.heartbeat_interval_secs,
    };
    send_message(socket, &ack)
        .await
        .map_err(|_| "handshake_ack_failed")?;

    Ok(agent_id)
}

/// Handles one post-handshake agent message. Returns a close reason on
/// protocol violations.
async fn handle_agent_message(
    state: &AppState,
    agent_id: Uuid,
    last_ack: &mut Instant,
    message: AgentMessage,
) -> Option<&'static str> {
    match message {
        AgentMessage::HeartbeatAck { seq } => {
            *last_ack = Instant::now();
            debug!(%agent_id, seq, "heartbeat ack");
            if let Err(err) = agents::touch_last_seen(&state.db, agent_id).await {
                warn!(?err, %agent_id, "failed to update last seen");
            }
            None
        }
        AgentMessage::Applied { version, error } => {
            match error {
                Some(reason) => {
                    warn!(%agent_id, version, %reason, "agent reported apply failure");
                    state.coordinator.reports().record_failure(agent_id, version, reason);
                    if let Err(err) = agents::touch_last_seen(&state.db, agent_id).await {
                        warn!(?err, %agent_id, "failed to update last seen");
                    }
                }
                None => {
                    debug!(%agent_id, version, "agent applied version");
                    if let Err(err) =
                        agents::advance_applied_version(&state.db, agent_id, version).await
                    {
                        warn!(?err, %agent_id, "failed to advance applied version");
                    }
                }
            }
            None
        }
        AgentMessage::StatusPush { note } => {
            if let Err(err) = agents::update_status_note(&state.db, agent_id, &note).await {
                warn!(?err, %agent_id, "failed to record status note");
            }
            None
        }
        AgentMessage::Handshake { .. } => Some("unexpected repeated handshake"),
    }
}

/// Replays changes recorded past the agent's applied version as a single
/// ordered change set, so an agent that was offline for earlier pushes
/// still converges.
async fn send_catch_up(state: &AppState, agent_id: Uuid, applied_version: i64) -> crate::Result<()> {
    let changes = configs::list_changes_since(&state.db, agent_id, applied_version).await?;
    if changes.is_empty() {
        return Ok(());
    }

    let target_version = changes.iter().map(|c| c.version).max().unwrap_or(applied_version);
    let mut mutations = Vec::with_capacity(changes.len());
    for change in changes {
        let op = match change.action.as_str() {
            "create" => MutationOp::Create,
            "update" => MutationOp::Update,
            "delete" => MutationOp::Delete,
            other => {
                warn!(%agent_id, action = other, "skipping unknown change action");
                continue;
            }
        };
        let document = change
            .content_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;
        let kind = match change.kind.as_str() {
            "inbound" => proxyfleet_common::proto::ConfigKind::Inbound,
            "outbound" => proxyfleet_common::proto::ConfigKind::Outbound,
            "routing" => proxyfleet_common::proto::ConfigKind::Routing,
            "balancer" => proxyfleet_common::proto::ConfigKind::Balancer,
            other => {
                warn!(%agent_id, kind = other, "skipping unknown change kind");
                continue;
            }
        };
        mutations.push(ConfigMutation {
            op,
            kind,
            tag: change.tag,
            document,
        });
    }

    info!(
        %agent_id,
        target_version,
        mutations = mutations.len(),
        "sending catch-up change set"
    );
    if let Err(err) = state
        .hub
        .send(
            agent_id,
            ConsoleMessage::ApplyConfig {
                target_version,
                mutations,
            },
        )
        .await
    {
        warn!(?err, %agent_id, "failed to queue catch-up change set");
    }
    Ok(())
}

async fn send_message(socket: &mut WebSocket, message: &ConsoleMessage) -> crate::Result<()> {
    let payload = serde_json::to_string(message)?;
    socket.send(Message::Text(payload.into())).await?;
    Ok(())
}

fn close_error_frame(message: &str) -> Message {
    let error = ConsoleMessage::Error {
        message: message.to_string(),
    };
    let payload = serde_json::to_string(&error).unwrap_or_else(|_| String::from("{}"));
    Message::Text(payload.into())
}
