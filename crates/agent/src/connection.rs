//! The agent side of the console channel.
//!
//! `Disconnected -> Connecting -> Connected -> (Disconnected | Connecting)`:
//! every (re)connection re-runs the handshake before anything else, the
//! attempt counter resets on a successful handshake, and after the attempt
//! budget is exhausted the agent stays disconnected until restarted.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use proxyfleet_common::proto::{AgentMessage, ConsoleMessage};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::applier;
use crate::config::channel_url;
use crate::state::{self, SharedState};
use crate::telemetry;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

enum ServeEnd {
    /// Shutdown was requested.
    Shutdown,
    /// The connection dropped after a completed handshake.
    LostAfterHandshake,
    /// Connecting or handshaking failed.
    ConnectFailed,
}

/// Runs the channel until shutdown or until the reconnect budget is spent.
pub async fn connection_loop(
    state: SharedState,
    mut shutdown: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let (delay, max_attempts) = {
        let guard = state.lock().await;
        (
            Duration::from_secs(guard.cfg.reconnect_delay_secs),
            guard.cfg.reconnect_max_attempts,
        )
    };

    let mut attempts: u32 = 0;
    loop {
        if *shutdown.borrow() {
            return Ok(());
        }

        match connect_and_serve(&state, &mut shutdown).await {
            ServeEnd::Shutdown => return Ok(()),
            ServeEnd::LostAfterHandshake => {
                attempts = 0;
                telemetry::record_disconnect();
            }
            ServeEnd::ConnectFailed => {}
        }

        attempts += 1;
        if attempts > max_attempts {
            warn!(
                attempts,
                "reconnect budget exhausted; staying disconnected until restarted"
            );
            anyhow::bail!("reconnect attempts exhausted");
        }

        debug!(attempt = attempts, delay_secs = delay.as_secs(), "reconnecting");
        telemetry::record_reconnect_attempt();
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return Ok(());
                }
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn connect_and_serve(state: &SharedState, shutdown: &mut watch::Receiver<bool>) -> ServeEnd {
    let (url, agent_id, credential, applied_version, handshake_timeout) = {
        let guard = state.lock().await;
        (
            channel_url(&guard.cfg),
            guard.cfg.agent_id,
            guard.cfg.credential.clone(),
            guard.persisted.applied_version,
            Duration::from_secs(guard.cfg.handshake_timeout_secs),
        )
    };

    let mut stream = match connect_async(url.as_str()).await {
        Ok((stream, _response)) => stream,
        Err(err) => {
            warn!(%err, %url, "console connection failed");
            return ServeEnd::ConnectFailed;
        }
    };

    let handshake = AgentMessage::Handshake {
        agent_id,
        credential,
        applied_version,
    };
    if send_message(&mut stream, &handshake).await.is_err() {
        return ServeEnd::ConnectFailed;
    }

    match tokio::time::timeout(handshake_timeout, await_handshake_ack(&mut stream)).await {
        Ok(Some(interval_secs)) => {
            info!(applied_version, heartbeat_interval_secs = interval_secs, "console channel connected");
            telemetry::record_connected();
        }
        Ok(None) => {
            warn!("handshake rejected by console");
            return ServeEnd::ConnectFailed;
        }
        Err(_) => {
            warn!("handshake ack timed out");
            return ServeEnd::ConnectFailed;
        }
    }

    let note = {
        let guard = state.lock().await;
        let documents: usize = guard.persisted.documents.values().map(|bucket| bucket.len()).sum();
        format!("ready; documents={documents}")
    };
    if send_message(&mut stream, &AgentMessage::StatusPush { note })
        .await
        .is_err()
    {
        return ServeEnd::ConnectFailed;
    }

    serve(state, &mut stream, shutdown).await
}

/// Waits for the handshake ack; any other reply (or a transport error) is a
/// rejection.
async fn await_handshake_ack(stream: &mut WsStream) -> Option<u64> {
    loop {
        let message = stream.next().await?.ok()?;
        match message {
            Message::Text(text) => match serde_json::from_str::<ConsoleMessage>(&text) {
                Ok(ConsoleMessage::HandshakeAck {
                    heartbeat_interval_secs,
                }) => return Some(heartbeat_interval_secs),
                Ok(ConsoleMessage::Error { message }) => {
                    warn!(%message, "console rejected handshake");
                    return None;
                }
                Ok(other) => {
                    debug!(?other, "unexpected message before handshake ack");
                    return None;
                }
                Err(err) => {
                    debug!(?err, "unparseable message before handshake ack");
                    return None;
                }
            },
            Message::Ping(_) | Message::Pong(_) => continue,
            _ => return None,
        }
    }
}

async fn serve(
    state: &SharedState,
    stream: &mut WsStream,
    shutdown: &mut watch::Receiver<bool>,
) -> ServeEnd {
    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    let _ = stream.send(Message::Close(None)).await;
                    return ServeEnd::Shutdown;
                }
            }
            incoming = stream.next() => {
                let message = match incoming {
                    Some(Ok(message)) => message,
                    Some(Err(err)) => {
                        warn!(%err, "channel read error");
                        return ServeEnd::LostAfterHandshake;
                    }
                    None => return ServeEnd::LostAfterHandshake,
                };
                match message {
                    Message::Text(text) => {
                        let parsed = match serde_json::from_str::<ConsoleMessage>(&text) {
                            Ok(parsed) => parsed,
                            Err(err) => {
                                debug!(?err, "discarding unparseable channel message");
                                continue;
                            }
                        };
                        if handle_console_message(state, stream, parsed).await.is_err() {
                            return ServeEnd::LostAfterHandshake;
                        }
                    }
                    Message::Close(_) => return ServeEnd::LostAfterHandshake,
                    _ => {}
                }
            }
        }
    }
}

async fn handle_console_message(
    state: &SharedState,
    stream: &mut WsStream,
    message: ConsoleMessage,
) -> anyhow::Result<()> {
    match message {
        ConsoleMessage::Heartbeat { seq } => {
            send_message(stream, &AgentMessage::HeartbeatAck { seq }).await
        }
        ConsoleMessage::ApplyConfig {
            target_version,
            mutations,
        } => {
            let error = {
                let mut guard = state.lock().await;
                match applier::apply_change_set(&mut guard.persisted, target_version, &mutations) {
                    Ok(()) => {
                        if let Err(err) =
                            state::save_persisted(&guard.cfg.state_dir, &guard.persisted)
                        {
                            warn!(?err, "failed to persist state file");
                        }
                        info!(
                            target_version,
                            mutations = mutations.len(),
                            "change set applied"
                        );
                        telemetry::record_apply("ok");
                        None
                    }
                    Err(applier::ApplyError::StaleTarget { target, current }) => {
                        // Already at or past the target (e.g. a replayed
                        // catch-up); report the current version, not an error.
                        debug!(target, current, "ignoring stale change set");
                        None
                    }
                    Err(err) => {
                        warn!(%err, target_version, "change set rejected");
                        telemetry::record_apply("error");
                        Some(err.to_string())
                    }
                }
            };
            let version = {
                let guard = state.lock().await;
                guard.persisted.applied_version
            };
            let report = match error {
                Some(reason) => AgentMessage::Applied {
                    version: target_version,
                    error: Some(reason),
                },
                None => AgentMessage::Applied {
                    version,
                    error: None,
                },
            };
            send_message(stream, &report).await
        }
        ConsoleMessage::Error { message } => {
            warn!(%message, "console reported protocol error");
            anyhow::bail!("console error: {message}");
        }
        ConsoleMessage::HandshakeAck { .. } => Ok(()),
    }
}

async fn send_message(stream: &mut WsStream, message: &AgentMessage) -> anyhow::Result<()> {
    let payload = serde_json::to_string(message)?;
    stream.send(Message::Text(payload)).await?;
    Ok(())
}
