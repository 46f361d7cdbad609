use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use axum::routing::any;
use axum::Router;

use crate::app_state::AppState;
use crate::channel::session;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/channel", any(agent_channel))
}

/// Upgrades an agent connection; authentication happens inside the
/// handshake message, so reconnects always re-authenticate.
pub(crate) async fn agent_channel(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: WebSocketUpgrade,
) -> Response {
    let peer = Some(addr);
    ws.on_upgrade(move |socket| session::run_session(state, socket, peer))
}
