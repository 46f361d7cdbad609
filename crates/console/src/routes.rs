use axum::routing::get;
use axum::{middleware, Router};
use tower_http::trace::TraceLayer;

use crate::app_state::AppState;
use crate::http;

/// Assembles the full console router. Operator endpoints sit behind the
/// bearer-token middleware; the agent channel authenticates inside its own
/// handshake; health and metrics are open.
pub fn build_router(state: AppState) -> Router<AppState> {
    let operator_routes = http::agents::router()
        .merge(http::pushes::router(&state))
        .merge(http::schemas::router())
        .merge(http::events::router())
        .layer(middleware::from_fn_with_state(
            state.clone(),
            http::require_operator,
        ));

    Router::new()
        .merge(operator_routes)
        .merge(http::channel::router())
        .route("/health", get(http::healthz))
        .route("/metrics", get(http::metrics))
        .layer(TraceLayer::new_for_http())
}
