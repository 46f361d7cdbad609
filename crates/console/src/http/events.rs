use std::convert::Infallible;

use axum::extract::State;
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_util::{Stream, StreamExt};
use tokio_stream::wrappers::BroadcastStream;

use crate::app_state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/events", get(event_feed))
}

/// Observer feed as server-sent events. Subscribers that fall behind skip
/// missed events instead of blocking publishers.
#[utoipa::path(
    get,
    path = "/api/v1/events",
    responses((status = 200, description = "Named SSE events for agent and push lifecycle", content_type = "text/event-stream")),
    security(("operatorBearer" = [])),
    tag = "events"
)]
pub(crate) async fn event_feed(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let stream = BroadcastStream::new(state.events.subscribe()).filter_map(|result| async move {
        let event = result.ok()?;
        let name = event.name();
        let data = serde_json::to_string(&event).ok()?;
        Some(Ok(SseEvent::default().event(name).data(data)))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}
