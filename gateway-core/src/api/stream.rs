//! `GET /api/runs/:id/logs/stream` (§6): live tool-call log tail for one
//! agent, delivered over SSE. `:id` names the agent whose channel on
//! [`crate::sse::SseBroadcaster`] carries its proxy events (see
//! `api::proxy::proxy_request`, which publishes to that same channel).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt as _;
use uuid::Uuid;

use crate::sse::ConnectionId;
use crate::state::AppState;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// `GET /api/runs/:id/logs/stream`. `Last-Event-ID` is accepted for
/// compatibility with reconnecting clients; the broadcaster only fans out
/// events published after subscription, so a resumed stream picks up from
/// "now" rather than replaying the gap.
pub async fn stream_logs(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let _last_event_id = headers
        .get("last-event-id")
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let channel = id.to_string();
    let receiver = state.log_broadcaster().subscribe_channel(&channel).await;
    let connection_id = ConnectionId::new();
    state
        .log_broadcaster()
        .register_with_channels(connection_id, vec![channel])
        .await;

    let stream = BroadcastStream::new(receiver).filter_map(|message| match message {
        Ok(message) => {
            let mut event = Event::default().data(message.data);
            if let Some(event_type) = message.event_type {
                event = event.event(event_type);
            }
            if let Some(id) = message.id {
                event = event.id(id);
            }
            Some(Ok(event))
        }
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEPALIVE_INTERVAL).text("keepalive"))
}
