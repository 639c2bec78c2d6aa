//! `GET /api/v1/events/{group}` — realtime event stream (§4.4),
//! grounded on the teacher corpus's SSE pattern of wrapping a broadcast
//! receiver in a `Stream` via `tokio_stream::wrappers::BroadcastStream`.

use super::AppState;
use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

pub async fn stream_events(
    State(state): State<AppState>,
    Path(group): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let receiver = state.events.subscribe(&group);
    let stream = BroadcastStream::new(receiver).filter_map(|item| match item {
        Ok(event) => {
            let json = serde_json::to_string(&event).unwrap_or_else(|_| "{}".to_string());
            Some(Ok(Event::default().data(json)))
        }
        // A lagging subscriber drops the oldest events; the connection
        // stays open rather than erroring out.
        Err(_) => None,
    });

    Sse::new(stream).keep_alive(KeepAlive::new().interval(Duration::from_secs(15)))
}
