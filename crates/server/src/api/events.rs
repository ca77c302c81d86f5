//! `GET /v1/issues/:id/events` — SSE stream onto the Event Bus filtered to
//! one issue, with a 15s heartbeat so clients can detect a stale
//! connection (§6).

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use futures_util::stream::Stream;
use uuid::Uuid;

use crate::state::AppState;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

pub async fn issue_events(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.events.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                event = rx.recv() => {
                    match event {
                        Ok(event) if event.issue_id() == Some(id) || event.issue_id().is_none() => {
                            if let Ok(payload) = serde_json::to_string(&event) {
                                yield Ok(SseEvent::default().data(payload));
                            }
                        }
                        Ok(_) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
                _ = tokio::time::sleep(HEARTBEAT_INTERVAL) => {
                    yield Ok(SseEvent::default().event("heartbeat").data(""));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
