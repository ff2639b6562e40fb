//! SSE progress endpoint.
//!
//! GET /api/runs/:session_id/events
//!
//! Replays the session's events from the first one, then follows the run
//! live. Each SSE event is named after the progress event type and carries
//! the event as JSON. The stream ends after the terminal event.

use std::convert::Infallible;

use axum::{
    extract::{Extension, Path},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use tagcheck_core::ProgressEvent;

use crate::server::app::AppState;

pub async fn run_events_handler(
    Extension(state): Extension<AppState>,
    Path(session_id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    let subscription = state
        .hub
        .subscribe(&session_id)
        .await
        .ok_or(StatusCode::NOT_FOUND)?;

    tracing::debug!(session_id = %session_id, "Observer attached");

    let events = subscription
        .into_stream()
        .map(|event| Ok::<_, Infallible>(to_sse(&event)));

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn to_sse(event: &ProgressEvent) -> Event {
    let base = Event::default()
        .event(event.event_type.as_str())
        .id(event.sequence.to_string());

    match serde_json::to_string(event) {
        Ok(data) => base.data(data),
        Err(e) => {
            tracing::warn!(
                error = %e,
                sequence = event.sequence,
                "Failed to serialize progress event"
            );
            base.data("{}")
        }
    }
}
