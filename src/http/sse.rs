//! SSE stream adapter over the event bus.
//!
//! Each subscriber gets a `connected` event first, then lifecycle events as
//! `event: <type>` / `data: <json>` frames, with a `heartbeat` event every
//! 30 seconds. Dropping the response stream (client disconnect) cancels the
//! heartbeat interval and releases the bus subscription exactly once via the
//! subscription guard.

use axum::{
    extract::{Query, State},
    http::{header, HeaderMap},
    response::sse::{Event, Sse},
    response::IntoResponse,
};
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use std::convert::Infallible;
use std::time::Duration;
use tokio_stream::wrappers::IntervalStream;

use super::{resolve_project, ApiResult, AppState};

/// Heartbeat cadence.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
pub struct EventsQuery {
    subject_id: Option<String>,
}

pub async fn subscribe_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<EventsQuery>,
) -> ApiResult<impl IntoResponse> {
    let project = resolve_project(&headers, &state)?;
    // "*" and absent both mean the project-wide wildcard
    let subject = query
        .subject_id
        .filter(|s| !s.trim().is_empty() && s != "*");

    let subscription = state.bus.subscribe(&project, subject.as_deref());
    tracing::debug!(project = %project, subject = subject.as_deref().unwrap_or("*"), "SSE subscriber connected");

    let connected = Event::default().event("connected").data(
        serde_json::json!({
            "project_id": project,
            "subject_id": subject,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        })
        .to_string(),
    );

    // The subscription (and its unsubscribe-on-drop guard) lives inside the
    // unfold state, so client disconnect tears it down with the stream.
    let lifecycle = stream::unfold(subscription, |mut subscription| async move {
        let event = subscription.events.recv().await?;
        let frame = Event::default()
            .event(event.event_type.clone())
            .data(serde_json::to_string(&*event).unwrap_or_else(|_| "{}".into()));
        Some((frame, subscription))
    });

    let first_beat = tokio::time::Instant::now() + HEARTBEAT_INTERVAL;
    let heartbeats = IntervalStream::new(tokio::time::interval_at(first_beat, HEARTBEAT_INTERVAL))
        .map(|_| {
            Event::default().event("heartbeat").data(
                serde_json::json!({ "timestamp": chrono::Utc::now().to_rfc3339() }).to_string(),
            )
        });

    let events = stream::once(async move { connected })
        .chain(stream::select(lifecycle, heartbeats))
        .map(Ok::<_, Infallible>);

    // axum sets text/event-stream and no-cache on its own; proxies also need
    // the no-transform directive to leave the stream unbuffered
    Ok((
        [(header::CACHE_CONTROL, "no-cache, no-transform")],
        Sse::new(events),
    ))
}
