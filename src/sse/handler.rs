//! SSE handler implementation.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
};
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::connection_manager::{
    is_sse_field, ConnectParams, ConnectionId, EventMessage, SseConnection,
};
use crate::error::AppError;
use crate::metrics::LocalMetrics;
use crate::server::{extract_bearer_token, AppState};

/// Payload of the initial `connected` event
#[derive(Debug, Clone, Serialize)]
pub struct ConnectedEvent {
    pub connection_id: ConnectionId,
    pub node_id: String,
}

/// Query parameters for SSE endpoint
#[derive(Debug, Default, Deserialize)]
pub struct SseQuery {
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    /// Comma-separated tags
    pub tags: Option<String>,
}

/// SSE connect handler
#[tracing::instrument(
    name = "sse.connect",
    skip(state, query, headers),
    fields(user_id = ?query.user_id)
)]
pub async fn sse_handler(
    State(state): State<AppState>,
    Query(query): Query<SseQuery>,
    headers: HeaderMap,
) -> Response {
    let params = connect_params(&query, &headers);
    let user_id = params.user_id.clone();

    let (tx, rx) = mpsc::channel::<EventMessage>(state.settings.sse.channel_capacity.max(1));

    // Register connection with limit checking
    let handle = match state.connection_manager.register(params, tx) {
        Ok(h) => h,
        Err(e) => {
            LocalMetrics::record_connection_rejected();
            tracing::warn!(user_id = ?user_id, error = %e, "SSE connection rejected");
            return AppError::from(e).into_response();
        }
    };

    tracing::info!(
        connection_id = handle.id,
        user_id = ?user_id,
        "SSE connection established"
    );

    let connected = ConnectedEvent {
        connection_id: handle.id,
        node_id: state.settings.cluster.node_id.clone(),
    };
    let heartbeat = Duration::from_secs(state.settings.sse.heartbeat_interval.max(1));
    let stream = create_sse_stream(rx, handle, connected, state);

    Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(heartbeat).text("heartbeat"))
        .into_response()
}

/// Build connection identity from query parameters and headers.
/// The access token comes from the query first, then `Authorization: Bearer`.
fn connect_params(query: &SseQuery, headers: &HeaderMap) -> ConnectParams {
    let non_empty = |v: &Option<String>| {
        v.as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };

    let access_token = non_empty(&query.access_token)
        .or_else(|| extract_bearer_token(headers).map(str::to_string))
        .filter(|t| !t.is_empty());

    let tags = query
        .tags
        .as_deref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    ConnectParams {
        user_id: non_empty(&query.user_id),
        access_token,
        tags,
    }
}

/// Render a queued message as an SSE event; fields SSE cannot carry are dropped
fn to_event(message: &EventMessage) -> Event {
    let mut event = Event::default().data(message.data_string());
    if let Some(name) = message.event.as_deref().filter(|name| is_sse_field(name)) {
        event = event.event(name);
    }
    if let Some(id) = message.id.as_deref().filter(|id| is_sse_field(id)) {
        event = event.id(id);
    }
    event
}

/// Create the SSE event stream
fn create_sse_stream(
    mut rx: mpsc::Receiver<EventMessage>,
    handle: Arc<SseConnection>,
    connected: ConnectedEvent,
    state: AppState,
) -> impl Stream<Item = Result<Event, Infallible>> {
    // Unregisters the connection when the client goes away
    let cleanup_guard = CleanupGuard {
        connection_id: handle.id,
        state,
        connection_start: Instant::now(),
    };
    let connected_json = serde_json::to_string(&connected).unwrap_or_default();

    async_stream::stream! {
        yield Ok(Event::default().event("connected").data(connected_json));

        let _guard = cleanup_guard;

        loop {
            if !handle.is_alive() {
                break;
            }

            let next = tokio::select! {
                msg = rx.recv() => msg,
                _ = handle.closed() => None,
            };

            match next {
                Some(message) => yield Ok(to_event(&message)),
                None => break,
            }
        }

        tracing::debug!(connection_id = handle.id, "SSE stream finished");
    }
}

/// Guard that performs cleanup when dropped
struct CleanupGuard {
    connection_id: ConnectionId,
    state: AppState,
    connection_start: Instant,
}

impl Drop for CleanupGuard {
    fn drop(&mut self) {
        let duration = self.connection_start.elapsed();
        LocalMetrics::record_connection_duration(duration);

        // Already gone when the server side disconnected it
        if let Some(handle) = self.state.connection_manager.unregister(self.connection_id) {
            handle.close();
        }

        tracing::info!(
            connection_id = self.connection_id,
            duration_secs = duration.as_secs_f64(),
            "SSE connection closed"
        );
    }
}
