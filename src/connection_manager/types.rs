//! Connection handle and related types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::{mpsc, Notify};

/// Process-unique, monotonic connection identifier
pub type ConnectionId = u64;

/// Event pushed to SSE clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    /// SSE `event:` field; clients see `message` when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<String>,
    /// SSE `data:` field; strings are sent verbatim, everything else as JSON
    pub data: serde_json::Value,
    /// SSE `id:` field
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl EventMessage {
    pub fn new(event: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event: Some(event.into()),
            data,
            id: None,
        }
    }

    /// Plain text message without an event name
    pub fn text(data: impl Into<String>) -> Self {
        Self {
            event: None,
            data: serde_json::Value::String(data.into()),
            id: None,
        }
    }

    /// Payload rendered for the SSE `data:` field
    pub fn data_string(&self) -> String {
        match &self.data {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }

    /// SSE framing forbids line breaks and NUL in the event name and id
    pub fn is_well_formed(&self) -> bool {
        let clean = |s: &Option<String>| s.as_deref().map(is_sse_field).unwrap_or(true);
        clean(&self.event) && clean(&self.id)
    }
}

/// Whether `value` can be written as an SSE `event:` or `id:` field
pub fn is_sse_field(value: &str) -> bool {
    !value.contains(['\n', '\r', '\0'])
}

/// Identity attached to a connection at accept time
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub tags: Vec<String>,
}

/// Handle for a single SSE connection
pub struct SseConnection {
    pub id: ConnectionId,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub tags: BTreeSet<String>,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<EventMessage>,
    alive: AtomicBool,
    closed: Notify,
    delivered: AtomicU64,
}

impl std::fmt::Debug for SseConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SseConnection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("tags", &self.tags)
            .field("connected_at", &self.connected_at)
            .field("alive", &self.is_alive())
            .field("delivered", &self.delivered())
            .finish()
    }
}

impl SseConnection {
    pub fn new(id: ConnectionId, params: ConnectParams, sender: mpsc::Sender<EventMessage>) -> Self {
        Self {
            id,
            user_id: params.user_id,
            access_token: params.access_token,
            tags: params.tags.into_iter().collect(),
            connected_at: Utc::now(),
            sender,
            alive: AtomicBool::new(true),
            closed: Notify::new(),
            delivered: AtomicU64::new(0),
        }
    }

    /// Queue a message without waiting; returns whether it was accepted
    pub fn try_send(&self, message: &EventMessage) -> bool {
        if !self.alive.load(Ordering::Acquire) {
            return false;
        }

        match self.sender.try_send(message.clone()) {
            Ok(()) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(connection_id = self.id, "Connection buffer full, message dropped");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.alive.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Mark the connection closed and wake the stream serving it
    pub fn close(&self) {
        self.alive.store(false, Ordering::Release);
        // notify_one stores a permit, so a stream that is not polling yet still ends
        self.closed.notify_one();
    }

    /// Resolves once `close` has been called
    pub async fn closed(&self) {
        self.closed.notified().await
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire) && !self.sender.is_closed()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    /// Describe this connection for callers on any node
    pub fn info(&self, node_id: &str) -> ConnectionInfo {
        ConnectionInfo {
            connection_id: self.id,
            node_id: node_id.to_string(),
            user_id: self.user_id.clone(),
            access_token: self.access_token.clone(),
            tags: self.tags.iter().cloned().collect(),
            connected_at: self.connected_at,
            alive: self.is_alive(),
            messages_delivered: self.delivered(),
        }
    }
}

/// Serializable description of a connection; never carries the handle itself
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub connection_id: ConnectionId,
    /// Node holding the connection
    pub node_id: String,
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub tags: Vec<String>,
    pub connected_at: DateTime<Utc>,
    pub alive: bool,
    pub messages_delivered: u64,
}

/// Error returned when connection limits are exceeded
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectionError {
    #[error("Total connection limit exceeded ({current}/{max})")]
    TotalLimitExceeded { current: usize, max: usize },
    #[error("User {user_id} connection limit exceeded ({current}/{max})")]
    UserLimitExceeded {
        user_id: String,
        current: usize,
        max: usize,
    },
}

/// Error raised by a local registry operation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Limits for connection management
#[derive(Debug, Clone, Copy)]
pub struct ConnectionLimits {
    pub max_connections: usize,
    pub max_connections_per_user: usize,
}

impl Default for ConnectionLimits {
    fn default() -> Self {
        Self {
            max_connections: 10000,
            max_connections_per_user: 10,
        }
    }
}
