//! Graceful shutdown handling.
//!
//! Shutdown runs in three phases:
//! 1. Tell local SSE clients the node is going away
//! 2. Signal background tasks to stop (discovery deregisters this node)
//! 3. Close every local connection so open streams end and the server can exit

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::connection_manager::{ConnectionManager, EventMessage, LocalRegistry};

/// Configuration for graceful shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Time given to streams to flush the shutdown event
    pub flush_grace: Duration,
    /// Reconnect delay suggested to clients, in seconds
    pub reconnect_after_seconds: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            flush_grace: Duration::from_millis(500),
            reconnect_after_seconds: 5,
        }
    }
}

/// Outcome of a shutdown run
#[derive(Debug, Clone, Default)]
pub struct ShutdownResult {
    pub clients_notified: usize,
    pub connections_closed: usize,
    pub duration: Duration,
}

/// Handles graceful shutdown of this node
pub struct GracefulShutdown {
    connection_manager: Arc<ConnectionManager>,
    shutdown_tx: broadcast::Sender<()>,
    config: ShutdownConfig,
}

impl GracefulShutdown {
    pub fn new(connection_manager: Arc<ConnectionManager>, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_config(connection_manager, shutdown_tx, ShutdownConfig::default())
    }

    pub fn with_config(
        connection_manager: Arc<ConnectionManager>,
        shutdown_tx: broadcast::Sender<()>,
        config: ShutdownConfig,
    ) -> Self {
        Self {
            connection_manager,
            shutdown_tx,
            config,
        }
    }

    /// Execute graceful shutdown sequence
    #[tracing::instrument(
        name = "graceful_shutdown",
        skip(self),
        fields(total_connections = self.connection_manager.connection_count())
    )]
    pub async fn execute(&self, reason: &str) -> ShutdownResult {
        let start = Instant::now();
        let mut result = ShutdownResult::default();

        tracing::info!(reason = %reason, "Starting graceful shutdown - Phase 1: Notifying clients");
        let notice = EventMessage::new(
            "shutdown",
            serde_json::json!({
                "reason": reason,
                "reconnect_after": self.config.reconnect_after_seconds,
            }),
        );
        // Local only: every node notifies its own clients
        result.clients_notified = self.connection_manager.send_all(&notice).unwrap_or(0);
        if result.clients_notified > 0 {
            tokio::time::sleep(self.config.flush_grace).await;
        }

        tracing::info!("Phase 2: Signaling background tasks to stop");
        // No receivers left is fine
        let _ = self.shutdown_tx.send(());

        tracing::info!("Phase 3: Closing local connections");
        result.connections_closed = self.connection_manager.close_all();

        result.duration = start.elapsed();
        tracing::info!(
            clients_notified = result.clients_notified,
            connections_closed = result.connections_closed,
            duration_ms = result.duration.as_millis() as u64,
            "Graceful shutdown completed"
        );

        result
    }
}
