use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::broadcast;

use crate::config::SseConfig;
use crate::connection_manager::ConnectionManager;

/// Background task sweeping connections whose client went away.
///
/// Keep-alive comments are written by the SSE response itself; a failed write
/// drops the receiver, which this sweep then notices through the liveness flag.
pub struct HeartbeatTask {
    config: SseConfig,
    connection_manager: Arc<ConnectionManager>,
    shutdown: broadcast::Receiver<()>,
}

impl HeartbeatTask {
    pub fn new(
        config: SseConfig,
        connection_manager: Arc<ConnectionManager>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            connection_manager,
            shutdown,
        }
    }

    /// Run the cleanup loop until shutdown
    pub async fn run(mut self) {
        let cleanup_interval = Duration::from_secs(self.config.cleanup_interval.max(1));
        let mut cleanup_timer = tokio::time::interval(cleanup_interval);

        // Skip immediate first tick
        cleanup_timer.tick().await;

        tracing::info!(
            cleanup_interval_secs = cleanup_interval.as_secs(),
            "Heartbeat task started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("Heartbeat task received shutdown signal");
                    break;
                }
                _ = cleanup_timer.tick() => {
                    self.sweep();
                }
            }
        }

        tracing::info!("Heartbeat task stopped");
    }

    /// Remove dead connections once; returns how many were removed
    pub fn sweep(&self) -> usize {
        let start = Instant::now();
        let removed = self.connection_manager.cleanup_dead_connections();

        if removed > 0 {
            tracing::info!(
                removed = removed,
                remaining = self.connection_manager.stats().total_connections,
                elapsed_ms = start.elapsed().as_millis() as u64,
                "Dead connection sweep completed"
            );
        } else {
            tracing::debug!("Dead connection sweep found nothing");
        }

        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::{ConnectParams, LocalRegistry};
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_sweep_removes_dead_connections() {
        let manager = Arc::new(ConnectionManager::new("node-a"));
        let (tx_live, _rx_live) = mpsc::channel(1);
        let (tx_dead, rx_dead) = mpsc::channel(1);
        manager.register(ConnectParams::default(), tx_live).unwrap();
        manager.register(ConnectParams::default(), tx_dead).unwrap();
        drop(rx_dead);

        let (_tx, rx) = broadcast::channel(1);
        let task = HeartbeatTask::new(SseConfig::default(), manager.clone(), rx);

        assert_eq!(task.sweep(), 1);
        assert_eq!(manager.connection_count(), 1);
        assert_eq!(task.sweep(), 0);
    }

    #[tokio::test]
    async fn test_stops_on_shutdown() {
        let manager = Arc::new(ConnectionManager::new("node-a"));
        let (tx, rx) = broadcast::channel(1);
        let task = HeartbeatTask::new(SseConfig::default(), manager, rx);

        let handle = tokio::spawn(task.run());
        tokio::time::sleep(Duration::from_millis(10)).await;
        tx.send(()).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("task should stop")
            .unwrap();
    }
}
