//! Redis-backed membership discovery
//!
//! Every node writes its descriptor into a hash and its last heartbeat time
//! into a sorted set. Nodes whose heartbeat is older than the TTL are pruned
//! by whichever node notices first. Live peers are read back on every
//! heartbeat and published into a `SharedMembership`.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use tokio::sync::broadcast;

use super::membership::{remote_peers, SharedMembership};
use super::types::ClusterNode;
use crate::config::RedisConfig;
use crate::metrics::DiscoveryMetrics;
use crate::redis::{current_time_ms, ExponentialBackoff};

/// Error type for discovery operations
#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Background task keeping this node registered and the peer list current
pub struct RedisDiscovery {
    config: RedisConfig,
    local: ClusterNode,
    membership: Arc<SharedMembership>,
    shutdown: broadcast::Receiver<()>,
}

impl RedisDiscovery {
    pub fn new(
        config: RedisConfig,
        local: ClusterNode,
        membership: Arc<SharedMembership>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            config,
            local,
            membership,
            shutdown,
        }
    }

    fn nodes_key(&self) -> String {
        format!("{}:nodes", self.config.key_prefix)
    }

    fn alive_key(&self) -> String {
        format!("{}:alive", self.config.key_prefix)
    }

    fn ttl_ms(&self) -> i64 {
        (self.config.node_ttl.max(1) * 1000) as i64
    }

    /// Run the discovery loop with automatic reconnection
    pub async fn run(mut self) {
        tracing::info!(
            node_id = %self.local.id,
            address = %self.local.address,
            key_prefix = %self.config.key_prefix,
            "Redis discovery starting"
        );

        let mut backoff = ExponentialBackoff::new();

        loop {
            match self.run_session(&mut backoff).await {
                Ok(()) => {
                    tracing::info!("Redis discovery stopped gracefully");
                    break;
                }
                Err(e) => {
                    DiscoveryMetrics::set_connected(false);
                    DiscoveryMetrics::record_reconnect();
                    let delay = backoff.next_delay();
                    tracing::error!(
                        error = %e,
                        attempt = backoff.attempt(),
                        retry_delay_ms = delay.as_millis() as u64,
                        "Redis discovery error, reconnecting"
                    );

                    tokio::select! {
                        _ = self.shutdown.recv() => {
                            tracing::info!("Shutdown requested during reconnect delay");
                            break;
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        DiscoveryMetrics::set_connected(false);
    }

    async fn run_session(&mut self, backoff: &mut ExponentialBackoff) -> Result<(), DiscoveryError> {
        let client = redis::Client::open(self.config.url.as_str())?;
        let mut conn = client.get_multiplexed_tokio_connection().await?;

        let mut ticker =
            tokio::time::interval(Duration::from_secs(self.config.heartbeat_interval.max(1)));

        loop {
            tokio::select! {
                biased;

                _ = self.shutdown.recv() => {
                    if let Err(e) = self.deregister(&mut conn).await {
                        tracing::warn!(error = %e, "Failed to deregister from discovery");
                    }
                    return Ok(());
                }

                _ = ticker.tick() => {
                    let peers = self.heartbeat(&mut conn).await?;
                    backoff.reset();
                    DiscoveryMetrics::set_connected(true);
                    self.membership.replace(peers);
                }
            }
        }
    }

    /// Refresh this node's entry, prune expired nodes and read live peers
    async fn heartbeat(
        &self,
        conn: &mut MultiplexedConnection,
    ) -> Result<Vec<ClusterNode>, DiscoveryError> {
        let nodes_key = self.nodes_key();
        let alive_key = self.alive_key();
        let now = current_time_ms();
        let cutoff = now - self.ttl_ms();

        let descriptor = ClusterNode::new(self.local.id.clone(), self.local.address.clone());
        let descriptor_json = serde_json::to_string(&descriptor)?;

        let _: () = redis::pipe()
            .cmd("HSET")
            .arg(&nodes_key)
            .arg(&self.local.id)
            .arg(&descriptor_json)
            .cmd("ZADD")
            .arg(&alive_key)
            .arg(now)
            .arg(&self.local.id)
            .query_async(conn)
            .await?;

        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&alive_key)
            .arg("-inf")
            .arg(format!("({}", cutoff))
            .query_async(conn)
            .await?;

        if !expired.is_empty() {
            let _: () = redis::pipe()
                .cmd("ZREM")
                .arg(&alive_key)
                .arg(&expired)
                .cmd("HDEL")
                .arg(&nodes_key)
                .arg(&expired)
                .query_async(conn)
                .await?;
            tracing::info!(nodes = ?expired, "Pruned expired cluster nodes");
        }

        let live: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&alive_key)
            .arg(cutoff)
            .arg("+inf")
            .query_async(conn)
            .await?;

        let peer_ids: Vec<String> = live.into_iter().filter(|id| id != &self.local.id).collect();
        if peer_ids.is_empty() {
            return Ok(Vec::new());
        }

        let descriptors: Vec<Option<String>> = redis::cmd("HMGET")
            .arg(&nodes_key)
            .arg(&peer_ids)
            .query_async(conn)
            .await?;

        let peers = self.decode_peers(&peer_ids, descriptors);
        tracing::debug!(peers = peers.len(), "Discovery heartbeat");
        Ok(peers)
    }

    /// Turn the HMGET answer into the peer list this node dispatches to
    fn decode_peers(&self, ids: &[String], descriptors: Vec<Option<String>>) -> Vec<ClusterNode> {
        let mut peers = Vec::with_capacity(descriptors.len());
        for (id, raw) in ids.iter().zip(descriptors) {
            let Some(raw) = raw else {
                tracing::debug!(node_id = %id, "Live node without descriptor, skipping");
                continue;
            };
            match serde_json::from_str::<ClusterNode>(&raw) {
                Ok(mut node) => {
                    node.is_self = false;
                    peers.push(node);
                }
                Err(e) => {
                    tracing::warn!(node_id = %id, error = %e, "Invalid node descriptor");
                }
            }
        }

        // A restart under a new id leaves the old entry alive until it expires
        remote_peers(&self.local, peers)
    }

    async fn deregister(&self, conn: &mut MultiplexedConnection) -> Result<(), DiscoveryError> {
        let _: () = redis::pipe()
            .cmd("ZREM")
            .arg(self.alive_key())
            .arg(&self.local.id)
            .cmd("HDEL")
            .arg(self.nodes_key())
            .arg(&self.local.id)
            .query_async(conn)
            .await?;

        tracing::info!(node_id = %self.local.id, "Deregistered from discovery");
        Ok(())
    }
}
