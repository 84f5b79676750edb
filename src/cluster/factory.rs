//! Factory functions for cluster components

use std::sync::Arc;

use tokio::sync::broadcast;

use super::discovery::RedisDiscovery;
use super::membership::{MembershipProvider, SharedMembership, StaticMembership};
use super::types::ClusterNode;
use crate::config::{DiscoveryMode, Settings};

/// Membership view plus the background task that keeps it fresh, if any
pub struct Membership {
    pub provider: Arc<dyn MembershipProvider>,
    pub discovery: Option<RedisDiscovery>,
}

/// Create the membership view selected by configuration
pub fn create_membership(
    settings: &Settings,
    local: &ClusterNode,
    shutdown: &broadcast::Sender<()>,
) -> Membership {
    match settings.cluster.discovery {
        DiscoveryMode::Static => {
            let membership = StaticMembership::from_entries(local, &settings.cluster.peers);
            tracing::info!(
                node_id = %local.id,
                peers = membership.current_peers().len(),
                "Using static cluster membership"
            );
            Membership {
                provider: Arc::new(membership),
                discovery: None,
            }
        }
        DiscoveryMode::Redis => {
            tracing::info!(
                node_id = %local.id,
                redis_url = %settings.redis.url,
                node_ttl = settings.redis.node_ttl,
                "Using Redis cluster discovery"
            );
            let shared = Arc::new(SharedMembership::new());
            let discovery = RedisDiscovery::new(
                settings.redis.clone(),
                local.clone(),
                shared.clone(),
                shutdown.subscribe(),
            );
            Membership {
                provider: shared,
                discovery: Some(discovery),
            }
        }
    }
}
