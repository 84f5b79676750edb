//! Cluster membership view consumed by the dispatcher

use std::sync::RwLock;

use super::types::ClusterNode;
use crate::metrics::ClusterMetrics;

/// Source of the current peer list.
///
/// Called once per dispatched operation, so implementations return a fresh
/// snapshot and never block on I/O.
pub trait MembershipProvider: Send + Sync {
    /// Every known node except this one
    fn current_peers(&self) -> Vec<ClusterNode>;
}

/// Keep the entries that name another process, once each.
///
/// An entry is dropped when it is flagged `is_self`, carries the local id,
/// points at the local address (a stale registration of this process under an
/// older id, or an alias), or repeats the id or address of an earlier entry.
pub fn remote_peers(
    local: &ClusterNode,
    candidates: impl IntoIterator<Item = ClusterNode>,
) -> Vec<ClusterNode> {
    let mut peers: Vec<ClusterNode> = Vec::new();

    for node in candidates {
        if node.is_self || node.id == local.id {
            continue;
        }
        if node.same_endpoint(local) {
            tracing::debug!(
                node_id = %node.id,
                address = %node.address,
                "Peer entry points at this node, skipping"
            );
            continue;
        }
        if peers
            .iter()
            .any(|p| p.id == node.id || p.same_endpoint(&node))
        {
            tracing::debug!(node_id = %node.id, address = %node.address, "Duplicate peer skipped");
            continue;
        }
        peers.push(node);
    }

    peers
}

/// Fixed peer list taken from configuration
#[derive(Debug, Clone, Default)]
pub struct StaticMembership {
    peers: Vec<ClusterNode>,
}

impl StaticMembership {
    pub fn new(peers: Vec<ClusterNode>) -> Self {
        ClusterMetrics::set_peers(peers.len());
        Self { peers }
    }

    /// Build from `id@host:port` or bare `host:port` entries.
    ///
    /// Bare entries use the address as node id. Entries naming this node are
    /// dropped.
    pub fn from_entries<S: AsRef<str>>(local: &ClusterNode, entries: &[S]) -> Self {
        let parsed = entries.iter().filter_map(|entry| {
            let entry = entry.as_ref().trim();
            if entry.is_empty() {
                return None;
            }
            Some(match entry.split_once('@') {
                Some((id, address)) => ClusterNode::new(id.trim(), address.trim()),
                None => ClusterNode::new(entry, entry),
            })
        });

        let peers = remote_peers(local, parsed);
        if peers.len() < entries.len() {
            tracing::warn!(
                configured = entries.len(),
                peers = peers.len(),
                "Some static peer entries were ignored"
            );
        }
        Self::new(peers)
    }
}

impl MembershipProvider for StaticMembership {
    fn current_peers(&self) -> Vec<ClusterNode> {
        self.peers.clone()
    }
}

/// Peer list replaced wholesale by a background updater
#[derive(Debug, Default)]
pub struct SharedMembership {
    peers: RwLock<Vec<ClusterNode>>,
}

impl SharedMembership {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace(&self, peers: Vec<ClusterNode>) {
        ClusterMetrics::set_peers(peers.len());
        let mut guard = self
            .peers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = peers;
    }
}

impl MembershipProvider for SharedMembership {
    fn current_peers(&self) -> Vec<ClusterNode> {
        self.peers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_entries() {
        let local = ClusterNode::local("a", "10.0.0.1:8081");
        let membership = StaticMembership::from_entries(
            &local,
            &[
                "b@10.0.0.2:8081",
                "10.0.0.3:8081",
                "10.0.0.1:8081",
                "a@10.0.0.9:8081",
                " ",
                "b@10.0.0.4:8081",
            ],
        );

        let peers = membership.current_peers();
        assert_eq!(peers.len(), 2);
        assert_eq!(peers[0], ClusterNode::new("b", "10.0.0.2:8081"));
        assert_eq!(peers[1], ClusterNode::new("10.0.0.3:8081", "10.0.0.3:8081"));
        assert!(peers.iter().all(|p| !p.is_self));
    }

    #[test]
    fn test_static_aliases_of_one_address_collapse() {
        let local = ClusterNode::local("a", "10.0.0.1:8081");
        let membership = StaticMembership::from_entries(
            &local,
            &["b@10.0.0.2:8081", "b-alias@http://10.0.0.2:8081", "old-a@10.0.0.1:8081"],
        );

        assert_eq!(
            membership.current_peers(),
            vec![ClusterNode::new("b", "10.0.0.2:8081")]
        );
    }

    #[test]
    fn test_remote_peers_drops_stale_self_registration() {
        let local = ClusterNode::local("sse-new", "10.0.0.1:8081");
        let peers = remote_peers(
            &local,
            vec![
                ClusterNode::new("sse-old", "10.0.0.1:8081"),
                ClusterNode::new("b", "10.0.0.2:8081"),
                ClusterNode::new("b", "10.0.0.3:8081"),
            ],
        );

        assert_eq!(peers, vec![ClusterNode::new("b", "10.0.0.2:8081")]);
    }

    #[test]
    fn test_shared_membership_replace() {
        let membership = SharedMembership::new();
        assert!(membership.current_peers().is_empty());

        membership.replace(vec![ClusterNode::new("b", "b:1")]);
        assert_eq!(membership.current_peers().len(), 1);

        membership.replace(Vec::new());
        assert!(membership.current_peers().is_empty());
    }
}
