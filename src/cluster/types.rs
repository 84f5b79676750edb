//! Cluster-related types and configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::ClusterSettings;
use crate::connection_manager::RegistryError;

/// A member of the cluster as seen in one membership snapshot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClusterNode {
    /// Stable node identifier
    pub id: String,
    /// `host:port` where the node serves peer RPCs
    pub address: String,
    /// Whether this entry describes the local node
    #[serde(default)]
    pub is_self: bool,
}

impl ClusterNode {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            address: address.into(),
            is_self: false,
        }
    }

    pub fn local(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            is_self: true,
            ..Self::new(id, address)
        }
    }

    /// Address without scheme or trailing slash, lowercased
    pub fn endpoint_key(&self) -> String {
        let address = self.address.trim();
        let address = address
            .strip_prefix("http://")
            .or_else(|| address.strip_prefix("https://"))
            .unwrap_or(address);
        address.trim_end_matches('/').to_ascii_lowercase()
    }

    /// Both entries reach the same process, whatever their ids say
    pub fn same_endpoint(&self, other: &ClusterNode) -> bool {
        self.endpoint_key() == other.endpoint_key()
    }
}

/// Per-dispatch behaviour
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchConfig {
    /// Upper bound for a single remote call
    pub request_timeout: Duration,
    /// Retry a remote call once after it timed out. Mutating operations may then
    /// take effect twice on the same node.
    pub retry_on_timeout: bool,
    /// `wait_timeout` yields a partial result instead of an error
    pub partial_on_timeout: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_millis(3000),
            retry_on_timeout: false,
            partial_on_timeout: true,
        }
    }
}

impl From<&ClusterSettings> for DispatchConfig {
    fn from(settings: &ClusterSettings) -> Self {
        Self {
            request_timeout: settings.request_timeout(),
            retry_on_timeout: settings.retry_on_timeout,
            partial_on_timeout: settings.partial_on_timeout,
        }
    }
}

/// Failure of a single remote call; never fatal for the aggregate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RemoteError {
    /// The peer could not be reached or did not answer in time
    #[error("Transport failure: {message}")]
    Transport {
        message: String,
        #[serde(default)]
        timed_out: bool,
    },
    /// The peer answered with an error of its own
    #[error("Remote error: {message}")]
    Domain { message: String },
}

impl RemoteError {
    pub fn transport(message: impl Into<String>) -> Self {
        RemoteError::Transport {
            message: message.into(),
            timed_out: false,
        }
    }

    pub fn timeout(after: Duration) -> Self {
        RemoteError::Transport {
            message: format!("timed out after {}ms", after.as_millis()),
            timed_out: true,
        }
    }

    pub fn domain(message: impl Into<String>) -> Self {
        RemoteError::Domain {
            message: message.into(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, RemoteError::Transport { timed_out: true, .. })
    }

    pub fn is_transport(&self) -> bool {
        matches!(self, RemoteError::Transport { .. })
    }
}

/// One node's recorded failure inside an aggregate result
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub node_id: String,
    pub address: String,
    pub error: RemoteError,
}

/// Errors surfaced by a cluster operation as a whole
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClusterError {
    /// The local registry rejected the operation; nothing was sent to peers
    #[error("Local operation failed: {0}")]
    Local(#[from] RegistryError),
    #[error("Operation was cancelled")]
    Cancelled,
    /// Wait deadline elapsed and partial results were not requested
    #[error("Timed out waiting for {} node(s)", pending.len())]
    Timeout { pending: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_config_defaults() {
        let config = DispatchConfig::default();
        assert!(!config.retry_on_timeout);
        assert!(config.partial_on_timeout);
        assert_eq!(config.request_timeout, Duration::from_secs(3));
    }

    #[test]
    fn test_dispatch_config_from_settings() {
        let settings = ClusterSettings {
            request_timeout_ms: 250,
            retry_on_timeout: true,
            partial_on_timeout: false,
            ..Default::default()
        };
        let config = DispatchConfig::from(&settings);
        assert_eq!(config.request_timeout, Duration::from_millis(250));
        assert!(config.retry_on_timeout);
        assert!(!config.partial_on_timeout);
    }

    #[test]
    fn test_same_endpoint_ignores_scheme_and_case() {
        let node = ClusterNode::new("a", "Node-A:8081");
        assert!(node.same_endpoint(&ClusterNode::new("old", "http://node-a:8081/")));
        assert!(!node.same_endpoint(&ClusterNode::new("a", "node-a:8082")));
    }

    #[test]
    fn test_remote_error_classification() {
        assert!(RemoteError::timeout(Duration::from_millis(10)).is_timeout());
        assert!(RemoteError::transport("refused").is_transport());
        assert!(!RemoteError::transport("refused").is_timeout());
        assert!(!RemoteError::domain("bad").is_transport());
    }

    #[test]
    fn test_remote_error_serialization() {
        let json = serde_json::to_value(RemoteError::domain("bad tag")).unwrap();
        assert_eq!(json["kind"], "domain");
        assert_eq!(json["message"], "bad tag");
    }

    #[test]
    fn test_cluster_error_from_registry() {
        let err: ClusterError = RegistryError::InvalidArgument("tag".into()).into();
        assert!(matches!(err, ClusterError::Local(_)));
        let timeout = ClusterError::Timeout {
            pending: vec!["b".into()],
        };
        assert_eq!(timeout.to_string(), "Timed out waiting for 1 node(s)");
    }
}
