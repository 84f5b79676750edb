//! Prometheus metrics for the SSE cluster service.
//!
//! This module provides metrics for:
//! - Local SSE connections (active, opened, closed, duration)
//! - Local message deliveries
//! - Cluster dispatch and per-peer remote calls
//! - Membership and discovery health

mod helpers;

pub use helpers::{encode_metrics, ClusterMetrics, DiscoveryMetrics, LocalMetrics, RemoteOutcome};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, Histogram, HistogramVec, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "sse_cluster";

lazy_static! {
    // ============================================================================
    // Connection Metrics
    // ============================================================================

    /// Number of SSE connections currently held by this node
    pub static ref CONNECTIONS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_connections_active", METRIC_PREFIX),
        "Number of SSE connections held by this node"
    ).unwrap();

    /// SSE connections opened
    pub static ref CONNECTIONS_OPENED: IntCounter = register_int_counter!(
        format!("{}_connections_opened_total", METRIC_PREFIX),
        "Total SSE connections opened"
    ).unwrap();

    /// SSE connections closed
    pub static ref CONNECTIONS_CLOSED: IntCounter = register_int_counter!(
        format!("{}_connections_closed_total", METRIC_PREFIX),
        "Total SSE connections closed"
    ).unwrap();

    /// Connections rejected by limits
    pub static ref CONNECTIONS_REJECTED: IntCounter = register_int_counter!(
        format!("{}_connections_rejected_total", METRIC_PREFIX),
        "Total SSE connections rejected by connection limits"
    ).unwrap();

    /// SSE connection duration
    pub static ref CONNECTION_DURATION: Histogram = register_histogram!(
        format!("{}_connection_duration_seconds", METRIC_PREFIX),
        "SSE connection duration in seconds",
        vec![1.0, 5.0, 10.0, 30.0, 60.0, 300.0, 600.0, 1800.0, 3600.0]
    ).unwrap();

    // ============================================================================
    // Message Metrics
    // ============================================================================

    /// Messages queued onto local connections
    pub static ref MESSAGES_DELIVERED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_messages_delivered_total", METRIC_PREFIX),
        "Total messages queued onto local connections"
    ).unwrap();

    // ============================================================================
    // Cluster Metrics
    // ============================================================================

    /// Cluster-wide operations started on this node
    pub static ref CLUSTER_DISPATCHES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_dispatches_total", METRIC_PREFIX),
        "Total cluster operations dispatched from this node",
        &["operation"]
    ).unwrap();

    /// Operations that failed locally before fan-out
    pub static ref CLUSTER_LOCAL_FAILURES: IntCounter = register_int_counter!(
        format!("{}_local_failures_total", METRIC_PREFIX),
        "Total cluster operations rejected by the local registry"
    ).unwrap();

    /// Remote calls by outcome
    pub static ref CLUSTER_REMOTE_CALLS_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_remote_calls_total", METRIC_PREFIX),
        "Total remote calls to peer nodes",
        &["outcome"]
    ).unwrap();

    /// Remote call latency by outcome
    pub static ref CLUSTER_REMOTE_LATENCY: HistogramVec = register_histogram_vec!(
        format!("{}_remote_call_latency_seconds", METRIC_PREFIX),
        "Remote call latency in seconds",
        &["outcome"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    ).unwrap();

    /// Remote RPCs served for peers
    pub static ref CLUSTER_RPC_SERVED: IntCounterVec = register_int_counter_vec!(
        format!("{}_rpc_served_total", METRIC_PREFIX),
        "Total peer RPCs served by this node",
        &["status"]
    ).unwrap();

    // ============================================================================
    // Membership Metrics
    // ============================================================================

    /// Peers in the latest membership snapshot
    pub static ref CLUSTER_PEERS: IntGauge = register_int_gauge!(
        format!("{}_peers", METRIC_PREFIX),
        "Number of peers in the latest membership snapshot"
    ).unwrap();

    /// Discovery backend connection status (1 = connected, 0 = disconnected)
    pub static ref DISCOVERY_CONNECTION_STATUS: IntGauge = register_int_gauge!(
        format!("{}_discovery_connection_status", METRIC_PREFIX),
        "Discovery backend connection status (1=connected, 0=disconnected)"
    ).unwrap();

    /// Discovery reconnection attempts
    pub static ref DISCOVERY_RECONNECTIONS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_discovery_reconnections_total", METRIC_PREFIX),
        "Total discovery backend reconnection attempts"
    ).unwrap();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_metrics() {
        // lazy_static registers on first access
        CONNECTIONS_ACTIVE.get();

        let output = encode_metrics().unwrap();
        assert!(output.contains("sse_cluster_connections_active"));
    }

    #[test]
    fn test_cluster_metrics() {
        ClusterMetrics::record_dispatch("query_by_user_id");
        ClusterMetrics::record_remote(RemoteOutcome::Ok, std::time::Duration::from_millis(3));
        ClusterMetrics::record_remote(RemoteOutcome::Timeout, std::time::Duration::from_secs(1));
        ClusterMetrics::set_peers(2);

        assert!(CLUSTER_DISPATCHES_TOTAL
            .with_label_values(&["query_by_user_id"])
            .get() >= 1);
        assert!(CLUSTER_REMOTE_CALLS_TOTAL.with_label_values(&["timeout"]).get() >= 1);
    }
}
