//! Metrics helper structs for convenient metric recording

use std::time::Duration;

use prometheus::{Encoder, TextEncoder};

use super::{
    CLUSTER_DISPATCHES_TOTAL, CLUSTER_LOCAL_FAILURES, CLUSTER_PEERS, CLUSTER_REMOTE_CALLS_TOTAL,
    CLUSTER_REMOTE_LATENCY, CLUSTER_RPC_SERVED, CONNECTIONS_ACTIVE, CONNECTIONS_CLOSED,
    CONNECTIONS_OPENED, CONNECTIONS_REJECTED, CONNECTION_DURATION, DISCOVERY_CONNECTION_STATUS,
    DISCOVERY_RECONNECTIONS_TOTAL, MESSAGES_DELIVERED_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for node-local connection metrics
pub struct LocalMetrics;

impl LocalMetrics {
    pub fn record_connection_opened() {
        CONNECTIONS_OPENED.inc();
        CONNECTIONS_ACTIVE.inc();
    }

    pub fn record_connection_closed() {
        CONNECTIONS_CLOSED.inc();
        CONNECTIONS_ACTIVE.dec();
    }

    pub fn record_connection_rejected() {
        CONNECTIONS_REJECTED.inc();
    }

    pub fn record_connection_duration(duration: Duration) {
        CONNECTION_DURATION.observe(duration.as_secs_f64());
    }

    pub fn record_delivered(count: usize) {
        MESSAGES_DELIVERED_TOTAL.inc_by(count as u64);
    }
}

/// Outcome label for a single remote call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteOutcome {
    Ok,
    DomainError,
    TransportError,
    Timeout,
}

impl RemoteOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RemoteOutcome::Ok => "ok",
            RemoteOutcome::DomainError => "domain_error",
            RemoteOutcome::TransportError => "transport_error",
            RemoteOutcome::Timeout => "timeout",
        }
    }
}

/// Helper struct for cluster dispatch metrics
pub struct ClusterMetrics;

impl ClusterMetrics {
    pub fn record_dispatch(operation: &str) {
        CLUSTER_DISPATCHES_TOTAL
            .with_label_values(&[operation])
            .inc();
    }

    pub fn record_local_failure() {
        CLUSTER_LOCAL_FAILURES.inc();
    }

    pub fn record_remote(outcome: RemoteOutcome, elapsed: Duration) {
        CLUSTER_REMOTE_CALLS_TOTAL
            .with_label_values(&[outcome.as_str()])
            .inc();
        CLUSTER_REMOTE_LATENCY
            .with_label_values(&[outcome.as_str()])
            .observe(elapsed.as_secs_f64());
    }

    pub fn record_rpc_served(ok: bool) {
        let status = if ok { "ok" } else { "error" };
        CLUSTER_RPC_SERVED.with_label_values(&[status]).inc();
    }

    pub fn set_peers(count: usize) {
        CLUSTER_PEERS.set(count as i64);
    }
}

/// Helper struct for discovery backend metrics
pub struct DiscoveryMetrics;

impl DiscoveryMetrics {
    pub fn set_connected(connected: bool) {
        DISCOVERY_CONNECTION_STATUS.set(if connected { 1 } else { 0 });
    }

    pub fn record_reconnect() {
        DISCOVERY_RECONNECTIONS_TOTAL.inc();
    }
}
