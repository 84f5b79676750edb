//! Health check and statistics endpoints.

use axum::{extract::State, Json};
use serde::Serialize;

use crate::connection_manager::ConnectionStats;
use crate::server::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub node_id: String,
    pub connections: usize,
    pub peers: usize,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub node_id: String,
    pub address: String,
    pub connections: ConnectionStats,
    pub peers: usize,
    pub dispatch: DispatchStats,
}

#[derive(Debug, Serialize)]
pub struct DispatchStats {
    pub request_timeout_ms: u64,
    pub retry_on_timeout: bool,
    pub partial_on_timeout: bool,
}

/// GET /health - Liveness of this node
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        node_id: state.dispatcher.node_id().to_string(),
        connections: state.connection_manager.stats().total_connections,
        peers: state.dispatcher.peers().len(),
    })
}

/// GET /stats - Local registry statistics; never fans out
pub async fn stats(State(state): State<AppState>) -> Json<StatsResponse> {
    let node = state.local_node();
    let config = state.dispatcher.config();

    Json(StatsResponse {
        node_id: node.id,
        address: node.address,
        connections: state.connection_manager.stats(),
        peers: state.dispatcher.peers().len(),
        dispatch: DispatchStats {
            request_timeout_ms: config.request_timeout.as_millis() as u64,
            retry_on_timeout: config.retry_on_timeout,
            partial_on_timeout: config.partial_on_timeout,
        },
    })
}
