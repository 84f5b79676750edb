//! Cluster endpoints: peer RPC and membership listing.

use axum::{extract::State, http::HeaderMap, Json};
use serde::Serialize;

use crate::cluster::{execute_local, ClusterNode, OperationRequest, RemoteResponse};
use crate::metrics::ClusterMetrics;
use crate::server::AppState;
use crate::telemetry::adopt_remote_parent;

/// POST /api/v1/cluster/rpc - Execute an operation on this node only
///
/// Registry errors travel in the body so the caller can tell them apart from
/// transport failures. The span joins the caller's trace when one is propagated.
#[tracing::instrument(name = "http.cluster_rpc", skip_all)]
pub async fn cluster_rpc(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<OperationRequest>,
) -> Json<RemoteResponse> {
    adopt_remote_parent(&headers);

    let result = execute_local(state.connection_manager.as_ref(), &request);
    ClusterMetrics::record_rpc_served(result.is_ok());

    match &result {
        Ok(_) => tracing::debug!(operation = request.name(), "Served peer RPC"),
        Err(e) => tracing::debug!(
            operation = request.name(),
            error = %e,
            "Peer RPC rejected by local registry"
        ),
    }

    Json(RemoteResponse::from(result))
}

#[derive(Debug, Serialize)]
pub struct NodesResponse {
    pub node: ClusterNode,
    pub local_connections: usize,
    pub peers: Vec<ClusterNode>,
}

/// GET /api/v1/cluster/nodes - This node and its current peers
#[tracing::instrument(name = "http.cluster_nodes", skip(state))]
pub async fn cluster_nodes(State(state): State<AppState>) -> Json<NodesResponse> {
    Json(NodesResponse {
        node: state.local_node(),
        local_connections: state.connection_manager.stats().total_connections,
        peers: state.dispatcher.peers(),
    })
}
