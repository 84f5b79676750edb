use axum::{
    middleware,
    routing::{delete, get, post},
    Router,
};
use tower_http::limit::RequestBodyLimitLayer;

use crate::cluster::RPC_PATH;
use crate::server::{cluster_secret_auth, AppState};

use super::cluster::{cluster_nodes, cluster_rpc};
use super::connection::{
    connection_count, disconnect_connection, disconnect_connections, disconnect_token,
    disconnect_user, list_tags, list_tokens, list_users, query_connections, token_count,
    user_count, user_online,
};
use super::health::{health, stats};
use super::metrics::prometheus_metrics;
use super::send::{
    send_to_all, send_to_connection, send_to_tag, send_to_tags, send_to_token, send_to_tokens,
    send_to_user, send_to_users,
};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        // Health & Stats
        .route("/health", get(health))
        .route("/stats", get(stats))
        .route("/metrics", get(prometheus_metrics))
        .nest(
            "/api/v1",
            Router::new()
                // Queries
                .route("/connections", get(query_connections))
                .route("/connections/count", get(connection_count))
                .route("/users", get(list_users))
                .route("/users/count", get(user_count))
                .route("/users/{user_id}/online", get(user_online))
                .route("/tokens", get(list_tokens))
                .route("/tokens/count", get(token_count))
                .route("/tags", get(list_tags))
                // Disconnects
                .route("/connections/users/{user_id}", delete(disconnect_user))
                .route("/connections/tokens/{access_token}", delete(disconnect_token))
                .route("/connections/{connection_id}", delete(disconnect_connection))
                .route("/disconnect/connections", post(disconnect_connections))
                // Sends
                .route("/send/users", post(send_to_users))
                .route("/send/users/{user_id}", post(send_to_user))
                .route("/send/tokens", post(send_to_tokens))
                .route("/send/tokens/{access_token}", post(send_to_token))
                .route("/send/tags", post(send_to_tags))
                .route("/send/tags/{tag}", post(send_to_tag))
                .route("/send/connections/{connection_id}", post(send_to_connection))
                .route("/send/all", post(send_to_all))
                // Membership
                .route("/cluster/nodes", get(cluster_nodes)),
        )
}

/// Peer-facing routes, guarded by the shared cluster secret and a body size cap
pub fn cluster_routes(state: AppState) -> Router<AppState> {
    let body_limit = state.settings.cluster.max_rpc_body_bytes;

    Router::new()
        .route(RPC_PATH, post(cluster_rpc))
        .route_layer(middleware::from_fn_with_state(state, cluster_secret_auth))
        .layer(RequestBodyLimitLayer::new(body_limit))
}
