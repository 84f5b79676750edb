//! API layer - HTTP endpoint handlers organized by domain.

mod cluster;
mod connection;
mod health;
mod metrics;
mod response;
mod routes;
mod send;

pub use cluster::{cluster_nodes, cluster_rpc, NodesResponse};
pub use connection::{
    connection_count, disconnect_connection, disconnect_connections, disconnect_token,
    disconnect_user, list_tags, list_tokens, list_users, query_connections, token_count,
    user_count, user_online, ConnectionQuery, DisconnectConnectionsRequest, OnlineResponse,
};
pub use health::{health, stats, HealthResponse, StatsResponse};
pub use metrics::prometheus_metrics;
pub use response::{resolve, WaitQuery};
pub use routes::{api_routes, cluster_routes};
pub use send::{
    send_to_all, send_to_connection, send_to_tag, send_to_tags, send_to_token, send_to_tokens,
    send_to_user, send_to_users, TagsSendRequest, TokensSendRequest, UsersSendRequest,
};
