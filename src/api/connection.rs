//! Cluster-wide connection query and disconnect endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::{Deserialize, Serialize};

use super::response::{resolve, WaitQuery};
use crate::cluster::{ClusterResult, ConnectionSet, DistinctCount, KeySet};
use crate::connection_manager::ConnectionId;
use crate::error::{AppError, Result};
use crate::server::AppState;

/// Selector for GET /api/v1/connections; at most one field may be set
#[derive(Debug, Default, Deserialize)]
pub struct ConnectionQuery {
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub tag: Option<String>,
}

/// GET /api/v1/connections - Connections anywhere in the cluster
#[tracing::instrument(name = "http.query_connections", skip(state, query, wait))]
pub async fn query_connections(
    State(state): State<AppState>,
    Query(query): Query<ConnectionQuery>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<ConnectionSet>>> {
    let dispatcher = &state.dispatcher;
    let future = match (&query.user_id, &query.access_token, &query.tag) {
        (None, None, None) => dispatcher.query_all(),
        (Some(user_id), None, None) => dispatcher.query_by_user_id(user_id),
        (None, Some(token), None) => dispatcher.query_by_access_token(token),
        (None, None, Some(tag)) => dispatcher.query_by_tag(tag),
        _ => {
            return Err(AppError::Validation(
                "Use only one of user_id, access_token or tag".to_string(),
            ))
        }
    };

    resolve(&state, future, &wait).await
}

/// GET /api/v1/connections/count - Total connections in the cluster
#[tracing::instrument(name = "http.connection_count", skip(state, wait))]
pub async fn connection_count(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(&state, state.dispatcher.connection_count(), &wait).await
}

/// GET /api/v1/users - Distinct user ids connected anywhere
#[tracing::instrument(name = "http.list_users", skip(state, wait))]
pub async fn list_users(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<KeySet>>> {
    resolve(&state, state.dispatcher.user_ids(), &wait).await
}

/// GET /api/v1/users/count - Users counted once however many nodes hold them
#[tracing::instrument(name = "http.user_count", skip(state, wait))]
pub async fn user_count(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<DistinctCount>>> {
    resolve(&state, state.dispatcher.user_count(), &wait).await
}

/// GET /api/v1/tokens
#[tracing::instrument(name = "http.list_tokens", skip(state, wait))]
pub async fn list_tokens(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<KeySet>>> {
    resolve(&state, state.dispatcher.access_tokens(), &wait).await
}

/// GET /api/v1/tokens/count
#[tracing::instrument(name = "http.token_count", skip(state, wait))]
pub async fn token_count(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<DistinctCount>>> {
    resolve(&state, state.dispatcher.access_token_count(), &wait).await
}

/// GET /api/v1/tags
#[tracing::instrument(name = "http.list_tags", skip(state, wait))]
pub async fn list_tags(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<KeySet>>> {
    resolve(&state, state.dispatcher.tags(), &wait).await
}

#[derive(Debug, Serialize)]
pub struct OnlineResponse {
    pub user_id: String,
    pub online: bool,
    /// Some peers did not answer, so `online == false` is not conclusive
    pub partial: bool,
}

/// GET /api/v1/users/{user_id}/online
#[tracing::instrument(name = "http.user_online", skip(state, wait))]
pub async fn user_online(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<OnlineResponse>> {
    let Json(result) = resolve(&state, state.dispatcher.query_by_user_id(&user_id), &wait).await?;

    Ok(Json(OnlineResponse {
        user_id,
        online: !result.value.is_empty(),
        partial: result.partial,
    }))
}

/// DELETE /api/v1/connections/users/{user_id}
#[tracing::instrument(name = "http.disconnect_user", skip(state, wait))]
pub async fn disconnect_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(&state, state.dispatcher.disconnect_by_user_id(&user_id), &wait).await
}

/// DELETE /api/v1/connections/tokens/{access_token}
#[tracing::instrument(name = "http.disconnect_token", skip(state, access_token, wait))]
pub async fn disconnect_token(
    State(state): State<AppState>,
    Path(access_token): Path<String>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(
        &state,
        state.dispatcher.disconnect_by_access_token(&access_token),
        &wait,
    )
    .await
}

/// DELETE /api/v1/connections/{connection_id}
#[tracing::instrument(name = "http.disconnect_connection", skip(state, wait))]
pub async fn disconnect_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<ConnectionId>,
    Query(wait): Query<WaitQuery>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(
        &state,
        state.dispatcher.disconnect_by_connection_id(connection_id),
        &wait,
    )
    .await
}

#[derive(Debug, Deserialize)]
pub struct DisconnectConnectionsRequest {
    pub connection_ids: Vec<ConnectionId>,
}

/// POST /api/v1/disconnect/connections - Close several connections by id
#[tracing::instrument(name = "http.disconnect_connections", skip_all)]
pub async fn disconnect_connections(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
    Json(request): Json<DisconnectConnectionsRequest>,
) -> Result<Json<ClusterResult<usize>>> {
    if request.connection_ids.is_empty() {
        return Err(AppError::Validation(
            "connection_ids must not be empty".to_string(),
        ));
    }

    resolve(
        &state,
        state
            .dispatcher
            .disconnect_by_connection_ids(request.connection_ids),
        &wait,
    )
    .await
}
