//! Cluster-wide send endpoints.
//!
//! Every endpoint takes an `EventMessage` body and answers with the number of
//! connections the message was queued on across the cluster.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde::Deserialize;

use super::response::{resolve, WaitQuery};
use crate::cluster::ClusterResult;
use crate::connection_manager::{ConnectionId, EventMessage};
use crate::error::{AppError, Result};
use crate::server::AppState;

/// POST /api/v1/send/users/{user_id}
#[tracing::instrument(name = "http.send_user", skip(state, wait, message))]
pub async fn send_to_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Query(wait): Query<WaitQuery>,
    Json(message): Json<EventMessage>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(&state, state.dispatcher.send_by_user_id(&user_id, message), &wait).await
}

/// POST /api/v1/send/tokens/{access_token}
#[tracing::instrument(name = "http.send_token", skip(state, access_token, wait, message))]
pub async fn send_to_token(
    State(state): State<AppState>,
    Path(access_token): Path<String>,
    Query(wait): Query<WaitQuery>,
    Json(message): Json<EventMessage>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(
        &state,
        state.dispatcher.send_by_access_token(&access_token, message),
        &wait,
    )
    .await
}

/// POST /api/v1/send/tags/{tag}
#[tracing::instrument(name = "http.send_tag", skip(state, wait, message))]
pub async fn send_to_tag(
    State(state): State<AppState>,
    Path(tag): Path<String>,
    Query(wait): Query<WaitQuery>,
    Json(message): Json<EventMessage>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(&state, state.dispatcher.send_by_tag(&tag, message), &wait).await
}

/// POST /api/v1/send/connections/{connection_id}
#[tracing::instrument(name = "http.send_connection", skip(state, wait, message))]
pub async fn send_to_connection(
    State(state): State<AppState>,
    Path(connection_id): Path<ConnectionId>,
    Query(wait): Query<WaitQuery>,
    Json(message): Json<EventMessage>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(
        &state,
        state.dispatcher.send_by_connection_id(connection_id, message),
        &wait,
    )
    .await
}

/// POST /api/v1/send/all
#[tracing::instrument(name = "http.send_all", skip(state, wait, message))]
pub async fn send_to_all(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
    Json(message): Json<EventMessage>,
) -> Result<Json<ClusterResult<usize>>> {
    resolve(&state, state.dispatcher.send_all(message), &wait).await
}

#[derive(Debug, Deserialize)]
pub struct UsersSendRequest {
    pub user_ids: Vec<String>,
    pub message: EventMessage,
}

#[derive(Debug, Deserialize)]
pub struct TokensSendRequest {
    pub access_tokens: Vec<String>,
    pub message: EventMessage,
}

#[derive(Debug, Deserialize)]
pub struct TagsSendRequest {
    pub tags: Vec<String>,
    pub message: EventMessage,
}

fn require_targets(name: &str, targets: &[String]) -> Result<()> {
    if targets.is_empty() {
        return Err(AppError::Validation(format!("{} must not be empty", name)));
    }
    Ok(())
}

/// POST /api/v1/send/users - One message to several users
#[tracing::instrument(name = "http.send_users", skip_all)]
pub async fn send_to_users(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
    Json(request): Json<UsersSendRequest>,
) -> Result<Json<ClusterResult<usize>>> {
    require_targets("user_ids", &request.user_ids)?;
    resolve(
        &state,
        state
            .dispatcher
            .send_by_user_ids(request.user_ids, request.message),
        &wait,
    )
    .await
}

/// POST /api/v1/send/tokens
#[tracing::instrument(name = "http.send_tokens", skip_all)]
pub async fn send_to_tokens(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
    Json(request): Json<TokensSendRequest>,
) -> Result<Json<ClusterResult<usize>>> {
    require_targets("access_tokens", &request.access_tokens)?;
    resolve(
        &state,
        state
            .dispatcher
            .send_by_access_tokens(request.access_tokens, request.message),
        &wait,
    )
    .await
}

/// POST /api/v1/send/tags
#[tracing::instrument(name = "http.send_tags", skip_all)]
pub async fn send_to_tags(
    State(state): State<AppState>,
    Query(wait): Query<WaitQuery>,
    Json(request): Json<TagsSendRequest>,
) -> Result<Json<ClusterResult<usize>>> {
    require_targets("tags", &request.tags)?;
    resolve(
        &state,
        state.dispatcher.send_by_tags(request.tags, request.message),
        &wait,
    )
    .await
}
