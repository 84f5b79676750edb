//! Shared plumbing for endpoints backed by a cluster operation.

use std::time::Duration;

use axum::Json;
use serde::{Deserialize, Serialize};

use crate::cluster::{Aggregate, ClusterFuture, ClusterResult};
use crate::error::AppError;
use crate::server::AppState;

/// Optional `?timeout_ms=` override of how long the handler waits
#[derive(Debug, Default, Deserialize)]
pub struct WaitQuery {
    pub timeout_ms: Option<u64>,
}

/// Wait for a cluster operation and render `{value, responded, failures, pending, partial}`
pub async fn resolve<T>(
    state: &AppState,
    future: ClusterFuture<T>,
    wait: &WaitQuery,
) -> Result<Json<ClusterResult<T>>, AppError>
where
    T: Aggregate + Serialize,
{
    let budget = wait
        .timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| state.wait_budget());

    let result = future.wait_timeout(budget).await?;
    if result.partial {
        tracing::debug!(
            failures = result.failures.len(),
            pending = result.pending.len(),
            "Returning partial cluster result"
        );
    }
    Ok(Json(result))
}
