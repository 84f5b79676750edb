use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderMap, Request},
    middleware::Next,
    response::Response,
};
use subtle::ConstantTimeEq;

use super::AppState;
use crate::error::AppError;

/// Shared-secret authentication for the peer RPC endpoint.
/// Validates `Authorization: Bearer <secret>` against `cluster.secret`.
pub async fn cluster_secret_auth(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, AppError> {
    // No secret configured: peers are trusted (development mode)
    let Some(expected) = &state.settings.cluster.secret else {
        return Ok(next.run(req).await);
    };

    match extract_bearer_token(req.headers()) {
        Some(token) if secrets_match(expected, token) => Ok(next.run(req).await),
        Some(_) => {
            tracing::warn!("Invalid cluster secret provided");
            Err(AppError::Auth("Invalid cluster secret".to_string()))
        }
        None => {
            tracing::warn!("Missing cluster secret");
            Err(AppError::Auth("Missing cluster secret".to_string()))
        }
    }
}

/// Compare in constant time for equal lengths
fn secrets_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    expected.len() == provided.len() && expected.ct_eq(provided).into()
}

/// Extract bearer token from Authorization header
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}
