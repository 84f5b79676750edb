//! Remote invocation of registry operations on peer nodes

use async_trait::async_trait;
use std::time::Duration;

use super::request::{OperationOutput, OperationRequest, RemoteResponse};
use super::types::{ClusterNode, RemoteError};
use crate::telemetry::inject_current_span;

/// Path of the peer RPC endpoint
pub const RPC_PATH: &str = "/api/v1/cluster/rpc";

/// Executes an operation on one peer.
///
/// Implementations classify every failure: anything that prevented an answer
/// is `RemoteError::Transport`, an answer that reports an error is
/// `RemoteError::Domain`.
#[async_trait]
pub trait RemoteInvoker: Send + Sync {
    async fn invoke(
        &self,
        node: &ClusterNode,
        request: &OperationRequest,
        timeout: Duration,
    ) -> Result<OperationOutput, RemoteError>;
}

/// Calls peers over HTTP
pub struct HttpRemoteInvoker {
    client: reqwest::Client,
    secret: Option<String>,
}

impl HttpRemoteInvoker {
    pub fn new(secret: Option<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .user_agent(format!("sse-cluster/{}", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(2))
            .build()?;

        Ok(Self { client, secret })
    }

    fn endpoint(address: &str) -> String {
        if address.starts_with("http://") || address.starts_with("https://") {
            format!("{}{}", address.trim_end_matches('/'), RPC_PATH)
        } else {
            format!("http://{}{}", address, RPC_PATH)
        }
    }
}

fn classify(error: reqwest::Error, timeout: Duration) -> RemoteError {
    if error.is_timeout() {
        RemoteError::timeout(timeout)
    } else if error.is_connect() {
        RemoteError::transport(format!("connect failed: {}", error))
    } else {
        RemoteError::transport(error.to_string())
    }
}

#[async_trait]
impl RemoteInvoker for HttpRemoteInvoker {
    async fn invoke(
        &self,
        node: &ClusterNode,
        request: &OperationRequest,
        timeout: Duration,
    ) -> Result<OperationOutput, RemoteError> {
        let url = Self::endpoint(&node.address);

        let mut headers = reqwest::header::HeaderMap::new();
        inject_current_span(&mut headers);

        let mut builder = self
            .client
            .post(&url)
            .timeout(timeout)
            .headers(headers)
            .json(request);
        if let Some(secret) = &self.secret {
            builder = builder.bearer_auth(secret);
        }

        let response = builder.send().await.map_err(|e| classify(e, timeout))?;
        let status = response.status();
        let body = response.bytes().await.map_err(|e| classify(e, timeout))?;

        match serde_json::from_slice::<RemoteResponse>(&body) {
            Ok(RemoteResponse::Ok { value }) => Ok(value),
            Ok(RemoteResponse::Error { error }) => Err(RemoteError::domain(error)),
            Err(e) if status.is_success() => Err(RemoteError::domain(format!(
                "malformed response from {}: {}",
                node.id, e
            ))),
            Err(_) => Err(RemoteError::transport(format!(
                "{} answered HTTP {}",
                node.id, status
            ))),
        }
    }
}
