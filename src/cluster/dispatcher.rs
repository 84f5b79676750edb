//! Cluster-wide execution of registry operations
//!
//! Every operation runs against the local registry first. A local error ends
//! the operation before any peer is contacted. Otherwise the request is sent
//! to every peer in a fresh membership snapshot and the answers are folded
//! into a `ClusterFuture` as they arrive.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::runtime::Handle;

use super::aggregate::{Aggregate, ConnectionSet, DistinctCount, KeySet};
use super::future::ClusterFuture;
use super::membership::{remote_peers, MembershipProvider};
use super::remote::RemoteInvoker;
use super::request::{OperationOutput, OperationRequest};
use super::types::{ClusterError, ClusterNode, DispatchConfig, NodeFailure, RemoteError};
use crate::connection_manager::{ConnectionId, EventMessage, LocalRegistry, RegistryError};
use crate::metrics::{ClusterMetrics, RemoteOutcome};

/// Fans operations out to the cluster and aggregates the answers
pub struct ClusterDispatcher {
    local: Arc<dyn LocalRegistry>,
    node: ClusterNode,
    membership: Arc<dyn MembershipProvider>,
    invoker: Arc<dyn RemoteInvoker>,
    config: DispatchConfig,
    runtime: Handle,
}

impl ClusterDispatcher {
    /// `node` describes this process as peers see it; membership entries that
    /// resolve to it are never called. Peer calls are spawned on `runtime`, so
    /// operations may be started from any thread.
    pub fn new(
        local: Arc<dyn LocalRegistry>,
        node: ClusterNode,
        membership: Arc<dyn MembershipProvider>,
        invoker: Arc<dyn RemoteInvoker>,
        config: DispatchConfig,
        runtime: Handle,
    ) -> Self {
        Self {
            local,
            node,
            membership,
            invoker,
            config,
            runtime,
        }
    }

    pub fn node_id(&self) -> &str {
        self.local.node_id()
    }

    pub fn node(&self) -> &ClusterNode {
        &self.node
    }

    pub fn config(&self) -> DispatchConfig {
        self.config
    }

    pub fn local(&self) -> &Arc<dyn LocalRegistry> {
        &self.local
    }

    /// Peers an operation would be sent to right now
    pub fn peers(&self) -> Vec<ClusterNode> {
        remote_peers(&self.node, self.membership.current_peers())
    }

    // ------------------------------------------------------------------------
    // Queries (union of descriptors)
    // ------------------------------------------------------------------------

    pub fn query_by_user_id(&self, user_id: &str) -> ClusterFuture<ConnectionSet> {
        self.dispatch(
            OperationRequest::QueryByUserId {
                user_id: user_id.to_string(),
            },
            |local| local.query_by_user_id(user_id).map(ConnectionSet::from),
        )
    }

    pub fn query_by_access_token(&self, access_token: &str) -> ClusterFuture<ConnectionSet> {
        self.dispatch(
            OperationRequest::QueryByAccessToken {
                access_token: access_token.to_string(),
            },
            |local| {
                local
                    .query_by_access_token(access_token)
                    .map(ConnectionSet::from)
            },
        )
    }

    pub fn query_by_tag(&self, tag: &str) -> ClusterFuture<ConnectionSet> {
        self.dispatch(
            OperationRequest::QueryByTag {
                tag: tag.to_string(),
            },
            |local| local.query_by_tag(tag).map(ConnectionSet::from),
        )
    }

    pub fn query_all(&self) -> ClusterFuture<ConnectionSet> {
        self.dispatch(OperationRequest::QueryAll, |local| {
            local.query_all().map(ConnectionSet::from)
        })
    }

    // ------------------------------------------------------------------------
    // Key listings (union of distinct keys)
    // ------------------------------------------------------------------------

    pub fn user_ids(&self) -> ClusterFuture<KeySet> {
        self.dispatch(OperationRequest::QueryUserIds, |local| {
            Ok(KeySet::from(local.user_ids()))
        })
    }

    pub fn access_tokens(&self) -> ClusterFuture<KeySet> {
        self.dispatch(OperationRequest::QueryAccessTokens, |local| {
            Ok(KeySet::from(local.access_tokens()))
        })
    }

    pub fn tags(&self) -> ClusterFuture<KeySet> {
        self.dispatch(OperationRequest::QueryTags, |local| {
            Ok(KeySet::from(local.tags()))
        })
    }

    /// Users with a connection anywhere, each counted once
    pub fn user_count(&self) -> ClusterFuture<DistinctCount> {
        self.dispatch(OperationRequest::QueryUserIds, |local| {
            Ok(DistinctCount::from(local.user_ids()))
        })
    }

    /// Access tokens with a connection anywhere, each counted once
    pub fn access_token_count(&self) -> ClusterFuture<DistinctCount> {
        self.dispatch(OperationRequest::QueryAccessTokens, |local| {
            Ok(DistinctCount::from(local.access_tokens()))
        })
    }

    /// Whether the user holds at least one connection anywhere in the cluster.
    /// Unreachable peers count as not holding one.
    pub async fn is_online(&self, user_id: &str) -> Result<bool, ClusterError> {
        let result = self.query_by_user_id(user_id).wait().await?;
        Ok(!result.value.is_empty())
    }

    // ------------------------------------------------------------------------
    // Sends (sum of deliveries)
    // ------------------------------------------------------------------------

    pub fn send_by_user_id(&self, user_id: &str, message: EventMessage) -> ClusterFuture<usize> {
        self.dispatch(
            OperationRequest::SendByUserId {
                user_id: user_id.to_string(),
                message: message.clone(),
            },
            |local| local.send_by_user_id(user_id, &message),
        )
    }

    pub fn send_by_access_token(
        &self,
        access_token: &str,
        message: EventMessage,
    ) -> ClusterFuture<usize> {
        self.dispatch(
            OperationRequest::SendByAccessToken {
                access_token: access_token.to_string(),
                message: message.clone(),
            },
            |local| local.send_by_access_token(access_token, &message),
        )
    }

    pub fn send_by_tag(&self, tag: &str, message: EventMessage) -> ClusterFuture<usize> {
        self.dispatch(
            OperationRequest::SendByTag {
                tag: tag.to_string(),
                message: message.clone(),
            },
            |local| local.send_by_tag(tag, &message),
        )
    }

    pub fn send_by_connection_id(
        &self,
        connection_id: ConnectionId,
        message: EventMessage,
    ) -> ClusterFuture<usize> {
        self.dispatch(
            OperationRequest::SendByConnectionId {
                connection_id,
                message: message.clone(),
            },
            |local| local.send_by_connection_id(connection_id, &message),
        )
    }

    pub fn send_by_user_ids(
        &self,
        user_ids: Vec<String>,
        message: EventMessage,
    ) -> ClusterFuture<usize> {
        let user_ids = distinct(user_ids);
        self.dispatch(
            OperationRequest::SendByUserIds {
                user_ids: user_ids.clone(),
                message: message.clone(),
            },
            |local| local.send_by_user_ids(&user_ids, &message),
        )
    }

    pub fn send_by_access_tokens(
        &self,
        access_tokens: Vec<String>,
        message: EventMessage,
    ) -> ClusterFuture<usize> {
        let access_tokens = distinct(access_tokens);
        self.dispatch(
            OperationRequest::SendByAccessTokens {
                access_tokens: access_tokens.clone(),
                message: message.clone(),
            },
            |local| local.send_by_access_tokens(&access_tokens, &message),
        )
    }

    pub fn send_by_tags(&self, tags: Vec<String>, message: EventMessage) -> ClusterFuture<usize> {
        let tags = distinct(tags);
        self.dispatch(
            OperationRequest::SendByTags {
                tags: tags.clone(),
                message: message.clone(),
            },
            |local| local.send_by_tags(&tags, &message),
        )
    }

    pub fn send_all(&self, message: EventMessage) -> ClusterFuture<usize> {
        self.dispatch(
            OperationRequest::SendAll {
                message: message.clone(),
            },
            |local| local.send_all(&message),
        )
    }

    // ------------------------------------------------------------------------
    // Disconnects (sum of closed connections)
    // ------------------------------------------------------------------------

    pub fn disconnect_by_user_id(&self, user_id: &str) -> ClusterFuture<usize> {
        self.dispatch(
            OperationRequest::DisconnectByUserId {
                user_id: user_id.to_string(),
            },
            |local| local.disconnect_by_user_id(user_id),
        )
    }

    pub fn disconnect_by_access_token(&self, access_token: &str) -> ClusterFuture<usize> {
        self.dispatch(
            OperationRequest::DisconnectByAccessToken {
                access_token: access_token.to_string(),
            },
            |local| local.disconnect_by_access_token(access_token),
        )
    }

    pub fn disconnect_by_connection_id(&self, connection_id: ConnectionId) -> ClusterFuture<usize> {
        self.dispatch(
            OperationRequest::DisconnectByConnectionId { connection_id },
            |local| local.disconnect_by_connection_id(connection_id),
        )
    }

    /// Connection ids are process-unique, so every node closes only its own
    pub fn disconnect_by_connection_ids(
        &self,
        connection_ids: Vec<ConnectionId>,
    ) -> ClusterFuture<usize> {
        let connection_ids = distinct(connection_ids);
        self.dispatch(
            OperationRequest::DisconnectByConnectionIds {
                connection_ids: connection_ids.clone(),
            },
            |local| local.disconnect_by_connection_ids(&connection_ids),
        )
    }

    pub fn connection_count(&self) -> ClusterFuture<usize> {
        self.dispatch(OperationRequest::ConnectionCount, |local| {
            Ok(local.connection_count())
        })
    }

    fn dispatch<T, F>(&self, request: OperationRequest, local: F) -> ClusterFuture<T>
    where
        T: Aggregate + TryFrom<OperationOutput, Error = RemoteError>,
        F: FnOnce(&dyn LocalRegistry) -> Result<T, RegistryError>,
    {
        let operation = request.name();
        ClusterMetrics::record_dispatch(operation);

        let local_value = match local(self.local.as_ref()) {
            Ok(value) => value,
            Err(e) => {
                ClusterMetrics::record_local_failure();
                tracing::debug!(
                    operation = operation,
                    error = %e,
                    "Local operation rejected, peers not contacted"
                );
                return ClusterFuture::failed(ClusterError::Local(e));
            }
        };

        let local_id = self.local.node_id().to_string();
        let peers = self.peers();

        let future = ClusterFuture::start(
            &local_id,
            local_value,
            peers.iter().map(|p| p.id.clone()),
            self.config.partial_on_timeout,
        );

        tracing::debug!(
            operation = operation,
            peers = peers.len(),
            "Dispatching cluster operation"
        );

        let request = Arc::new(request);
        for node in peers {
            let task = self.runtime.spawn(call_peer(
                self.invoker.clone(),
                node,
                request.clone(),
                self.config,
                future.clone(),
            ));
            future.track(task.abort_handle());
        }

        future
    }
}

fn distinct<T: Ord>(mut keys: Vec<T>) -> Vec<T> {
    keys.sort();
    keys.dedup();
    keys
}

async fn invoke_once(
    invoker: &dyn RemoteInvoker,
    node: &ClusterNode,
    request: &OperationRequest,
    timeout: Duration,
) -> Result<OperationOutput, RemoteError> {
    // The invoker gets the deadline too; this guard covers invokers that ignore it
    match tokio::time::timeout(timeout, invoker.invoke(node, request, timeout)).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timeout(timeout)),
    }
}

async fn call_peer<T>(
    invoker: Arc<dyn RemoteInvoker>,
    node: ClusterNode,
    request: Arc<OperationRequest>,
    config: DispatchConfig,
    future: ClusterFuture<T>,
) where
    T: Aggregate + TryFrom<OperationOutput, Error = RemoteError>,
{
    let started = Instant::now();
    let mut result = invoke_once(invoker.as_ref(), &node, &request, config.request_timeout).await;

    if config.retry_on_timeout && matches!(&result, Err(e) if e.is_timeout()) {
        tracing::debug!(
            node_id = %node.id,
            operation = request.name(),
            "Remote call timed out, retrying once"
        );
        result = invoke_once(invoker.as_ref(), &node, &request, config.request_timeout).await;
    }

    let result = result.and_then(T::try_from);
    let outcome = match &result {
        Ok(_) => RemoteOutcome::Ok,
        Err(e) if e.is_timeout() => RemoteOutcome::Timeout,
        Err(RemoteError::Transport { .. }) => RemoteOutcome::TransportError,
        Err(RemoteError::Domain { .. }) => RemoteOutcome::DomainError,
    };
    ClusterMetrics::record_remote(outcome, started.elapsed());

    match result {
        Ok(value) => future.complete_node(&node.id, value),
        Err(error) => {
            tracing::warn!(
                node_id = %node.id,
                address = %node.address,
                operation = request.name(),
                error = %error,
                "Remote call failed"
            );
            future.fail_node(NodeFailure {
                node_id: node.id,
                address: node.address,
                error,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::membership::StaticMembership;
    use crate::connection_manager::{ConnectParams, ConnectionManager};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::mpsc;

    /// Answers every call with a fixed output after an optional delay
    struct ScriptedInvoker {
        output: Result<OperationOutput, RemoteError>,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl ScriptedInvoker {
        fn new(output: Result<OperationOutput, RemoteError>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                output,
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl RemoteInvoker for ScriptedInvoker {
        async fn invoke(
            &self,
            _node: &ClusterNode,
            _request: &OperationRequest,
            _timeout: Duration,
        ) -> Result<OperationOutput, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.output.clone()
        }
    }

    fn dispatcher(
        peers: Vec<ClusterNode>,
        invoker: Arc<ScriptedInvoker>,
        config: DispatchConfig,
    ) -> (ClusterDispatcher, Arc<ConnectionManager>) {
        let manager = Arc::new(ConnectionManager::new("a"));
        let dispatcher = ClusterDispatcher::new(
            manager.clone(),
            ClusterNode::local("a", "a:1"),
            Arc::new(StaticMembership::new(peers)),
            invoker,
            config,
            Handle::current(),
        );
        (dispatcher, manager)
    }

    fn connect(manager: &ConnectionManager, user: &str) -> mpsc::Receiver<EventMessage> {
        let (tx, rx) = mpsc::channel(8);
        manager
            .register(
                ConnectParams {
                    user_id: Some(user.to_string()),
                    ..Default::default()
                },
                tx,
            )
            .unwrap();
        rx
    }

    #[tokio::test]
    async fn test_local_error_skips_peers() {
        let invoker = ScriptedInvoker::new(Ok(OperationOutput::Count(1)), Duration::ZERO);
        let (dispatcher, _manager) = dispatcher(
            vec![ClusterNode::new("b", "b:1")],
            invoker.clone(),
            DispatchConfig::default(),
        );

        let err = dispatcher.disconnect_by_user_id("").wait().await.unwrap_err();
        assert!(matches!(err, ClusterError::Local(RegistryError::InvalidArgument(_))));
        tokio::task::yield_now().await;
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_self_and_duplicate_peers_are_skipped() {
        let invoker = ScriptedInvoker::new(Ok(OperationOutput::Count(2)), Duration::ZERO);
        let (dispatcher, manager) = dispatcher(
            vec![
                ClusterNode::new("b", "b:1"),
                ClusterNode::new("b", "b:2"),
                ClusterNode::local("x", "x:1"),
                ClusterNode::new("a", "a:1"),
            ],
            invoker.clone(),
            DispatchConfig::default(),
        );
        let _rx = connect(&manager, "u1");

        let result = dispatcher.connection_count().wait().await.unwrap();
        assert_eq!(result.value, 3);
        assert_eq!(result.responded, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_peer_at_local_address_is_not_called() {
        let invoker = ScriptedInvoker::new(Ok(OperationOutput::Count(1)), Duration::ZERO);
        let (dispatcher, manager) = dispatcher(
            vec![
                ClusterNode::new("a-previous", "http://A:1/"),
                ClusterNode::new("c", "c:1"),
                ClusterNode::new("c-alias", "C:1"),
            ],
            invoker.clone(),
            DispatchConfig::default(),
        );
        let mut rx = connect(&manager, "u1");

        let result = dispatcher
            .send_by_user_id("u1", EventMessage::new("ping", serde_json::Value::Null))
            .wait()
            .await
            .unwrap();
        assert_eq!(result.value, 2);
        assert_eq!(result.responded, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_user_count_counts_shared_users_once() {
        let invoker = ScriptedInvoker::new(
            Ok(OperationOutput::Keys(vec!["u1".to_string(), "u2".to_string()])),
            Duration::ZERO,
        );
        let (dispatcher, manager) = dispatcher(
            vec![ClusterNode::new("b", "b:1")],
            invoker,
            DispatchConfig::default(),
        );
        let _rx1 = connect(&manager, "u1");
        let _rx2 = connect(&manager, "u1");

        let result = dispatcher.user_count().wait().await.unwrap();
        assert_eq!(result.value.count(), 2);

        let users = dispatcher.user_ids().wait().await.unwrap();
        assert!(users.value.contains("u2"));
        assert_eq!(users.value.len(), 2);
    }

    #[tokio::test]
    async fn test_timeout_is_not_retried_by_default() {
        let invoker = ScriptedInvoker::new(Ok(OperationOutput::Count(1)), Duration::from_secs(5));
        let config = DispatchConfig {
            request_timeout: Duration::from_millis(20),
            ..Default::default()
        };
        let (dispatcher, _manager) =
            dispatcher(vec![ClusterNode::new("b", "b:1")], invoker.clone(), config);

        let result = dispatcher.connection_count().wait().await.unwrap();
        assert_eq!(result.value, 0);
        assert_eq!(result.failures.len(), 1);
        assert!(result.failures[0].error.is_timeout());
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_retried_once_when_enabled() {
        let invoker = ScriptedInvoker::new(Ok(OperationOutput::Count(1)), Duration::from_secs(5));
        let config = DispatchConfig {
            request_timeout: Duration::from_millis(20),
            retry_on_timeout: true,
            ..Default::default()
        };
        let (dispatcher, _manager) =
            dispatcher(vec![ClusterNode::new("b", "b:1")], invoker.clone(), config);

        let result = dispatcher.connection_count().wait().await.unwrap();
        assert_eq!(result.failures.len(), 1);
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_transport_failure_is_not_retried() {
        let invoker = ScriptedInvoker::new(Err(RemoteError::transport("refused")), Duration::ZERO);
        let config = DispatchConfig {
            retry_on_timeout: true,
            ..Default::default()
        };
        let (dispatcher, _manager) =
            dispatcher(vec![ClusterNode::new("b", "b:1")], invoker.clone(), config);

        let result = dispatcher.connection_count().wait().await.unwrap();
        assert_eq!(result.failures[0].node_id, "b");
        assert_eq!(invoker.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_mismatched_output_is_domain_failure() {
        let invoker = ScriptedInvoker::new(Ok(OperationOutput::Count(1)), Duration::ZERO);
        let (dispatcher, _manager) = dispatcher(
            vec![ClusterNode::new("b", "b:1")],
            invoker,
            DispatchConfig::default(),
        );

        let result = dispatcher.query_all().wait().await.unwrap();
        assert!(matches!(
            result.failures[0].error,
            RemoteError::Domain { .. }
        ));
    }

    #[tokio::test]
    async fn test_is_online() {
        let invoker = ScriptedInvoker::new(Ok(OperationOutput::Connections(vec![])), Duration::ZERO);
        let (dispatcher, manager) = dispatcher(
            vec![ClusterNode::new("b", "b:1")],
            invoker,
            DispatchConfig::default(),
        );
        let _rx = connect(&manager, "u1");

        assert!(dispatcher.is_online("u1").await.unwrap());
        assert!(!dispatcher.is_online("u2").await.unwrap());
    }

    #[tokio::test]
    async fn test_send_delivers_locally() {
        let invoker = ScriptedInvoker::new(Ok(OperationOutput::Count(4)), Duration::ZERO);
        let (dispatcher, manager) = dispatcher(
            vec![ClusterNode::new("b", "b:1")],
            invoker,
            DispatchConfig::default(),
        );
        let mut rx = connect(&manager, "u1");

        let result = dispatcher
            .send_by_user_id("u1", EventMessage::text("hello"))
            .wait()
            .await
            .unwrap();
        assert_eq!(result.value, 5);
        assert_eq!(rx.recv().await.unwrap().data_string(), "hello");
    }
}
