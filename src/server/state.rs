use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;

use crate::cluster::{ClusterDispatcher, ClusterNode, DispatchConfig, MembershipProvider, RemoteInvoker};
use crate::config::Settings;
use crate::connection_manager::{ConnectionLimits, ConnectionManager};
use crate::error::AppError;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub connection_manager: Arc<ConnectionManager>,
    pub dispatcher: Arc<ClusterDispatcher>,
}

impl AppState {
    /// Must be called from within a Tokio runtime; peer calls are spawned on it
    pub fn new(
        settings: Settings,
        membership: Arc<dyn MembershipProvider>,
        invoker: Arc<dyn RemoteInvoker>,
    ) -> Result<Self, AppError> {
        let runtime = Handle::try_current()
            .map_err(|e| AppError::Internal(format!("No Tokio runtime: {}", e)))?;

        let limits = ConnectionLimits {
            max_connections: settings.sse.max_connections,
            max_connections_per_user: settings.sse.max_connections_per_user,
        };
        let connection_manager = Arc::new(ConnectionManager::with_limits(
            settings.cluster.node_id.clone(),
            limits,
        ));

        let node = ClusterNode::local(
            settings.cluster.node_id.clone(),
            settings.advertise_address(),
        );
        let dispatcher = Arc::new(ClusterDispatcher::new(
            connection_manager.clone(),
            node,
            membership,
            invoker,
            DispatchConfig::from(&settings.cluster),
            runtime,
        ));

        Ok(Self {
            settings: Arc::new(settings),
            connection_manager,
            dispatcher,
        })
    }

    /// Descriptor of this node as peers see it
    pub fn local_node(&self) -> ClusterNode {
        self.dispatcher.node().clone()
    }

    /// Upper bound an HTTP handler waits for a cluster operation
    pub fn wait_budget(&self) -> Duration {
        let config = self.dispatcher.config();
        let attempts = if config.retry_on_timeout { 2 } else { 1 };
        config.request_timeout * attempts + Duration::from_millis(500)
    }
}
