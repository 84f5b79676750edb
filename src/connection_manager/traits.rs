//! Local registry trait definition

use super::types::{ConnectionId, ConnectionInfo, EventMessage, RegistryError};

/// Node-local connection registry consumed by the cluster dispatcher.
///
/// Every method is synchronous and only touches connections held by this
/// process. Implementations do their own locking so the methods can run
/// concurrently with connection accept and close.
pub trait LocalRegistry: Send + Sync {
    /// Identifier of the node owning this registry
    fn node_id(&self) -> &str;

    fn query_by_user_id(&self, user_id: &str) -> Result<Vec<ConnectionInfo>, RegistryError>;

    fn query_by_access_token(&self, access_token: &str)
        -> Result<Vec<ConnectionInfo>, RegistryError>;

    fn query_by_tag(&self, tag: &str) -> Result<Vec<ConnectionInfo>, RegistryError>;

    fn query_all(&self) -> Result<Vec<ConnectionInfo>, RegistryError>;

    /// Distinct user ids with at least one connection, sorted
    fn user_ids(&self) -> Vec<String>;

    /// Distinct access tokens with at least one connection, sorted
    fn access_tokens(&self) -> Vec<String>;

    /// Distinct tags with at least one connection, sorted
    fn tags(&self) -> Vec<String>;

    /// Returns the number of connections the message was queued on
    fn send_by_user_id(&self, user_id: &str, message: &EventMessage)
        -> Result<usize, RegistryError>;

    fn send_by_access_token(
        &self,
        access_token: &str,
        message: &EventMessage,
    ) -> Result<usize, RegistryError>;

    fn send_by_tag(&self, tag: &str, message: &EventMessage) -> Result<usize, RegistryError>;

    fn send_by_connection_id(
        &self,
        connection_id: ConnectionId,
        message: &EventMessage,
    ) -> Result<usize, RegistryError>;

    /// A connection matching several keys receives the message once
    fn send_by_user_ids(
        &self,
        user_ids: &[String],
        message: &EventMessage,
    ) -> Result<usize, RegistryError>;

    fn send_by_access_tokens(
        &self,
        access_tokens: &[String],
        message: &EventMessage,
    ) -> Result<usize, RegistryError>;

    fn send_by_tags(&self, tags: &[String], message: &EventMessage) -> Result<usize, RegistryError>;

    fn send_all(&self, message: &EventMessage) -> Result<usize, RegistryError>;

    /// Returns the number of connections closed
    fn disconnect_by_user_id(&self, user_id: &str) -> Result<usize, RegistryError>;

    fn disconnect_by_access_token(&self, access_token: &str) -> Result<usize, RegistryError>;

    fn disconnect_by_connection_id(&self, connection_id: ConnectionId)
        -> Result<usize, RegistryError>;

    fn disconnect_by_connection_ids(
        &self,
        connection_ids: &[ConnectionId],
    ) -> Result<usize, RegistryError>;

    fn connection_count(&self) -> usize;
}
