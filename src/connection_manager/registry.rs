use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::stats::{ConnectionStats, TagInfo};
use super::traits::LocalRegistry;
use super::types::{
    ConnectParams, ConnectionError, ConnectionId, ConnectionInfo, ConnectionLimits, EventMessage,
    RegistryError, SseConnection,
};
use crate::metrics::LocalMetrics;

type Index = DashMap<String, HashSet<ConnectionId>>;

/// Manages all SSE connections held by this process
pub struct ConnectionManager {
    node_id: String,
    /// connection_id -> SseConnection
    connections: DashMap<ConnectionId, Arc<SseConnection>>,
    /// user_id -> Set<connection_id> (supports multiple devices)
    user_index: Index,
    /// access_token -> Set<connection_id>
    token_index: Index,
    /// tag -> Set<connection_id>
    tag_index: Index,
    next_id: AtomicU64,
    /// Registered plus reserved slots, checked against `max_connections`
    active: AtomicUsize,
    limits: ConnectionLimits,
}

impl ConnectionManager {
    pub fn new(node_id: impl Into<String>) -> Self {
        Self::with_limits(node_id, ConnectionLimits::default())
    }

    pub fn with_limits(node_id: impl Into<String>, limits: ConnectionLimits) -> Self {
        // Random high half keeps ids from different processes apart; the low half counts up
        let salt = (rand::random::<u32>() as u64) << 32;
        Self {
            node_id: node_id.into(),
            connections: DashMap::new(),
            user_index: DashMap::new(),
            token_index: DashMap::new(),
            tag_index: DashMap::new(),
            next_id: AtomicU64::new(salt),
            active: AtomicUsize::new(0),
            limits,
        }
    }

    pub fn limits(&self) -> ConnectionLimits {
        self.limits
    }

    /// Register a new connection with limit checking
    ///
    /// The slot is reserved and the per-user check made under the user's index
    /// entry, so concurrent registrations never overshoot either limit. The
    /// handle becomes visible in `connections` only after every index holds it.
    pub fn register(
        &self,
        params: ConnectParams,
        sender: mpsc::Sender<EventMessage>,
    ) -> Result<Arc<SseConnection>, ConnectionError> {
        self.reserve_slot()?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let handle = Arc::new(SseConnection::new(id, params, sender));

        if let Some(user_id) = &handle.user_id {
            if let Err(e) = self.claim_user_slot(user_id, id) {
                self.active.fetch_sub(1, Ordering::AcqRel);
                return Err(e);
            }
        }
        if let Some(token) = &handle.access_token {
            index_insert(&self.token_index, token, id);
        }
        for tag in &handle.tags {
            index_insert(&self.tag_index, tag, id);
        }
        self.connections.insert(id, handle.clone());

        LocalMetrics::record_connection_opened();
        tracing::info!(
            connection_id = id,
            user_id = ?handle.user_id,
            tags = ?handle.tags,
            "Connection registered"
        );

        Ok(handle)
    }

    /// Remove a connection from every index; returns the handle if it was present
    pub fn unregister(&self, connection_id: ConnectionId) -> Option<Arc<SseConnection>> {
        let (_, handle) = self.connections.remove(&connection_id)?;

        if let Some(user_id) = &handle.user_id {
            index_remove(&self.user_index, user_id, connection_id);
        }
        if let Some(token) = &handle.access_token {
            index_remove(&self.token_index, token, connection_id);
        }
        for tag in &handle.tags {
            index_remove(&self.tag_index, tag, connection_id);
        }
        self.active.fetch_sub(1, Ordering::AcqRel);

        LocalMetrics::record_connection_closed();
        tracing::info!(
            connection_id = connection_id,
            user_id = ?handle.user_id,
            "Connection unregistered"
        );

        Some(handle)
    }

    fn reserve_slot(&self) -> Result<(), ConnectionError> {
        let max = self.limits.max_connections;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < max).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|current| ConnectionError::TotalLimitExceeded { current, max })
    }

    fn claim_user_slot(&self, user_id: &str, id: ConnectionId) -> Result<(), ConnectionError> {
        let max = self.limits.max_connections_per_user;
        {
            let mut ids = self.user_index.entry(user_id.to_string()).or_default();
            if ids.len() < max {
                ids.insert(id);
                return Ok(());
            }
        }

        // Drop the entry if this attempt created it
        self.user_index.remove_if(user_id, |_, ids| ids.is_empty());
        let current = self.user_index.get(user_id).map(|ids| ids.len()).unwrap_or(0);
        Err(ConnectionError::UserLimitExceeded {
            user_id: user_id.to_string(),
            current,
            max,
        })
    }

    pub fn get_connection(&self, connection_id: ConnectionId) -> Option<Arc<SseConnection>> {
        self.connections.get(&connection_id).map(|h| h.clone())
    }

    pub fn get_user_connections(&self, user_id: &str) -> Vec<Arc<SseConnection>> {
        self.lookup(&self.user_index, user_id)
    }

    pub fn get_token_connections(&self, access_token: &str) -> Vec<Arc<SseConnection>> {
        self.lookup(&self.token_index, access_token)
    }

    pub fn get_tag_connections(&self, tag: &str) -> Vec<Arc<SseConnection>> {
        self.lookup(&self.tag_index, tag)
    }

    pub fn get_all_connections(&self) -> Vec<Arc<SseConnection>> {
        self.connections.iter().map(|r| r.value().clone()).collect()
    }

    /// Get statistics
    pub fn stats(&self) -> ConnectionStats {
        let tags: HashMap<String, usize> = self
            .tag_index
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect();

        ConnectionStats {
            total_connections: self.connections.len(),
            unique_users: self.user_index.len(),
            access_tokens: self.token_index.len(),
            tags,
        }
    }

    pub fn list_tags(&self) -> Vec<TagInfo> {
        let mut tags: Vec<TagInfo> = self
            .tag_index
            .iter()
            .map(|entry| TagInfo {
                name: entry.key().clone(),
                connection_count: entry.value().len(),
            })
            .collect();
        tags.sort_by(|a, b| a.name.cmp(&b.name));
        tags
    }

    /// Connections whose client went away without the stream noticing yet
    pub fn find_dead_connections(&self) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_alive())
            .map(|entry| *entry.key())
            .collect()
    }

    /// Remove dead connections and return the count of removed connections
    pub fn cleanup_dead_connections(&self) -> usize {
        let dead = self.find_dead_connections();
        let mut removed = 0;

        for connection_id in dead {
            if let Some(handle) = self.unregister(connection_id) {
                handle.close();
                removed += 1;
                tracing::info!(connection_id = connection_id, "Removed dead connection");
            }
        }

        removed
    }

    /// Close every local connection, used on shutdown
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|r| *r.key()).collect();
        self.close_ids(ids)
    }

    fn lookup(&self, index: &Index, key: &str) -> Vec<Arc<SseConnection>> {
        let ids: Vec<ConnectionId> = index
            .get(key)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default();

        ids.into_iter()
            .filter_map(|id| self.connections.get(&id).map(|h| h.clone()))
            .collect()
    }

    /// Connections matching any of `keys`, each listed once
    fn lookup_many(&self, index: &Index, keys: &[String]) -> Vec<Arc<SseConnection>> {
        let ids: BTreeSet<ConnectionId> = keys
            .iter()
            .filter_map(|key| index.get(key.as_str()))
            .flat_map(|ids| ids.iter().copied().collect::<Vec<_>>())
            .collect();

        ids.into_iter()
            .filter_map(|id| self.connections.get(&id).map(|h| h.clone()))
            .collect()
    }

    fn keys(index: &Index) -> Vec<String> {
        let mut keys: Vec<String> = index
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        keys.sort();
        keys
    }

    fn describe(&self, connections: Vec<Arc<SseConnection>>) -> Vec<ConnectionInfo> {
        let mut infos: Vec<ConnectionInfo> =
            connections.iter().map(|c| c.info(&self.node_id)).collect();
        infos.sort_by_key(|info| info.connection_id);
        infos
    }

    fn deliver(&self, connections: Vec<Arc<SseConnection>>, message: &EventMessage) -> usize {
        let delivered = connections.iter().filter(|c| c.try_send(message)).count();
        LocalMetrics::record_delivered(delivered);
        delivered
    }

    fn close_ids(&self, ids: Vec<ConnectionId>) -> usize {
        let mut closed = 0;
        for id in ids {
            if let Some(handle) = self.unregister(id) {
                handle.close();
                closed += 1;
            }
        }
        closed
    }
}

fn index_insert(index: &Index, key: &str, id: ConnectionId) {
    index.entry(key.to_string()).or_default().insert(id);
}

fn index_remove(index: &Index, key: &str, id: ConnectionId) {
    index.remove_if_mut(key, |_, ids| {
        ids.remove(&id);
        ids.is_empty()
    });
}

fn require<'a>(name: &str, value: &'a str) -> Result<&'a str, RegistryError> {
    if value.trim().is_empty() {
        return Err(RegistryError::InvalidArgument(format!(
            "{} must not be empty",
            name
        )));
    }
    Ok(value)
}

fn require_all<'a>(name: &str, values: &'a [String]) -> Result<&'a [String], RegistryError> {
    for value in values {
        require(name, value)?;
    }
    Ok(values)
}

fn require_message(message: &EventMessage) -> Result<(), RegistryError> {
    if !message.is_well_formed() {
        return Err(RegistryError::InvalidArgument(
            "event name and id must not contain line breaks or NUL".to_string(),
        ));
    }
    Ok(())
}

impl LocalRegistry for ConnectionManager {
    fn node_id(&self) -> &str {
        &self.node_id
    }

    fn query_by_user_id(&self, user_id: &str) -> Result<Vec<ConnectionInfo>, RegistryError> {
        let user_id = require("user_id", user_id)?;
        Ok(self.describe(self.get_user_connections(user_id)))
    }

    fn query_by_access_token(
        &self,
        access_token: &str,
    ) -> Result<Vec<ConnectionInfo>, RegistryError> {
        let access_token = require("access_token", access_token)?;
        Ok(self.describe(self.get_token_connections(access_token)))
    }

    fn query_by_tag(&self, tag: &str) -> Result<Vec<ConnectionInfo>, RegistryError> {
        let tag = require("tag", tag)?;
        Ok(self.describe(self.get_tag_connections(tag)))
    }

    fn query_all(&self) -> Result<Vec<ConnectionInfo>, RegistryError> {
        Ok(self.describe(self.get_all_connections()))
    }

    fn user_ids(&self) -> Vec<String> {
        Self::keys(&self.user_index)
    }

    fn access_tokens(&self) -> Vec<String> {
        Self::keys(&self.token_index)
    }

    fn tags(&self) -> Vec<String> {
        Self::keys(&self.tag_index)
    }

    fn send_by_user_id(
        &self,
        user_id: &str,
        message: &EventMessage,
    ) -> Result<usize, RegistryError> {
        let user_id = require("user_id", user_id)?;
        require_message(message)?;
        Ok(self.deliver(self.get_user_connections(user_id), message))
    }

    fn send_by_access_token(
        &self,
        access_token: &str,
        message: &EventMessage,
    ) -> Result<usize, RegistryError> {
        let access_token = require("access_token", access_token)?;
        require_message(message)?;
        Ok(self.deliver(self.get_token_connections(access_token), message))
    }

    fn send_by_tag(&self, tag: &str, message: &EventMessage) -> Result<usize, RegistryError> {
        let tag = require("tag", tag)?;
        require_message(message)?;
        Ok(self.deliver(self.get_tag_connections(tag), message))
    }

    fn send_by_connection_id(
        &self,
        connection_id: ConnectionId,
        message: &EventMessage,
    ) -> Result<usize, RegistryError> {
        require_message(message)?;
        let targets = self.get_connection(connection_id).into_iter().collect();
        Ok(self.deliver(targets, message))
    }

    fn send_by_user_ids(
        &self,
        user_ids: &[String],
        message: &EventMessage,
    ) -> Result<usize, RegistryError> {
        let user_ids = require_all("user_id", user_ids)?;
        require_message(message)?;
        Ok(self.deliver(self.lookup_many(&self.user_index, user_ids), message))
    }

    fn send_by_access_tokens(
        &self,
        access_tokens: &[String],
        message: &EventMessage,
    ) -> Result<usize, RegistryError> {
        let access_tokens = require_all("access_token", access_tokens)?;
        require_message(message)?;
        Ok(self.deliver(self.lookup_many(&self.token_index, access_tokens), message))
    }

    fn send_by_tags(&self, tags: &[String], message: &EventMessage) -> Result<usize, RegistryError> {
        let tags = require_all("tag", tags)?;
        require_message(message)?;
        Ok(self.deliver(self.lookup_many(&self.tag_index, tags), message))
    }

    fn send_all(&self, message: &EventMessage) -> Result<usize, RegistryError> {
        require_message(message)?;
        Ok(self.deliver(self.get_all_connections(), message))
    }

    fn disconnect_by_user_id(&self, user_id: &str) -> Result<usize, RegistryError> {
        let user_id = require("user_id", user_id)?;
        let ids = self.get_user_connections(user_id).iter().map(|c| c.id).collect();
        Ok(self.close_ids(ids))
    }

    fn disconnect_by_access_token(&self, access_token: &str) -> Result<usize, RegistryError> {
        let access_token = require("access_token", access_token)?;
        let ids = self
            .get_token_connections(access_token)
            .iter()
            .map(|c| c.id)
            .collect();
        Ok(self.close_ids(ids))
    }

    fn disconnect_by_connection_id(
        &self,
        connection_id: ConnectionId,
    ) -> Result<usize, RegistryError> {
        Ok(self.close_ids(vec![connection_id]))
    }

    fn disconnect_by_connection_ids(
        &self,
        connection_ids: &[ConnectionId],
    ) -> Result<usize, RegistryError> {
        let ids: BTreeSet<ConnectionId> = connection_ids.iter().copied().collect();
        Ok(self.close_ids(ids.into_iter().collect()))
    }

    fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
