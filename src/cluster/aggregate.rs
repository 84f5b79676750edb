//! Merge rules for per-node results
//!
//! Every rule is associative and commutative, so the order in which nodes
//! answer never changes the final value.

use serde::{Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};

use super::request::OperationOutput;
use super::types::RemoteError;
use crate::connection_manager::{ConnectionId, ConnectionInfo};

/// A per-node result that can be folded into a cluster-wide one
pub trait Aggregate: Default + Clone + Send + 'static {
    fn merge(&mut self, other: Self);
}

/// Counts add up across nodes
impl Aggregate for usize {
    fn merge(&mut self, other: Self) {
        *self += other;
    }
}

/// Union of connection descriptors keyed by (node id, connection id)
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(into = "Vec<ConnectionInfo>")]
pub struct ConnectionSet(BTreeMap<(String, ConnectionId), ConnectionInfo>);

impl ConnectionSet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConnectionInfo> {
        self.0.values()
    }

    pub fn insert(&mut self, info: ConnectionInfo) {
        self.0
            .entry((info.node_id.clone(), info.connection_id))
            .or_insert(info);
    }

    pub fn into_vec(self) -> Vec<ConnectionInfo> {
        self.0.into_values().collect()
    }
}

impl From<Vec<ConnectionInfo>> for ConnectionSet {
    fn from(infos: Vec<ConnectionInfo>) -> Self {
        infos.into_iter().collect()
    }
}

impl FromIterator<ConnectionInfo> for ConnectionSet {
    fn from_iter<I: IntoIterator<Item = ConnectionInfo>>(iter: I) -> Self {
        let mut set = ConnectionSet::default();
        for info in iter {
            set.insert(info);
        }
        set
    }
}

impl From<ConnectionSet> for Vec<ConnectionInfo> {
    fn from(set: ConnectionSet) -> Self {
        set.into_vec()
    }
}

impl Aggregate for ConnectionSet {
    fn merge(&mut self, other: Self) {
        for (key, info) in other.0 {
            self.0.entry(key).or_insert(info);
        }
    }
}

/// Union of distinct keys such as user ids or tags
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct KeySet(BTreeSet<String>);

impl KeySet {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = &String> {
        self.0.iter()
    }
}

impl From<Vec<String>> for KeySet {
    fn from(keys: Vec<String>) -> Self {
        Self(keys.into_iter().collect())
    }
}

impl Aggregate for KeySet {
    fn merge(&mut self, other: Self) {
        self.0.extend(other.0);
    }
}

/// Number of distinct keys across the cluster
///
/// Nodes report their keys rather than a count, so a user connected to two
/// nodes is counted once. Serializes as the bare count.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistinctCount(KeySet);

impl DistinctCount {
    pub fn count(&self) -> usize {
        self.0.len()
    }
}

impl From<Vec<String>> for DistinctCount {
    fn from(keys: Vec<String>) -> Self {
        Self(keys.into())
    }
}

impl Aggregate for DistinctCount {
    fn merge(&mut self, other: Self) {
        self.0.merge(other.0);
    }
}

impl Serialize for DistinctCount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(self.count() as u64)
    }
}

fn unexpected(expected: &str, output: &OperationOutput) -> RemoteError {
    RemoteError::domain(format!("expected {}, got {}", expected, output.kind()))
}

impl TryFrom<OperationOutput> for usize {
    type Error = RemoteError;

    fn try_from(output: OperationOutput) -> Result<Self, Self::Error> {
        match output {
            OperationOutput::Count(n) => Ok(n),
            other => Err(unexpected("count", &other)),
        }
    }
}

impl TryFrom<OperationOutput> for ConnectionSet {
    type Error = RemoteError;

    fn try_from(output: OperationOutput) -> Result<Self, Self::Error> {
        match output {
            OperationOutput::Connections(infos) => Ok(infos.into()),
            other => Err(unexpected("connections", &other)),
        }
    }
}

impl TryFrom<OperationOutput> for KeySet {
    type Error = RemoteError;

    fn try_from(output: OperationOutput) -> Result<Self, Self::Error> {
        match output {
            OperationOutput::Keys(keys) => Ok(keys.into()),
            other => Err(unexpected("keys", &other)),
        }
    }
}

impl TryFrom<OperationOutput> for DistinctCount {
    type Error = RemoteError;

    fn try_from(output: OperationOutput) -> Result<Self, Self::Error> {
        KeySet::try_from(output).map(DistinctCount)
    }
}
