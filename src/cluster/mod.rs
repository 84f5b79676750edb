//! Cluster coordination for SSE connections
//!
//! Connections live only on the node that accepted them. This module lets any
//! node query, message or disconnect connections anywhere in the cluster by
//! running the operation locally, forwarding it to every peer and merging the
//! answers.

mod aggregate;
mod discovery;
mod dispatcher;
mod factory;
mod future;
mod membership;
mod remote;
mod request;
mod types;

pub use aggregate::{Aggregate, ConnectionSet, DistinctCount, KeySet};
pub use discovery::{DiscoveryError, RedisDiscovery};
pub use dispatcher::ClusterDispatcher;
pub use factory::{create_membership, Membership};
pub use future::{ClusterFuture, ClusterOutcome, ClusterResult};
pub use membership::{remote_peers, MembershipProvider, SharedMembership, StaticMembership};
pub use remote::{HttpRemoteInvoker, RemoteInvoker, RPC_PATH};
pub use request::{execute_local, OperationOutput, OperationRequest, RemoteResponse};
pub use types::{ClusterError, ClusterNode, DispatchConfig, NodeFailure, RemoteError};
