//! Local registry of SSE connections
//!
//! This module provides:
//! - Connection handle management
//! - User, access token and tag indexing
//! - The `LocalRegistry` contract used by the cluster dispatcher
//! - Connection statistics

mod registry;
mod stats;
mod traits;
mod types;

pub use registry::ConnectionManager;
pub use stats::{ConnectionStats, TagInfo};
pub use traits::LocalRegistry;
pub use types::{
    is_sse_field, ConnectParams, ConnectionError, ConnectionId, ConnectionInfo, ConnectionLimits,
    EventMessage, RegistryError, SseConnection,
};
