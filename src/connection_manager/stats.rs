//! Connection statistics and info structures

use serde::Serialize;
use std::collections::HashMap;

/// Connection statistics
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub total_connections: usize,
    pub unique_users: usize,
    pub access_tokens: usize,
    pub tags: HashMap<String, usize>,
}

/// Tag information
#[derive(Debug, Clone, Serialize)]
pub struct TagInfo {
    pub name: String,
    pub connection_count: usize,
}
