// Shared infrastructure
pub mod config;
pub mod error;
pub mod metrics;
pub mod redis;
pub mod telemetry;

// Connection registry and cluster coordination
pub mod cluster;
pub mod connection_manager;

// Application layer
pub mod api;
pub mod server;
pub mod sse;

// Supporting modules
pub mod shutdown;
pub mod tasks;
