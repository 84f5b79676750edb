use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub sse: SseConfig,
    #[serde(default)]
    pub cluster: ClusterSettings,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub otel: OtelConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SseConfig {
    /// Keep-alive comment interval in seconds
    #[serde(default = "default_heartbeat_interval")]
    pub heartbeat_interval: u64,
    /// Interval of the dead connection sweep in seconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: u64,
    /// Buffered events per connection before sends are reported as undelivered
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    #[serde(default = "default_max_connections_per_user")]
    pub max_connections_per_user: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    Static,
    Redis,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClusterSettings {
    /// Unique identifier for this node
    #[serde(default = "default_node_id")]
    pub node_id: String,
    /// Address peers use to reach this node; defaults to `server.host:server.port`
    #[serde(default)]
    pub advertise_address: Option<String>,
    #[serde(default = "default_discovery")]
    pub discovery: DiscoveryMode,
    /// Peer addresses used by static discovery
    #[serde(default)]
    pub peers: Vec<String>,
    /// Shared secret required on the peer RPC endpoint
    #[serde(default)]
    pub secret: Option<String>,
    /// Deadline of a single remote call in milliseconds
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub retry_on_timeout: bool,
    #[serde(default = "default_partial_on_timeout")]
    pub partial_on_timeout: bool,
    /// Largest request body accepted on the peer RPC endpoint
    #[serde(default = "default_max_rpc_body_bytes")]
    pub max_rpc_body_bytes: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    /// Interval between membership heartbeats in seconds
    #[serde(default = "default_discovery_interval")]
    pub heartbeat_interval: u64,
    /// A node is considered gone after this many seconds without heartbeat
    #[serde(default = "default_node_ttl")]
    pub node_ttl: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
}

/// OTLP trace export; also read from `OTEL_ENABLED`, `OTEL_ENDPOINT`,
/// `OTEL_SERVICE_NAME` and `OTEL_SAMPLING_RATIO`
#[derive(Debug, Clone, Deserialize)]
pub struct OtelConfig {
    #[serde(default)]
    pub enabled: bool,
    /// OTLP gRPC endpoint
    #[serde(default = "default_otel_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_otel_service_name")]
    pub service_name: String,
    /// Fraction of traces kept, 0.0 to 1.0
    #[serde(default = "default_sampling_ratio")]
    pub sampling_ratio: f64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8081
}

fn default_heartbeat_interval() -> u64 {
    30
}

fn default_cleanup_interval() -> u64 {
    60
}

fn default_channel_capacity() -> usize {
    64
}

fn default_max_connections() -> usize {
    10000
}

fn default_max_connections_per_user() -> usize {
    10
}

fn default_node_id() -> String {
    format!("sse-{}", Uuid::new_v4().simple())
}

fn default_discovery() -> DiscoveryMode {
    DiscoveryMode::Static
}

fn default_request_timeout_ms() -> u64 {
    3000
}

fn default_partial_on_timeout() -> bool {
    true
}

fn default_max_rpc_body_bytes() -> usize {
    1024 * 1024
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_key_prefix() -> String {
    "sse:cluster".to_string()
}

fn default_discovery_interval() -> u64 {
    5
}

fn default_node_ttl() -> u64 {
    15
}

fn default_log_format() -> LogFormat {
    LogFormat::Pretty
}

fn default_otel_endpoint() -> String {
    "http://localhost:4317".to_string()
}

fn default_otel_service_name() -> String {
    "sse-cluster".to_string()
}

fn default_sampling_ratio() -> f64 {
    1.0
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8081)?
            .set_default("cluster.discovery", "static")?
            .set_default("cluster.request_timeout_ms", 3000)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            .set_override_option("otel.enabled", env::var("OTEL_ENABLED").ok())?
            .set_override_option("otel.endpoint", env::var("OTEL_ENDPOINT").ok())?
            .set_override_option("otel.service_name", env::var("OTEL_SERVICE_NAME").ok())?
            .set_override_option("otel.sampling_ratio", env::var("OTEL_SAMPLING_RATIO").ok())?
            // SERVER__PORT, CLUSTER__NODE_ID, CLUSTER__PEERS=a:1,b:2, REDIS__URL, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("cluster.peers"),
            );

        builder.build()?.try_deserialize()
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Address advertised to peers
    pub fn advertise_address(&self) -> String {
        self.cluster
            .advertise_address
            .clone()
            .unwrap_or_else(|| self.server_addr())
    }
}

impl ClusterSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

impl Default for SseConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: default_heartbeat_interval(),
            cleanup_interval: default_cleanup_interval(),
            channel_capacity: default_channel_capacity(),
            max_connections: default_max_connections(),
            max_connections_per_user: default_max_connections_per_user(),
        }
    }
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            advertise_address: None,
            discovery: default_discovery(),
            peers: vec![],
            secret: None,
            request_timeout_ms: default_request_timeout_ms(),
            retry_on_timeout: false,
            partial_on_timeout: default_partial_on_timeout(),
            max_rpc_body_bytes: default_max_rpc_body_bytes(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            key_prefix: default_key_prefix(),
            heartbeat_interval: default_discovery_interval(),
            node_ttl: default_node_ttl(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: default_log_format(),
        }
    }
}

impl Default for OtelConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: default_otel_endpoint(),
            service_name: default_otel_service_name(),
            sampling_ratio: default_sampling_ratio(),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            sse: SseConfig::default(),
            cluster: ClusterSettings::default(),
            redis: RedisConfig::default(),
            log: LogConfig::default(),
            otel: OtelConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let server = ServerConfig::default();
        assert_eq!(server.host, "0.0.0.0");
        assert_eq!(server.port, 8081);
    }

    #[test]
    fn test_cluster_defaults_favor_at_most_once() {
        let cluster = ClusterSettings::default();
        assert!(!cluster.retry_on_timeout);
        assert!(cluster.partial_on_timeout);
        assert_eq!(cluster.request_timeout(), Duration::from_secs(3));
        assert_eq!(cluster.discovery, DiscoveryMode::Static);
        assert!(cluster.node_id.starts_with("sse-"));
        assert_eq!(cluster.max_rpc_body_bytes, 1024 * 1024);
    }

    #[test]
    fn test_otel_disabled_by_default() {
        let otel = OtelConfig::default();
        assert!(!otel.enabled);
        assert_eq!(otel.endpoint, "http://localhost:4317");
        assert_eq!(otel.service_name, "sse-cluster");
        assert_eq!(otel.sampling_ratio, 1.0);
    }

    #[test]
    fn test_advertise_address_falls_back_to_bind_address() {
        let mut settings = Settings::default();
        settings.server.port = 9000;
        assert_eq!(settings.advertise_address(), "0.0.0.0:9000");

        settings.cluster.advertise_address = Some("10.0.0.5:9000".to_string());
        assert_eq!(settings.advertise_address(), "10.0.0.5:9000");
    }

    #[test]
    fn test_discovery_mode_deserializes_lowercase() {
        let mode: DiscoveryMode = serde_json::from_str(r#""redis""#).unwrap();
        assert_eq!(mode, DiscoveryMode::Redis);
    }
}
