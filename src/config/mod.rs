mod settings;

pub use settings::{
    ClusterSettings, DiscoveryMode, LogConfig, LogFormat, OtelConfig, RedisConfig, ServerConfig,
    Settings, SseConfig,
};
