use serde::{Deserialize, Serialize};

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
}

/// Storage backend selection
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    Memory,
    Redis,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Which store implementation to use
    pub backend: StorageBackend,
    /// Redis connection URL, used by the `redis` backend
    pub redis_url: String,
}

/// Default value and permitted range of an integer signaling parameter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegerBound {
    pub default: i32,
    pub min: i32,
    pub max: i32,
}

/// Default value and permitted range of a decimal signaling parameter.
///
/// Held as floats only while crossing the configuration boundary; converted to
/// fixed-point by `SystemDefaultConfiguration::from_settings`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct DecimalBound {
    pub default: f64,
    pub min: f64,
    pub max: f64,
}

/// Signal channel session configuration defaults and bounds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignalConfigSettings {
    /// Heartbeat interval in seconds
    pub heartbeat_interval: IntegerBound,
    /// Heartbeats that may be missed before the peer is considered lost
    pub missing_hb_allowed: IntegerBound,
    /// Maximum number of retransmissions of a confirmable message
    pub max_retransmit: IntegerBound,
    /// Initial acknowledgement timeout in seconds
    pub ack_timeout: IntegerBound,
    /// Randomisation factor applied to the acknowledgement timeout
    pub ack_random_factor: DecimalBound,
}

impl Default for SignalConfigSettings {
    fn default() -> Self {
        Self {
            heartbeat_interval: IntegerBound { default: 30, min: 15, max: 240 },
            missing_hb_allowed: IntegerBound { default: 5, min: 3, max: 9 },
            max_retransmit: IntegerBound { default: 3, min: 2, max: 15 },
            ack_timeout: IntegerBound { default: 2, min: 1, max: 30 },
            ack_random_factor: DecimalBound { default: 1.5, min: 0.1, max: 4.0 },
        }
    }
}

/// Alias configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AliasConfig {
    /// Lifetime granted to an alias on every create or update, in minutes
    pub lifetime_minutes: i64,
}

/// Monitoring configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    /// Whether to install the Prometheus recorder and expose `/metrics`
    pub enabled: bool,
}

/// Application configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Storage configuration
    pub storage: StorageConfig,
    /// Session configuration defaults and bounds
    pub signal_config: SignalConfigSettings,
    /// Alias configuration
    pub alias: AliasConfig,
    /// Monitoring configuration
    pub monitoring: MonitoringConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 4646,
            },
            storage: StorageConfig {
                backend: StorageBackend::Memory,
                redis_url: "redis://127.0.0.1:6379".to_string(),
            },
            signal_config: SignalConfigSettings::default(),
            alias: AliasConfig {
                lifetime_minutes: 7 * 1440,
            },
            monitoring: MonitoringConfig { enabled: true },
        }
    }
}
