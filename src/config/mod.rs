//! Configuration management for the DOTS server.
//!
//! This module handles loading and managing application configuration
//! from environment variables and configuration files.

use std::env;
use config::{Config as ConfigBuilder, ConfigError, Environment, File};
use crate::models::Config;

/// Load configuration from the file named by `CONFIG_FILE` and the environment
pub fn load_config() -> Result<Config, ConfigError> {
    let config_file = env::var("CONFIG_FILE").unwrap_or_else(|_| "config/default.toml".to_string());
    load_config_from(Some(&config_file))
}

/// Load configuration, layering an optional TOML file and `DOTS__*` environment
/// variables over the built-in defaults
pub fn load_config_from(config_file: Option<&str>) -> Result<Config, ConfigError> {
    let mut builder = ConfigBuilder::builder()
        .set_default("server.host", "127.0.0.1")?
        .set_default("server.port", 4646)?
        .set_default("storage.backend", "memory")?
        .set_default("storage.redis_url", "redis://127.0.0.1:6379")?
        .set_default("signal_config.heartbeat_interval.default", 30)?
        .set_default("signal_config.heartbeat_interval.min", 15)?
        .set_default("signal_config.heartbeat_interval.max", 240)?
        .set_default("signal_config.missing_hb_allowed.default", 5)?
        .set_default("signal_config.missing_hb_allowed.min", 3)?
        .set_default("signal_config.missing_hb_allowed.max", 9)?
        .set_default("signal_config.max_retransmit.default", 3)?
        .set_default("signal_config.max_retransmit.min", 2)?
        .set_default("signal_config.max_retransmit.max", 15)?
        .set_default("signal_config.ack_timeout.default", 2)?
        .set_default("signal_config.ack_timeout.min", 1)?
        .set_default("signal_config.ack_timeout.max", 30)?
        .set_default("signal_config.ack_random_factor.default", 1.5)?
        .set_default("signal_config.ack_random_factor.min", 0.1)?
        .set_default("signal_config.ack_random_factor.max", 4.0)?
        .set_default("alias.lifetime_minutes", 7 * 1440)?
        .set_default("monitoring.enabled", true)?;

    if let Some(path) = config_file {
        builder = builder.add_source(File::with_name(path).required(false));
    }

    let config = builder
        .add_source(Environment::with_prefix("DOTS").separator("__").try_parsing(true))
        .build()?;

    config.try_deserialize()
}
