//! YAML configuration, following `getsentry-synapse`'s `Config::from_file`
//! shape: one struct per concern, loaded with `serde_yaml` from a path given
//! on the command line.

use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

#[derive(Debug, Deserialize)]
pub struct ListenerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default = "default_rust_log")]
    pub rust_log: String,
}

fn default_rust_log() -> String {
    "info".to_string()
}

#[derive(Debug, Deserialize)]
pub struct Config {
    pub listener: ListenerConfig,
    pub admin_listener: ListenerConfig,
    /// Kept for config compatibility with a future persistent-store backend;
    /// the store shipped in this workspace is in-memory and ignores it.
    #[serde(default)]
    pub mongo_uri: Option<String>,
    #[serde(default)]
    pub database_name: Option<String>,
    #[serde(default = "default_per_db_timeout_ms")]
    pub per_db_timeout_ms: u64,
    pub gateway_timeout_ms: u64,
    #[serde(default = "default_max_concurrent_upstreams")]
    pub max_concurrent_upstreams: usize,
    pub base_url: url::Url,
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_per_db_timeout_ms() -> u64 {
    240_000
}

fn default_max_concurrent_upstreams() -> usize {
    10
}

impl Config {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }
}
