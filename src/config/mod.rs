use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::PoolError;

/// A named set of regional gateway endpoints
///
/// The first endpoint is the designated primary; the rest are failover
/// candidates in declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Gateway {
    /// Ordered endpoint URLs (`https://host:port`)
    pub endpoints: Vec<String>,
}

/// Per-endpoint pool sizing and lifecycle limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum number of channels per endpoint (> 0)
    #[serde(default = "default_max_pool_size")]
    pub max_pool_size: usize,

    /// Idle-channel floor the cleanup pass never breaches (<= max_pool_size)
    #[serde(default = "default_min_idle_connections")]
    pub min_idle_connections: usize,

    /// Connection establishment timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Idle duration after which a channel becomes eligible for cleanup
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,

    /// Maximum channel lifetime before the health pass evicts it
    #[serde(default = "default_max_lifetime_ms")]
    pub max_lifetime_ms: u64,
}

fn default_max_pool_size() -> usize {
    10
}

fn default_min_idle_connections() -> usize {
    2
}

fn default_connect_timeout_ms() -> u64 {
    5_000
}

fn default_idle_timeout_ms() -> u64 {
    300_000
}

fn default_max_lifetime_ms() -> u64 {
    1_800_000
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_pool_size: default_max_pool_size(),
            min_idle_connections: default_min_idle_connections(),
            connect_timeout_ms: default_connect_timeout_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
            max_lifetime_ms: default_max_lifetime_ms(),
        }
    }
}

impl PoolConfig {
    /// Validate sizing invariants. Callers apply a new configuration only
    /// after this returns Ok, so an invalid one is never partially applied.
    pub fn validate(&self) -> std::result::Result<(), PoolError> {
        if self.max_pool_size == 0 {
            return Err(PoolError::Configuration(
                "max_pool_size must be greater than 0".to_string(),
            ));
        }
        if self.min_idle_connections > self.max_pool_size {
            return Err(PoolError::Configuration(format!(
                "min_idle_connections ({}) must not exceed max_pool_size ({})",
                self.min_idle_connections, self.max_pool_size
            )));
        }
        Ok(())
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }

    pub fn max_lifetime(&self) -> Duration {
        Duration::from_millis(self.max_lifetime_ms)
    }
}

/// Transport-level options applied when a channel is built
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOptions {
    /// HTTP/2 keep-alive ping interval in milliseconds
    #[serde(default = "default_keep_alive_interval_ms")]
    pub keep_alive_interval_ms: u64,

    /// How long to wait for a keep-alive ack before the peer counts as dead
    #[serde(default = "default_keep_alive_timeout_ms")]
    pub keep_alive_timeout_ms: u64,

    /// Upper bound on a single transport frame
    #[serde(default = "default_max_message_bytes")]
    pub max_message_bytes: u32,

    /// User-agent announced on outgoing requests
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_keep_alive_interval_ms() -> u64 {
    30_000
}

fn default_keep_alive_timeout_ms() -> u64 {
    10_000
}

fn default_max_message_bytes() -> u32 {
    4 * 1024 * 1024
}

fn default_user_agent() -> String {
    concat!("veripool/", env!("CARGO_PKG_VERSION")).to_string()
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            keep_alive_interval_ms: default_keep_alive_interval_ms(),
            keep_alive_timeout_ms: default_keep_alive_timeout_ms(),
            max_message_bytes: default_max_message_bytes(),
            user_agent: default_user_agent(),
        }
    }
}

impl ChannelOptions {
    pub fn keep_alive_interval(&self) -> Duration {
        Duration::from_millis(self.keep_alive_interval_ms)
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_timeout_ms)
    }
}

/// Background maintenance schedule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MaintenanceConfig {
    /// Seconds between lifetime-eviction health passes
    #[serde(default = "default_health_check_interval_secs")]
    pub health_check_interval_secs: u64,

    /// Seconds between idle-channel cleanup passes
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_health_check_interval_secs() -> u64 {
    30
}

fn default_cleanup_interval_secs() -> u64 {
    60
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            health_check_interval_secs: default_health_check_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

impl MaintenanceConfig {
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Named gateway endpoint sets
    #[serde(default)]
    pub gateways: HashMap<String, Gateway>,

    /// Gateway to use when none is named explicitly
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_gateway: Option<String>,

    /// Pool sizing and lifecycle limits
    #[serde(default)]
    pub pool: PoolConfig,

    /// Transport options
    #[serde(default)]
    pub channel: ChannelOptions,

    /// Background maintenance schedule
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

impl Config {
    /// Get a gateway by name, or the default gateway if not specified
    pub fn get_gateway(&self, name: Option<&str>) -> Option<&Gateway> {
        if let Some(name) = name {
            self.gateways.get(name)
        } else if let Some(default) = &self.default_gateway {
            self.gateways.get(default)
        } else {
            self.gateways.values().next()
        }
    }
}

/// Load configuration from a YAML file
pub fn load_from_yaml<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path.as_ref())
        .context(format!("Failed to read config file: {:?}", path.as_ref()))?;

    let config: Config =
        serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

    config.pool.validate().context("Invalid pool configuration")?;

    Ok(config)
}

/// Load configuration from environment variables
///
/// - VERIPOOL_GATEWAYS (comma-separated list of endpoint URLs, required)
/// - VERIPOOL_MAX_POOL_SIZE / VERIPOOL_MIN_IDLE_CONNECTIONS (optional)
/// - VERIPOOL_CONNECT_TIMEOUT_MS / VERIPOOL_IDLE_TIMEOUT_MS / VERIPOOL_MAX_LIFETIME_MS (optional)
/// - VERIPOOL_HEALTH_CHECK_INTERVAL / VERIPOOL_CLEANUP_INTERVAL (seconds, optional)
pub fn load_from_env() -> Result<Config> {
    // Try to load .env file if it exists (don't fail if it doesn't)
    let _ = dotenvy::dotenv();

    let mut config = Config::default();

    let endpoints_str = std::env::var("VERIPOOL_GATEWAYS")
        .context("VERIPOOL_GATEWAYS environment variable not set")?;

    let endpoints: Vec<String> = endpoints_str
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();

    if endpoints.is_empty() {
        anyhow::bail!("VERIPOOL_GATEWAYS contains no valid endpoints");
    }

    config
        .gateways
        .insert("default".to_string(), Gateway { endpoints });
    config.default_gateway = Some("default".to_string());

    if let Ok(size) = std::env::var("VERIPOOL_MAX_POOL_SIZE") {
        if let Ok(val) = size.parse() {
            config.pool.max_pool_size = val;
        }
    }

    if let Ok(min) = std::env::var("VERIPOOL_MIN_IDLE_CONNECTIONS") {
        if let Ok(val) = min.parse() {
            config.pool.min_idle_connections = val;
        }
    }

    if let Ok(timeout) = std::env::var("VERIPOOL_CONNECT_TIMEOUT_MS") {
        if let Ok(val) = timeout.parse() {
            config.pool.connect_timeout_ms = val;
        }
    }

    if let Ok(idle) = std::env::var("VERIPOOL_IDLE_TIMEOUT_MS") {
        if let Ok(val) = idle.parse() {
            config.pool.idle_timeout_ms = val;
        }
    }

    if let Ok(lifetime) = std::env::var("VERIPOOL_MAX_LIFETIME_MS") {
        if let Ok(val) = lifetime.parse() {
            config.pool.max_lifetime_ms = val;
        }
    }

    if let Ok(interval) = std::env::var("VERIPOOL_HEALTH_CHECK_INTERVAL") {
        if let Ok(val) = interval.parse() {
            config.maintenance.health_check_interval_secs = val;
        }
    }

    if let Ok(interval) = std::env::var("VERIPOOL_CLEANUP_INTERVAL") {
        if let Ok(val) = interval.parse() {
            config.maintenance.cleanup_interval_secs = val;
        }
    }

    config.pool.validate().context("Invalid pool configuration")?;

    Ok(config)
}

/// Load configuration from file or environment
///
/// Tries the YAML file when a path is given, otherwise falls back to
/// environment variables.
pub fn load_config(config_path: Option<&str>, gateway_name: Option<&str>) -> Result<Config> {
    if let Some(path) = config_path {
        let mut config = load_from_yaml(path)?;

        // If a specific gateway is requested, make it the default
        if let Some(name) = gateway_name {
            if !config.gateways.contains_key(name) {
                anyhow::bail!("Gateway '{}' not found in config file", name);
            }
            config.default_gateway = Some(name.to_string());
        }

        Ok(config)
    } else {
        load_from_env()
    }
}
