//! Environment-driven configuration.
//!
//! Loaded from process environment variables, with a `.env` file picked up
//! when present. Every knob has a default so a bare `canvas-sync` starts a
//! working relay.

use std::time::Duration;

use serde::Deserialize;

use crate::registry::EvictionPolicy;
use crate::server::ServerConfig;

/// Application configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Bind host for both listeners
    #[serde(default = "default_host")]
    pub host: String,

    /// WebSocket relay port
    #[serde(default = "default_ws_port")]
    pub ws_port: u16,

    /// Companion HTTP port
    #[serde(default = "default_http_port")]
    pub http_port: u16,

    /// Broadcast channel capacity per room
    #[serde(default = "default_broadcast_capacity")]
    pub broadcast_capacity: usize,

    /// Seconds between occupancy heartbeats
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u64,

    /// Per-connection update debounce in milliseconds
    #[serde(default = "default_debounce_ms")]
    pub update_debounce_ms: u64,

    /// Empty-room policy: "retain", "evict-when-empty", or "idle-ttl"
    #[serde(default = "default_eviction")]
    pub eviction: String,

    /// TTL in seconds for the "idle-ttl" policy
    pub idle_ttl_secs: Option<u64>,
}

impl Config {
    /// Load configuration from environment variables (and `.env` if present).
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        match envy::from_env::<Config>() {
            Ok(config) => {
                log::info!("Configuration loaded");
                Ok(config)
            }
            Err(e) => {
                log::error!("Failed to load configuration: {e}");
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Full relay bind address.
    pub fn ws_address(&self) -> String {
        format!("{}:{}", self.host, self.ws_port)
    }

    /// Full HTTP bind address.
    pub fn http_address(&self) -> String {
        format!("{}:{}", self.host, self.http_port)
    }

    /// Resolve the empty-room policy.
    pub fn eviction_policy(&self) -> Result<EvictionPolicy, ConfigError> {
        match self.eviction.as_str() {
            "retain" => Ok(EvictionPolicy::Retain),
            "evict-when-empty" => Ok(EvictionPolicy::EvictWhenEmpty),
            "idle-ttl" => {
                let secs = self
                    .idle_ttl_secs
                    .ok_or_else(|| ConfigError::InvalidEviction(self.eviction.clone()))?;
                Ok(EvictionPolicy::IdleTtl(Duration::from_secs(secs)))
            }
            other => Err(ConfigError::InvalidEviction(other.to_string())),
        }
    }

    /// Build the relay server configuration.
    pub fn server_config(&self) -> Result<ServerConfig, ConfigError> {
        Ok(ServerConfig {
            bind_addr: self.ws_address(),
            broadcast_capacity: self.broadcast_capacity,
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_secs),
            update_debounce: Duration::from_millis(self.update_debounce_ms),
            eviction: self.eviction_policy()?,
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            ws_port: default_ws_port(),
            http_port: default_http_port(),
            broadcast_capacity: default_broadcast_capacity(),
            heartbeat_interval_secs: default_heartbeat_secs(),
            update_debounce_ms: default_debounce_ms(),
            eviction: default_eviction(),
            idle_ttl_secs: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug)]
pub enum ConfigError {
    EnvError(envy::Error),
    InvalidEviction(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnvError(e) => write!(f, "Environment variable error: {e}"),
            Self::InvalidEviction(v) => write!(f, "Invalid eviction policy: {v}"),
        }
    }
}

impl std::error::Error for ConfigError {}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_ws_port() -> u16 {
    9090
}

fn default_http_port() -> u16 {
    3000
}

fn default_broadcast_capacity() -> usize {
    256
}

fn default_heartbeat_secs() -> u64 {
    10
}

fn default_debounce_ms() -> u64 {
    30
}

fn default_eviction() -> String {
    "retain".to_string()
}
