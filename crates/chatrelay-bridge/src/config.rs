//! Application configuration.
//!
//! Read from `BRIDGE_*` environment variables; anything unset falls back to
//! the defaults below.

use std::path::PathBuf;

use chatrelay_server::RelayConfig;
use chatrelay_ws::{AdapterConfig, GatewayConfig};
use config::{Config, Environment};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};

const ENV_PREFIX: &str = "BRIDGE";

/// Bridge configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Interface the relay binds.
    #[serde(default = "default_host")]
    pub host: String,
    /// Relay port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Directory holding persisted credentials.
    #[serde(default = "default_auth_dir")]
    pub auth_dir: PathBuf,
    /// Protocol gateway WebSocket URL.
    #[serde(default = "default_gateway_url")]
    pub gateway_url: String,
    /// Fixed delay before redialling after a drop.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
    /// Close status code treated as an explicit logout.
    #[serde(default = "default_logout_status_code")]
    pub logout_status_code: u16,
    /// How long a peer's send waits for the network to accept it.
    #[serde(default = "default_send_timeout_ms")]
    pub send_timeout_ms: u64,
    /// Maximum concurrent peers (0 = unlimited).
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Frames queued per peer before deliveries are skipped.
    #[serde(default = "default_peer_buffer")]
    pub peer_buffer: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_auth_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatrelay")
        .join("auth")
}

fn default_gateway_url() -> String {
    "ws://127.0.0.1:3100".to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    5000
}

fn default_logout_status_code() -> u16 {
    401
}

fn default_send_timeout_ms() -> u64 {
    30_000
}

fn default_max_peers() -> usize {
    32
}

fn default_peer_buffer() -> usize {
    64
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            auth_dir: default_auth_dir(),
            gateway_url: default_gateway_url(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            logout_status_code: default_logout_status_code(),
            send_timeout_ms: default_send_timeout_ms(),
            max_peers: default_max_peers(),
            peer_buffer: default_peer_buffer(),
        }
    }
}

impl BridgeConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> AppResult<Self> {
        Self::from_source(Environment::with_prefix(ENV_PREFIX))
    }

    fn from_source(env: Environment) -> AppResult<Self> {
        let config: Self = Config::builder()
            .add_source(env.try_parsing(true))
            .build()
            .and_then(|settings| settings.try_deserialize())
            .map_err(|e| AppError::Config(format!("Failed to read environment: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration.
    pub fn validate(&self) -> AppResult<()> {
        if !(self.gateway_url.starts_with("ws://") || self.gateway_url.starts_with("wss://")) {
            return Err(AppError::Config(format!(
                "gateway_url must be a ws:// or wss:// URL, got {}",
                self.gateway_url
            )));
        }
        if self.send_timeout_ms == 0 {
            return Err(AppError::Config(
                "send_timeout_ms must be positive".to_string(),
            ));
        }
        if self.peer_buffer == 0 {
            return Err(AppError::Config("peer_buffer must be positive".to_string()));
        }
        if self.host.is_empty() {
            return Err(AppError::Config("host must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            host: self.host.clone(),
            port: self.port,
            max_peers: self.max_peers,
            peer_buffer: self.peer_buffer,
        }
    }

    pub fn adapter_config(&self) -> AdapterConfig {
        AdapterConfig {
            reconnect_delay_ms: self.reconnect_delay_ms,
            logout_status_code: self.logout_status_code,
            send_timeout_ms: self.send_timeout_ms,
            ..Default::default()
        }
    }

    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            url: self.gateway_url.clone(),
            ..Default::default()
        }
    }
}
