//! Relay server configuration.

use serde::{Deserialize, Serialize};

/// Local listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    /// Interface to bind.
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on (0 picks a free port).
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrent peers (0 = unlimited).
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
    /// Frames queued per peer before deliveries to it are skipped.
    #[serde(default = "default_peer_buffer")]
    pub peer_buffer: usize,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3001
}

fn default_max_peers() -> usize {
    32
}

fn default_peer_buffer() -> usize {
    64
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            max_peers: default_max_peers(),
            peer_buffer: default_peer_buffer(),
        }
    }
}

impl RelayConfig {
    /// `host:port` as given, for logs and errors.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
