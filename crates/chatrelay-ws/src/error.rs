//! Adapter error types.

use std::path::PathBuf;

use chatrelay_core::BridgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("Failed to load credentials from {path}: {reason}")]
    CredentialLoad { path: PathBuf, reason: String },

    #[error("Failed to save credentials to {path}: {reason}")]
    CredentialSave { path: PathBuf, reason: String },

    #[error("Not connected")]
    NotConnected,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Send rejected: {0}")]
    SendRejected(String),

    #[error("Tungstenite error: {0}")]
    Tungstenite(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

impl From<AdapterError> for BridgeError {
    fn from(err: AdapterError) -> Self {
        match err {
            AdapterError::CredentialLoad { .. } => Self::CredentialLoad(err.to_string()),
            AdapterError::NotConnected => Self::NotConnected,
            AdapterError::Transport(reason) => Self::Transport(reason),
            other => Self::Transport(other.to_string()),
        }
    }
}
