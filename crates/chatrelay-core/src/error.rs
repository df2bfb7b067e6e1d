//! Error taxonomy for the bridge.

use thiserror::Error;

/// Failures the bridge can surface to peers or to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// Persisted session credentials could not be read. Fatal to `connect()`.
    #[error("Credential load failed: {0}")]
    CredentialLoad(String),

    /// A send was attempted with no live session.
    #[error("Not connected")]
    NotConnected,

    /// Network-level failure during an active session.
    #[error("Transport error: {0}")]
    Transport(String),

    /// A peer sent something that is not a valid command.
    #[error("Invalid command: {0}")]
    MalformedCommand(String),

    /// The network ended the session with an explicit logout.
    #[error("Logged out; re-pair required")]
    ProtocolLogout,
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, BridgeError>;
