//! Relay server error types.

use chatrelay_ws::AdapterError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Peer limit reached ({max})")]
    PeerLimit { max: usize },

    #[error("Relay is shutting down")]
    ShuttingDown,

    #[error("Relay already started")]
    AlreadyStarted,

    #[error("Adapter error: {0}")]
    Adapter(#[from] AdapterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RelayResult<T> = Result<T, RelayError>;
