//! Bridge events broadcast from the adapter to local peers.
//!
//! Every event serializes to a single JSON object tagged by `type`:
//!
//! ```text
//! {"type":"message","id":"..","sender":"..","pn":"..","content":"..","timestamp":0,"isGroup":false}
//! {"type":"status","status":"connected"}
//! {"type":"qr","qr":".."}
//! {"type":"error","error":".."}
//! ```

use serde::{Deserialize, Serialize};

/// A chat message reduced to plain text.
///
/// Built once by the adapter and dropped after it has been broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundMessage {
    /// Protocol-assigned message ID.
    pub id: String,
    /// Routable address of the chat the message arrived in.
    pub sender: String,
    /// Secondary address form of the sender (empty when unknown).
    #[serde(rename = "pn", default)]
    pub alt_sender: String,
    /// Extracted text content.
    pub content: String,
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    /// Whether the chat is a group.
    pub is_group: bool,
}

/// Link state reported to peers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Connected,
    Disconnected,
}

/// Normalized event emitted by the adapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum BridgeEvent {
    /// An inbound chat message.
    Message(InboundMessage),
    /// Link state transition.
    Status { status: LinkStatus },
    /// Pairing challenge to be scanned by a human.
    Qr { qr: String },
    /// Non-fatal failure worth telling peers about.
    Error { error: String },
}

impl BridgeEvent {
    pub fn status(status: LinkStatus) -> Self {
        Self::Status { status }
    }

    pub fn qr(challenge: impl Into<String>) -> Self {
        Self::Qr {
            qr: challenge.into(),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self::Error {
            error: error.into(),
        }
    }

    /// Event tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Message(_) => "message",
            Self::Status { .. } => "status",
            Self::Qr { .. } => "qr",
            Self::Error { .. } => "error",
        }
    }
}
