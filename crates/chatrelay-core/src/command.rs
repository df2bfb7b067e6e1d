//! Peer command protocol.
//!
//! Peers send one JSON object per message. Only `send` is acted upon; other
//! `type` values are accepted and ignored so newer peers can talk to older
//! servers.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::BridgeError;

/// Request to deliver a text message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendCommand {
    /// Destination address.
    pub to: String,
    /// Message text.
    pub text: String,
}

/// A parsed peer command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerCommand {
    Send(SendCommand),
    /// Command with a `type` this server does not know.
    Unknown(String),
}

impl PeerCommand {
    /// Parse a peer message.
    ///
    /// # Errors
    ///
    /// Returns `BridgeError::MalformedCommand` when the text is not JSON, is
    /// not an object with a string `type`, or is a `send` missing `to`/`text`.
    pub fn parse(text: &str) -> Result<Self, BridgeError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| BridgeError::MalformedCommand(format!("invalid JSON: {e}")))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                BridgeError::MalformedCommand(
                    "expected an object with a string \"type\" field".to_string(),
                )
            })?;

        match kind {
            "send" => serde_json::from_value::<SendCommand>(value)
                .map(Self::Send)
                .map_err(|e| BridgeError::MalformedCommand(format!("invalid send command: {e}"))),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }
}

/// Reply sent to the peer that issued a command, and only to that peer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CommandReply {
    Sent { to: String },
    Error { error: String },
}

impl CommandReply {
    pub fn sent(to: impl Into<String>) -> Self {
        Self::Sent { to: to.into() }
    }

    pub fn error(error: impl ToString) -> Self {
        Self::Error {
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_send() {
        let cmd = PeerCommand::parse(r#"{"type":"send","to":"1234@x","text":"hi"}"#).unwrap();
        assert_eq!(
            cmd,
            PeerCommand::Send(SendCommand {
                to: "1234@x".to_string(),
                text: "hi".to_string(),
            })
        );
    }

    #[test]
    fn test_parse_unknown_type_is_accepted() {
        let cmd = PeerCommand::parse(r#"{"type":"typing","to":"1234@x"}"#).unwrap();
        assert_eq!(cmd, PeerCommand::Unknown("typing".to_string()));
    }

    #[test]
    fn test_parse_invalid_json() {
        let err = PeerCommand::parse("{not json").unwrap_err();
        assert!(matches!(err, BridgeError::MalformedCommand(_)));
        assert!(err.to_string().starts_with("Invalid command: invalid JSON"));
    }

    #[test]
    fn test_parse_missing_type() {
        assert!(matches!(
            PeerCommand::parse(r#"{"to":"a","text":"b"}"#),
            Err(BridgeError::MalformedCommand(_))
        ));
        assert!(matches!(
            PeerCommand::parse(r#"["send"]"#),
            Err(BridgeError::MalformedCommand(_))
        ));
        assert!(matches!(
            PeerCommand::parse(r#"{"type":7}"#),
            Err(BridgeError::MalformedCommand(_))
        ));
    }

    #[test]
    fn test_parse_send_missing_fields() {
        let err = PeerCommand::parse(r#"{"type":"send","to":"1234@x"}"#).unwrap_err();
        assert!(err.to_string().contains("invalid send command"));
    }

    #[test]
    fn test_reply_wire_format() {
        let sent = serde_json::to_string(&CommandReply::sent("1234@x")).unwrap();
        assert_eq!(sent, r#"{"type":"sent","to":"1234@x"}"#);

        let error = serde_json::to_string(&CommandReply::error(BridgeError::NotConnected)).unwrap();
        assert_eq!(error, r#"{"type":"error","error":"Not connected"}"#);
    }
}
