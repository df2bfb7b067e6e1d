//! Raw protocol message shapes and their normalization.
//!
//! The protocol library delivers messages in many payload shapes. Relaying
//! only needs text, so every shape is reduced to a single `content` string
//! with a fixed precedence:
//!
//! 1. plain text body (`conversation`)
//! 2. quoted-reply / extended text
//! 3. `[Image] <caption>`
//! 4. `[Video] <caption>`
//! 5. `[Document] <caption>`
//! 6. `[Voice Message]`
//!
//! Anything else is dropped.

use chatrelay_core::InboundMessage;
use serde::{Deserialize, Serialize};

/// Suffix of broadcast and status channel addresses.
const BROADCAST_SUFFIX: &str = "@broadcast";
/// Suffix of group chat addresses.
const GROUP_SUFFIX: &str = "@g.us";

/// Message upsert kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpsertKind {
    /// New messages received live.
    Notify,
    /// History sync; not relayed.
    Append,
}

/// Message key identifying chat, direction and ID.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageKey {
    pub remote_jid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_jid_alt: Option<String>,
    #[serde(default)]
    pub from_me: bool,
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub participant: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtendedText {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptionedMedia {
    #[serde(default)]
    pub caption: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioMedia {
    /// Push-to-talk (voice note) flag.
    #[serde(default)]
    pub ptt: Option<bool>,
}

/// Payload variants. At most a few are populated per message.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extended_text_message: Option<ExtendedText>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_message: Option<CaptionedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_message: Option<CaptionedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_message: Option<CaptionedMedia>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_message: Option<AudioMedia>,
}

/// Raw message as delivered by the protocol library.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub key: MessageKey,
    #[serde(default)]
    pub message_timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub push_name: Option<String>,
    #[serde(default)]
    pub message: Option<MessageContent>,
}

impl RawMessage {
    /// Self-sent and broadcast/status-channel messages are never relayed.
    pub fn is_relayable(&self) -> bool {
        !self.key.from_me && !self.key.remote_jid.ends_with(BROADCAST_SUFFIX)
    }

    pub fn is_group(&self) -> bool {
        self.key.remote_jid.ends_with(GROUP_SUFFIX)
    }
}

fn non_empty(value: Option<&String>) -> Option<&str> {
    value.map(String::as_str).filter(|s| !s.is_empty())
}

/// Reduce a payload to its text content using the fixed precedence.
pub fn extract_content(content: &MessageContent) -> Option<String> {
    if let Some(text) = non_empty(content.conversation.as_ref()) {
        return Some(text.to_string());
    }
    if let Some(text) = non_empty(
        content
            .extended_text_message
            .as_ref()
            .and_then(|m| m.text.as_ref()),
    ) {
        return Some(text.to_string());
    }

    let captioned = [
        ("Image", &content.image_message),
        ("Video", &content.video_message),
        ("Document", &content.document_message),
    ];
    for (label, media) in captioned {
        if let Some(caption) = non_empty(media.as_ref().and_then(|m| m.caption.as_ref())) {
            return Some(format!("[{label}] {caption}"));
        }
    }

    if content.audio_message.is_some() {
        return Some("[Voice Message]".to_string());
    }

    None
}

/// Turn a raw message into an `InboundMessage`, or `None` if it must be dropped.
pub fn normalize(raw: &RawMessage) -> Option<InboundMessage> {
    if !raw.is_relayable() {
        return None;
    }

    let content = extract_content(raw.message.as_ref()?)?;

    Some(InboundMessage {
        id: raw.key.id.clone(),
        sender: raw.key.remote_jid.clone(),
        alt_sender: raw.key.remote_jid_alt.clone().unwrap_or_default(),
        content,
        timestamp: raw.message_timestamp.unwrap_or(0),
        is_group: raw.is_group(),
    })
}
