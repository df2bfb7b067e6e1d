//! Seam between the adapter and the chat-protocol library.
//!
//! A transport opens one session per call. The session is a pair of channels:
//! raw library events flow in, send/close commands flow out. The adapter never
//! sees the library's own callback shapes.

use std::future::Future;

use tokio::sync::{mpsc, oneshot};

use crate::credentials::Credentials;
use crate::error::AdapterResult;
use crate::message::{RawMessage, UpsertKind};

/// Why a session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// Library status code, if the close carried one.
    pub status_code: Option<u16>,
    pub reason: String,
}

impl CloseInfo {
    pub fn new(status_code: Option<u16>, reason: impl Into<String>) -> Self {
        Self {
            status_code,
            reason: reason.into(),
        }
    }
}

/// Raw event emitted by the protocol library.
#[derive(Debug, Clone)]
pub enum TransportEvent {
    /// New pairing challenge.
    Qr(String),
    /// Handshake finished; the session is live.
    Open,
    /// The library wants its credentials persisted.
    CredentialsUpdated(Credentials),
    /// Batch of received messages.
    Messages {
        kind: UpsertKind,
        messages: Vec<RawMessage>,
    },
    /// Non-fatal library error.
    Error(String),
    /// The session ended. Always the last event of a session.
    Closed(CloseInfo),
}

/// Result of a send as reported by the library.
pub type SendAck = Result<(), String>;

/// Command issued to the protocol library.
#[derive(Debug)]
pub enum TransportCommand {
    Send {
        to: String,
        text: String,
        /// Resolved once the library accepts (or rejects) the message.
        ack: oneshot::Sender<SendAck>,
    },
    Close,
}

/// One open session with the protocol library.
#[derive(Debug)]
pub struct TransportSession {
    pub events: mpsc::Receiver<TransportEvent>,
    pub commands: mpsc::Sender<TransportCommand>,
}

/// Opens sessions with the chat network.
pub trait ProtocolTransport: Send + Sync + 'static {
    /// Start a session using the given credentials.
    ///
    /// Resolves once the library is wired up; the network handshake
    /// continues asynchronously and reports through the event channel.
    fn open(
        &self,
        credentials: Credentials,
    ) -> impl Future<Output = AdapterResult<TransportSession>> + Send;
}
