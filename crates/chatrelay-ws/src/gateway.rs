//! WebSocket transport to an upstream protocol gateway.
//!
//! The gateway hosts the chat-protocol library and exposes its event surface
//! as JSON text frames. The first frame we send is `hello`, carrying the
//! protocol version we speak and the persisted credentials; everything after
//! that is library events in and send/close requests out.

use std::collections::HashMap;
use std::future::Future;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async_tls_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::credentials::Credentials;
use crate::error::AdapterResult;
use crate::heartbeat::HeartbeatManager;
use crate::message::{RawMessage, UpsertKind};
use crate::transport::{
    CloseInfo, ProtocolTransport, SendAck, TransportCommand, TransportEvent, TransportSession,
};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

const EVENT_BUFFER: usize = 256;
const COMMAND_BUFFER: usize = 64;

/// Gateway transport configuration.
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Gateway WebSocket URL (`ws://` or `wss://`).
    pub url: String,
    /// Protocol version offered in the `hello` frame.
    pub protocol_version: [u32; 3],
    /// Quiet period before a keepalive ping.
    pub keepalive_interval_ms: u64,
    /// Time allowed for any traffic after a ping.
    pub keepalive_timeout_ms: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3100".to_string(),
            protocol_version: [2, 3000, 1],
            keepalive_interval_ms: 30_000,
            keepalive_timeout_ms: 10_000,
        }
    }
}

/// Frames we send to the gateway.
#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum GatewayRequest<'a> {
    Hello {
        version: [u32; 3],
        credentials: Value,
    },
    Send {
        id: u64,
        to: &'a str,
        text: &'a str,
    },
    Close,
}

/// Frames the gateway sends us.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum GatewayFrame {
    Version {
        version: Vec<u32>,
    },
    Qr {
        qr: String,
    },
    Open,
    Creds {
        credentials: Value,
    },
    Messages {
        kind: UpsertKind,
        #[serde(default)]
        messages: Vec<RawMessage>,
    },
    SendAck {
        id: u64,
        #[serde(default)]
        error: Option<String>,
    },
    Error {
        error: String,
    },
    Close {
        #[serde(rename = "statusCode", default)]
        status_code: Option<u16>,
        #[serde(default)]
        reason: String,
    },
}

/// Transport that talks to a protocol gateway over WebSocket.
#[derive(Debug, Clone)]
pub struct GatewayTransport {
    config: GatewayConfig,
}

impl GatewayTransport {
    pub fn new(config: GatewayConfig) -> Self {
        Self { config }
    }
}

impl ProtocolTransport for GatewayTransport {
    fn open(
        &self,
        credentials: Credentials,
    ) -> impl Future<Output = AdapterResult<TransportSession>> + Send {
        let config = self.config.clone();
        async move {
            info!(url = %config.url, "Dialling protocol gateway");

            let (ws_stream, _response) =
                connect_async_tls_with_config(&config.url, None, true, None).await?;
            let (mut write, read) = ws_stream.split();

            let hello = GatewayRequest::Hello {
                version: config.protocol_version,
                credentials: credentials.into_value(),
            };
            write
                .send(Message::Text(serde_json::to_string(&hello)?))
                .await?;
            debug!(version = ?config.protocol_version, "Sent hello");

            let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
            let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
            tokio::spawn(run_session(config, write, read, event_tx, command_rx));

            Ok(TransportSession {
                events: event_rx,
                commands: command_tx,
            })
        }
    }
}

async fn run_session(
    config: GatewayConfig,
    mut write: WsSink,
    mut read: WsSource,
    events: mpsc::Sender<TransportEvent>,
    mut commands: mpsc::Receiver<TransportCommand>,
) {
    let heartbeat =
        HeartbeatManager::new(config.keepalive_interval_ms, config.keepalive_timeout_ms);
    let mut pending: HashMap<u64, oneshot::Sender<SendAck>> = HashMap::new();
    let mut next_id = 0u64;

    let close = loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        heartbeat.record_message();
                        match serde_json::from_str::<GatewayFrame>(&text) {
                            Ok(frame) => {
                                if let Some(close) = forward_frame(frame, &events, &mut pending).await {
                                    break close;
                                }
                            }
                            Err(e) => warn!(error = %e, "Unrecognized gateway frame"),
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        heartbeat.record_message();
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            break CloseInfo::new(None, e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame
                            .map(|f| CloseInfo::new(Some(f.code.into()), f.reason.to_string()))
                            .unwrap_or_else(|| CloseInfo::new(None, "Gateway closed the connection"));
                    }
                    Some(Ok(_)) => heartbeat.record_message(),
                    Some(Err(e)) => break CloseInfo::new(None, e.to_string()),
                    None => break CloseInfo::new(None, "Gateway stream ended"),
                }
            }

            cmd = commands.recv() => {
                match cmd {
                    Some(TransportCommand::Send { to, text, ack }) => {
                        next_id += 1;
                        let request = GatewayRequest::Send { id: next_id, to: &to, text: &text };
                        let payload = match serde_json::to_string(&request) {
                            Ok(payload) => payload,
                            Err(e) => {
                                let _ = ack.send(Err(e.to_string()));
                                continue;
                            }
                        };
                        if let Err(e) = write.send(Message::Text(payload)).await {
                            let _ = ack.send(Err(e.to_string()));
                            break CloseInfo::new(None, e.to_string());
                        }
                        pending.insert(next_id, ack);
                    }
                    Some(TransportCommand::Close) | None => {
                        if let Ok(payload) = serde_json::to_string(&GatewayRequest::Close) {
                            let _ = write.send(Message::Text(payload)).await;
                        }
                        let _ = write.send(Message::Close(None)).await;
                        debug!(pending = pending.len(), "Gateway session closed locally");
                        return;
                    }
                }
            }

            () = heartbeat.wait_for_check() => {
                // Senders that gave up waiting.
                pending.retain(|_, ack| !ack.is_closed());
                if heartbeat.is_timed_out() {
                    break CloseInfo::new(None, "Keepalive timeout");
                }
                if heartbeat.should_send_ping() {
                    if let Err(e) = write.send(Message::Ping(Vec::new())).await {
                        break CloseInfo::new(None, e.to_string());
                    }
                    heartbeat.record_ping();
                }
            }
        }
    };

    for (_, ack) in pending.drain() {
        let _ = ack.send(Err(format!("session closed: {}", close.reason)));
    }
    if events.send(TransportEvent::Closed(close)).await.is_err() {
        debug!("Session events dropped before close was delivered");
    }
}

/// Forward one gateway frame. Returns `Some` when the frame ends the session.
async fn forward_frame(
    frame: GatewayFrame,
    events: &mpsc::Sender<TransportEvent>,
    pending: &mut HashMap<u64, oneshot::Sender<SendAck>>,
) -> Option<CloseInfo> {
    let event = match frame {
        GatewayFrame::Version { version } => {
            info!(?version, "Gateway negotiated protocol version");
            return None;
        }
        GatewayFrame::Qr { qr } => TransportEvent::Qr(qr),
        GatewayFrame::Open => TransportEvent::Open,
        GatewayFrame::Creds { credentials } => {
            TransportEvent::CredentialsUpdated(Credentials::from_value(credentials))
        }
        GatewayFrame::Messages { kind, messages } => TransportEvent::Messages { kind, messages },
        GatewayFrame::SendAck { id, error } => {
            match pending.remove(&id) {
                Some(ack) => {
                    let _ = ack.send(error.map_or(Ok(()), Err));
                }
                None => debug!(id, "Ack for unknown send"),
            }
            return None;
        }
        GatewayFrame::Error { error } => TransportEvent::Error(error),
        GatewayFrame::Close {
            status_code,
            reason,
        } => return Some(CloseInfo::new(status_code, reason)),
    };

    if events.send(event).await.is_err() {
        debug!("Session events receiver dropped");
    }
    None
}
