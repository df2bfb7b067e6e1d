//! WebSocket relay server using axum.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use chatrelay_core::{BridgeError, BridgeEvent, CommandReply, LinkStatus, PeerCommand};
use chatrelay_telemetry::Metrics;
use chatrelay_ws::{ProtocolAdapter, ProtocolTransport};
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::RelayConfig;
use crate::error::{RelayError, RelayResult};
use crate::registry::{PeerRegistration, PeerRegistry};

/// Upper bound on waiting for the listener to drain during `stop()`.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Shared state for axum handlers.
struct PeerState<T: ProtocolTransport> {
    adapter: ProtocolAdapter<T>,
    registry: Arc<PeerRegistry>,
}

impl<T: ProtocolTransport> Clone for PeerState<T> {
    fn clone(&self) -> Self {
        Self {
            adapter: self.adapter.clone(),
            registry: Arc::clone(&self.registry),
        }
    }
}

fn create_router<T: ProtocolTransport>(state: PeerState<T>) -> Router {
    Router::new()
        .route("/", get(ws_handler::<T>))
        .route("/ws", get(ws_handler::<T>))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

async fn ws_handler<T: ProtocolTransport>(
    State(state): State<PeerState<T>>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| handle_peer(socket, state))
}

async fn metrics_handler() -> Response {
    match Metrics::encode_text() {
        Ok(body) => (
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            warn!(error = %e, "Failed to encode metrics");
            (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
        }
    }
}

async fn handle_peer<T: ProtocolTransport>(mut socket: WebSocket, state: PeerState<T>) {
    let PeerRegistration {
        id,
        outbox,
        mut inbox,
        closer,
    } = match state.registry.register() {
        Ok(registration) => registration,
        Err(e) => {
            warn!(error = %e, "Refusing peer");
            let frame = CloseFrame {
                code: close_code::AGAIN,
                reason: e.to_string().into(),
            };
            let _ = socket.send(Message::Close(Some(frame))).await;
            return;
        }
    };

    info!(peer = id, peers = state.registry.len(), "Peer connected");
    let (mut sink, mut stream) = socket.split();

    let writer_closer = closer.clone();
    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;

                () = writer_closer.cancelled() => {
                    let frame = CloseFrame {
                        code: close_code::AWAY,
                        reason: "relay shutting down".into(),
                    };
                    let _ = sink.send(Message::Close(Some(frame))).await;
                    break;
                }

                frame = inbox.recv() => match frame {
                    Some(text) => {
                        if sink.send(Message::Text(text.into())).await.is_err() {
                            debug!(peer = id, "Peer write failed");
                            break;
                        }
                    }
                    None => break,
                },
            }
        }
    });

    let mut writer_done = false;
    loop {
        tokio::select! {
            () = closer.cancelled() => break,

            _ = &mut writer => {
                writer_done = true;
                break;
            }

            frame = stream.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_string(),
                    Some(Ok(Message::Binary(data))) => match String::from_utf8(data.to_vec()) {
                        Ok(text) => text,
                        Err(_) => {
                            reply(id, &outbox, &CommandReply::error(BridgeError::MalformedCommand(
                                "binary frame is not valid UTF-8".to_string(),
                            )))
                            .await;
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(peer = id, error = %e, "Peer read failed");
                        break;
                    }
                };
                handle_command(&state, id, &outbox, &text).await;
            }
        }
    }

    // Dropping the last outbox sender lets the writer flush and exit.
    state.registry.remove(id);
    drop(outbox);
    if !writer_done {
        let _ = writer.await;
    }
    info!(peer = id, peers = state.registry.len(), "Peer disconnected");
}

async fn handle_command<T: ProtocolTransport>(
    state: &PeerState<T>,
    peer: u64,
    outbox: &mpsc::Sender<String>,
    text: &str,
) {
    let response = match PeerCommand::parse(text) {
        Ok(PeerCommand::Send(cmd)) => match state.adapter.send_message(&cmd.to, &cmd.text).await {
            Ok(()) => {
                debug!(peer, to = %cmd.to, "Send accepted");
                Metrics::command("send", "sent");
                CommandReply::sent(cmd.to)
            }
            Err(e) => {
                warn!(peer, to = %cmd.to, error = %e, "Send failed");
                Metrics::command("send", "error");
                CommandReply::error(BridgeError::from(e))
            }
        },
        Ok(PeerCommand::Unknown(kind)) => {
            debug!(peer, %kind, "Ignoring unknown command");
            Metrics::command("unknown", "ignored");
            return;
        }
        Err(e) => {
            warn!(peer, error = %e, "Malformed peer command");
            Metrics::command("malformed", "error");
            CommandReply::error(e)
        }
    };

    reply(peer, outbox, &response).await;
}

/// Queue a reply for one peer only.
async fn reply(peer: u64, outbox: &mpsc::Sender<String>, response: &CommandReply) {
    match serde_json::to_string(response) {
        Ok(json) => {
            if outbox.send(json).await.is_err() {
                debug!(peer, "Peer gone before reply");
            }
        }
        Err(e) => warn!(peer, error = %e, "Failed to serialize reply"),
    }
}

/// Fan adapter events out to every peer.
async fn run_broadcast_pump(mut events: mpsc::Receiver<BridgeEvent>, registry: Arc<PeerRegistry>) {
    while let Some(event) = events.recv().await {
        match &event {
            BridgeEvent::Status {
                status: LinkStatus::Connected,
            } => Metrics::link_connected(),
            BridgeEvent::Status {
                status: LinkStatus::Disconnected,
            } => Metrics::link_disconnected(),
            BridgeEvent::Qr { .. } => Metrics::qr_challenge(),
            _ => {}
        }

        let payload = match serde_json::to_string(&event) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(error = %e, kind = event.kind(), "Failed to serialize event");
                continue;
            }
        };

        let outcome = registry.broadcast(&payload);
        Metrics::broadcast(event.kind(), outcome.skipped);
        trace!(
            kind = event.kind(),
            delivered = outcome.delivered,
            skipped = outcome.skipped,
            "Event broadcast"
        );
    }
    debug!("Adapter event stream ended");
}

/// Local relay between the chat network adapter and WebSocket peers.
pub struct RelayServer<T: ProtocolTransport> {
    config: RelayConfig,
    adapter: ProtocolAdapter<T>,
    registry: Arc<PeerRegistry>,
    events: Option<mpsc::Receiver<BridgeEvent>>,
    shutdown: CancellationToken,
    listener: Option<JoinHandle<()>>,
    pump: Option<JoinHandle<()>>,
}

impl<T: ProtocolTransport> RelayServer<T> {
    pub fn new(
        config: RelayConfig,
        adapter: ProtocolAdapter<T>,
        events: mpsc::Receiver<BridgeEvent>,
    ) -> Self {
        let registry = Arc::new(PeerRegistry::new(config.max_peers, config.peer_buffer));
        Self {
            config,
            adapter,
            registry,
            events: Some(events),
            shutdown: CancellationToken::new(),
            listener: None,
            pump: None,
        }
    }

    pub fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub fn adapter(&self) -> &ProtocolAdapter<T> {
        &self.adapter
    }

    /// Bind the listener, start relaying and connect the adapter.
    ///
    /// Returns the bound address.
    pub async fn start(&mut self) -> RelayResult<SocketAddr> {
        let events = self.events.take().ok_or(RelayError::AlreadyStarted)?;

        let bind_addr = self.config.bind_addr();
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .map_err(|source| RelayError::Bind {
                addr: bind_addr.clone(),
                source,
            })?;
        let addr = listener.local_addr()?;

        let app = create_router(PeerState {
            adapter: self.adapter.clone(),
            registry: Arc::clone(&self.registry),
        });
        let shutdown = self.shutdown.clone();
        self.listener = Some(tokio::spawn(async move {
            let served = axum::serve(listener, app)
                .with_graceful_shutdown(async move { shutdown.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "Relay listener failed");
            }
        }));
        self.pump = Some(tokio::spawn(run_broadcast_pump(
            events,
            Arc::clone(&self.registry),
        )));
        info!(%addr, max_peers = self.config.max_peers, "Relay listening");

        if let Err(e) = self.adapter.connect().await {
            error!(error = %e, "Adapter failed to connect");
            self.stop().await;
            return Err(e.into());
        }

        Ok(addr)
    }

    /// Close peers, stop the listener, then disconnect the adapter.
    pub async fn stop(&mut self) {
        let closed = self.registry.close_all();
        info!(peers = closed, "Closed local peers");

        self.shutdown.cancel();
        if let Some(listener) = self.listener.take() {
            let abort = listener.abort_handle();
            if tokio::time::timeout(SHUTDOWN_GRACE, listener).await.is_err() {
                warn!("Listener did not drain in time, aborting");
                abort.abort();
            }
        }

        self.adapter.disconnect().await;

        if let Some(pump) = self.pump.take() {
            pump.abort();
        }
        info!("Relay stopped");
    }
}
