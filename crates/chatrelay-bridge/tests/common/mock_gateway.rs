//! Mock protocol gateway for integration tests.
//!
//! Accepts WebSocket connections and:
//! - Records every JSON frame the bridge sends
//! - Acknowledges `send` requests
//! - Lets the test push frames to the live connection

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_tungstenite::{accept_async, tungstenite::Message};

pub struct MockGateway {
    addr: SocketAddr,
    shutdown_tx: mpsc::Sender<()>,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<u32>>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
}

impl MockGateway {
    /// Start a gateway on an available port.
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let outbound = Arc::new(Mutex::new(None));
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

        let state = (received.clone(), connections.clone(), outbound.clone());
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Ok((stream, _)) = listener.accept() => {
                        let (received, connections, outbound) = state.clone();
                        tokio::spawn(handle_connection(stream, received, connections, outbound));
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        Self {
            addr,
            shutdown_tx,
            received,
            connections,
            outbound,
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    pub async fn connection_count(&self) -> u32 {
        *self.connections.lock().await
    }

    /// Frames of the given `type` received so far.
    pub async fn frames(&self, kind: &str) -> Vec<Value> {
        self.received
            .lock()
            .await
            .iter()
            .filter(|frame| frame["type"] == kind)
            .cloned()
            .collect()
    }

    /// Wait until `count` frames of `kind` have arrived.
    pub async fn wait_for_frames(&self, kind: &str, count: usize) -> Vec<Value> {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(3);
        loop {
            let frames = self.frames(kind).await;
            if frames.len() >= count {
                return frames;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "expected {count} {kind} frames, got {}",
                frames.len()
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    /// Push a JSON frame to the current connection.
    pub async fn push(&self, frame: Value) {
        let outbound = self.outbound.lock().await;
        let tx = outbound.as_ref().expect("no live connection");
        tx.send(Message::Text(frame.to_string())).unwrap();
    }

    /// Close the current connection at the WebSocket level.
    pub async fn close_socket(&self) {
        let outbound = self.outbound.lock().await;
        let tx = outbound.as_ref().expect("no live connection");
        tx.send(Message::Close(None)).unwrap();
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(()).await;
    }
}

async fn handle_connection(
    stream: TcpStream,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<Mutex<u32>>,
    outbound: Arc<Mutex<Option<mpsc::UnboundedSender<Message>>>>,
) {
    let ws_stream = match accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            eprintln!("WebSocket handshake failed: {}", e);
            return;
        }
    };
    *connections.lock().await += 1;

    let (mut write, mut read) = ws_stream.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
    *outbound.lock().await = Some(tx.clone());

    let writer = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            let closing = matches!(msg, Message::Close(_));
            if write.send(msg).await.is_err() || closing {
                break;
            }
        }
    });

    while let Some(msg) = read.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                let Ok(frame) = serde_json::from_str::<Value>(&text) else {
                    continue;
                };
                if frame["type"] == "send" {
                    let ack = json!({"type": "sendAck", "id": frame["id"]});
                    let _ = tx.send(Message::Text(ack.to_string()));
                }
                received.lock().await.push(frame);
            }
            Ok(Message::Ping(data)) => {
                let _ = tx.send(Message::Pong(data));
            }
            Ok(Message::Close(_)) | Err(_) => break,
            _ => {}
        }
    }

    writer.abort();
}
