//! Relay server tests against a scripted transport and real WebSocket peers.

use std::net::SocketAddr;
use std::time::Duration;

use chatrelay_server::{RelayConfig, RelayServer};
use chatrelay_ws::testing::{text_message, ScriptedSessions, ScriptedTransport};
use chatrelay_ws::{AdapterConfig, CredentialStore, ProtocolAdapter, TransportCommand};
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Peer = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(2);

struct Harness {
    server: RelayServer<ScriptedTransport>,
    addr: SocketAddr,
    transport: ScriptedTransport,
    sessions: ScriptedSessions,
    _dir: TempDir,
}

async fn start(max_peers: usize) -> Harness {
    start_with(
        AdapterConfig {
            reconnect_delay_ms: 50,
            ..Default::default()
        },
        max_peers,
    )
    .await
}

async fn start_with(adapter_config: AdapterConfig, max_peers: usize) -> Harness {
    let dir = TempDir::new().unwrap();
    let (transport, sessions) = ScriptedTransport::new();
    let (adapter, events) = ProtocolAdapter::new(
        adapter_config,
        transport.clone(),
        CredentialStore::new(dir.path()),
    );
    let config = RelayConfig {
        port: 0,
        max_peers,
        ..Default::default()
    };
    let mut server = RelayServer::new(config, adapter, events);
    let addr = server.start().await.unwrap();

    Harness {
        server,
        addr,
        transport,
        sessions,
        _dir: dir,
    }
}

async fn connect(harness: &Harness) -> Peer {
    let expected = harness.server.registry().len() + 1;
    let (peer, _) = connect_async(format!("ws://{}/ws", harness.addr))
        .await
        .unwrap();
    wait_for_peers(harness, expected).await;
    peer
}

async fn wait_for_peers(harness: &Harness, expected: usize) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while harness.server.registry().len() != expected {
        assert!(
            tokio::time::Instant::now() < deadline,
            "expected {expected} peers, have {}",
            harness.server.registry().len()
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn send_text(peer: &mut Peer, text: &str) {
    peer.send(Message::Text(text.to_string())).await.unwrap();
}

async fn recv_json(peer: &mut Peer) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, peer.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("peer stream ended")
            .unwrap();
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Close(frame) => panic!("peer closed: {frame:?}"),
            _ => continue,
        }
    }
}

async fn recv_close_code(peer: &mut Peer) -> u16 {
    loop {
        let frame = tokio::time::timeout(WAIT, peer.next())
            .await
            .expect("timed out waiting for close");
        match frame {
            Some(Ok(Message::Close(Some(frame)))) => return frame.code.into(),
            Some(Ok(Message::Close(None))) | None | Some(Err(_)) => panic!("closed without a code"),
            Some(Ok(_)) => continue,
        }
    }
}

#[tokio::test]
async fn test_send_while_disconnected_replies_not_connected() {
    let mut harness = start(0).await;
    let mut session = harness.sessions.next().await;
    let mut peer = connect(&harness).await;

    send_text(&mut peer, r#"{"type":"send","to":"1234@x","text":"hi"}"#).await;
    assert_eq!(
        recv_json(&mut peer).await,
        json!({"type": "error", "error": "Not connected"})
    );
    assert!(session.try_next_command().is_none());

    harness.server.stop().await;
}

#[tokio::test]
async fn test_replies_go_only_to_the_issuing_peer() {
    let mut harness = start(0).await;
    let session = harness.sessions.next().await;
    let (events, sent) = session.auto_ack();

    let mut a = connect(&harness).await;
    let mut b = connect(&harness).await;

    events.open().await;
    let connected = json!({"type": "status", "status": "connected"});
    assert_eq!(recv_json(&mut a).await, connected);
    assert_eq!(recv_json(&mut b).await, connected);

    tokio::join!(
        send_text(&mut a, r#"{"type":"send","to":"1234@x","text":"hi"}"#),
        send_text(&mut b, "{not json"),
    );

    assert_eq!(
        recv_json(&mut a).await,
        json!({"type": "sent", "to": "1234@x"})
    );
    let reply = recv_json(&mut b).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid command: invalid JSON"));

    // The next frame each peer sees is the marker, not the other's reply.
    events.qr("marker").await;
    let marker = json!({"type": "qr", "qr": "marker"});
    assert_eq!(recv_json(&mut a).await, marker);
    assert_eq!(recv_json(&mut b).await, marker);

    assert_eq!(
        sent.lock().clone(),
        vec![("1234@x".to_string(), "hi".to_string())]
    );
    harness.server.stop().await;
}

#[tokio::test]
async fn test_unacknowledged_send_replies_and_peer_keeps_working() {
    let mut harness = start_with(
        AdapterConfig {
            send_timeout_ms: 100,
            ..Default::default()
        },
        0,
    )
    .await;
    let session = harness.sessions.next().await;
    let mut peer = connect(&harness).await;
    session.open().await;
    recv_json(&mut peer).await;

    send_text(&mut peer, r#"{"type":"send","to":"1234@x","text":"lost"}"#).await;
    let reply = recv_json(&mut peer).await;
    assert_eq!(reply["type"], "error");
    assert!(reply["error"].as_str().unwrap().contains("not acknowledged"));

    send_text(&mut peer, "{not json").await;
    let reply = recv_json(&mut peer).await;
    assert!(reply["error"]
        .as_str()
        .unwrap()
        .starts_with("Invalid command"));

    harness.server.stop().await;
}

#[tokio::test]
async fn test_events_reach_every_peer_in_order() {
    let mut harness = start(0).await;
    let session = harness.sessions.next().await;
    let mut a = connect(&harness).await;
    let mut b = connect(&harness).await;

    session.qr("qr-1").await;
    session.qr("qr-2").await;
    session.open().await;
    session
        .notify(vec![text_message("5678@s.whatsapp.net", "m1", "hello")])
        .await;

    for peer in [&mut a, &mut b] {
        assert_eq!(recv_json(peer).await, json!({"type": "qr", "qr": "qr-1"}));
        assert_eq!(recv_json(peer).await, json!({"type": "qr", "qr": "qr-2"}));
        assert_eq!(
            recv_json(peer).await,
            json!({"type": "status", "status": "connected"})
        );
        let message = recv_json(peer).await;
        assert_eq!(message["type"], "message");
        assert_eq!(message["id"], "m1");
        assert_eq!(message["content"], "hello");
        assert_eq!(message["isGroup"], false);
    }

    harness.server.stop().await;
}

#[tokio::test]
async fn test_unknown_commands_are_ignored() {
    let mut harness = start(0).await;
    let session = harness.sessions.next().await;
    let mut peer = connect(&harness).await;

    send_text(&mut peer, r#"{"type":"typing","to":"1234@x"}"#).await;
    session.qr("marker").await;
    assert_eq!(
        recv_json(&mut peer).await,
        json!({"type": "qr", "qr": "marker"})
    );

    harness.server.stop().await;
}

#[tokio::test]
async fn test_binary_frames_are_commands_too() {
    let mut harness = start(0).await;
    let _session = harness.sessions.next().await;
    let mut peer = connect(&harness).await;

    peer.send(Message::Binary(b"[1,2,3]".to_vec())).await.unwrap();
    let reply = recv_json(&mut peer).await;
    assert_eq!(reply["type"], "error");

    harness.server.stop().await;
}

#[tokio::test]
async fn test_peers_over_the_limit_are_closed() {
    let mut harness = start(1).await;
    let _session = harness.sessions.next().await;
    let _first = connect(&harness).await;

    let (mut second, _) = connect_async(format!("ws://{}/", harness.addr))
        .await
        .unwrap();
    assert_eq!(recv_close_code(&mut second).await, 1013);
    assert_eq!(harness.server.registry().len(), 1);

    harness.server.stop().await;
}

#[tokio::test]
async fn test_stop_closes_peers_then_adapter() {
    let mut harness = start(0).await;
    let mut session = harness.sessions.next().await;
    session.open().await;
    let mut peer = connect(&harness).await;

    harness.server.stop().await;

    assert_eq!(recv_close_code(&mut peer).await, 1001);
    assert!(matches!(
        session.next_command().await,
        Some(TransportCommand::Close)
    ));
    assert!(harness.server.registry().is_closed());
    assert!(connect_async(format!("ws://{}/ws", harness.addr))
        .await
        .is_err());

    // No reconnect after shutdown.
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(harness.transport.open_count(), 1);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let mut harness = start(0).await;
    let _session = harness.sessions.next().await;
    let _peer = connect(&harness).await;

    let mut stream = TcpStream::connect(harness.addr).await.unwrap();
    stream
        .write_all(b"GET /metrics HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
        .await
        .unwrap();
    let mut body = String::new();
    tokio::time::timeout(WAIT, stream.read_to_string(&mut body))
        .await
        .unwrap()
        .unwrap();

    assert!(body.starts_with("HTTP/1.1 200"));
    assert!(body.contains("chatrelay_peers_connected"));

    harness.server.stop().await;
}

#[tokio::test]
async fn test_bind_failure_is_reported() {
    let occupied = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = occupied.local_addr().unwrap().port();

    let dir = TempDir::new().unwrap();
    let (transport, _sessions) = ScriptedTransport::new();
    let (adapter, events) = ProtocolAdapter::new(
        AdapterConfig::default(),
        transport.clone(),
        CredentialStore::new(dir.path()),
    );
    let mut server = RelayServer::new(
        RelayConfig {
            port,
            ..Default::default()
        },
        adapter,
        events,
    );

    let err = server.start().await.unwrap_err();
    assert!(matches!(err, chatrelay_server::RelayError::Bind { .. }));
    assert_eq!(transport.open_count(), 0);
}
