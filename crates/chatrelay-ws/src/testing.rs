//! Scripted in-memory transport for tests.
//!
//! Every `open()` hands a `ScriptedSession` to the test, which then plays the
//! protocol library: it pushes events and observes the commands the adapter
//! issues.

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::credentials::Credentials;
use crate::error::{AdapterError, AdapterResult};
use crate::message::{RawMessage, UpsertKind};
use crate::transport::{
    CloseInfo, ProtocolTransport, TransportCommand, TransportEvent, TransportSession,
};

const WAIT: Duration = Duration::from_secs(2);

/// Transport whose sessions are driven by the test.
#[derive(Clone)]
pub struct ScriptedTransport {
    opened: mpsc::UnboundedSender<ScriptedSession>,
    opens: Arc<AtomicUsize>,
    failures: Arc<AtomicUsize>,
}

impl ScriptedTransport {
    pub fn new() -> (Self, ScriptedSessions) {
        let (opened, rx) = mpsc::unbounded_channel();
        let transport = Self {
            opened,
            opens: Arc::new(AtomicUsize::new(0)),
            failures: Arc::new(AtomicUsize::new(0)),
        };
        (transport, ScriptedSessions { rx })
    }

    /// Number of `open()` calls so far, failed ones included.
    pub fn open_count(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Make the next `open()` fail with a transport error.
    pub fn fail_next_open(&self) {
        self.failures.fetch_add(1, Ordering::SeqCst);
    }
}

impl ProtocolTransport for ScriptedTransport {
    fn open(
        &self,
        credentials: Credentials,
    ) -> impl Future<Output = AdapterResult<TransportSession>> + Send {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let opened = self.opened.clone();

        async move {
            if fail {
                return Err(AdapterError::Transport("scripted open failure".to_string()));
            }

            let (event_tx, event_rx) = mpsc::channel(64);
            let (command_tx, command_rx) = mpsc::channel(64);
            opened
                .send(ScriptedSession {
                    events: event_tx,
                    commands: command_rx,
                    credentials,
                })
                .map_err(|_| AdapterError::Transport("script dropped".to_string()))?;

            Ok(TransportSession {
                events: event_rx,
                commands: command_tx,
            })
        }
    }
}

/// Sessions opened by a `ScriptedTransport`, in order.
pub struct ScriptedSessions {
    rx: mpsc::UnboundedReceiver<ScriptedSession>,
}

impl ScriptedSessions {
    /// Wait for the next opened session.
    ///
    /// # Panics
    ///
    /// If no session is opened within two seconds.
    pub async fn next(&mut self) -> ScriptedSession {
        tokio::time::timeout(WAIT, self.rx.recv())
            .await
            .expect("timed out waiting for a session to open")
            .expect("transport dropped")
    }

    pub fn try_next(&mut self) -> Option<ScriptedSession> {
        self.rx.try_recv().ok()
    }
}

/// The library side of one open session.
pub struct ScriptedSession {
    events: mpsc::Sender<TransportEvent>,
    commands: mpsc::Receiver<TransportCommand>,
    pub credentials: Credentials,
}

impl ScriptedSession {
    pub async fn send_event(&self, event: TransportEvent) {
        let _ = self.events.send(event).await;
    }

    pub async fn qr(&self, challenge: &str) {
        self.send_event(TransportEvent::Qr(challenge.to_string()))
            .await;
    }

    pub async fn open(&self) {
        self.send_event(TransportEvent::Open).await;
    }

    pub async fn close(&self, status_code: Option<u16>) {
        self.send_event(TransportEvent::Closed(CloseInfo::new(
            status_code,
            "scripted close",
        )))
        .await;
    }

    pub async fn notify(&self, messages: Vec<RawMessage>) {
        self.send_event(TransportEvent::Messages {
            kind: UpsertKind::Notify,
            messages,
        })
        .await;
    }

    /// Wait for the next command the adapter issues, if any arrives in time.
    pub async fn next_command(&mut self) -> Option<TransportCommand> {
        tokio::time::timeout(WAIT, self.commands.recv())
            .await
            .ok()
            .flatten()
    }

    pub fn try_next_command(&mut self) -> Option<TransportCommand> {
        self.commands.try_recv().ok()
    }

    /// Accept every send from now on, recording `(to, text)` pairs.
    ///
    /// Returns the event sender so the test can keep driving the session.
    pub fn auto_ack(self) -> (ScriptedEvents, Arc<Mutex<Vec<(String, String)>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&sent);
        let mut commands = self.commands;

        tokio::spawn(async move {
            while let Some(cmd) = commands.recv().await {
                match cmd {
                    TransportCommand::Send { to, text, ack } => {
                        log.lock().push((to, text));
                        let _ = ack.send(Ok(()));
                    }
                    TransportCommand::Close => break,
                }
            }
        });

        (ScriptedEvents(self.events), sent)
    }
}

/// Event side of a session whose commands are auto-acknowledged.
#[derive(Clone)]
pub struct ScriptedEvents(mpsc::Sender<TransportEvent>);

impl ScriptedEvents {
    pub async fn send_event(&self, event: TransportEvent) {
        let _ = self.0.send(event).await;
    }

    pub async fn qr(&self, challenge: &str) {
        self.send_event(TransportEvent::Qr(challenge.to_string()))
            .await;
    }

    pub async fn open(&self) {
        self.send_event(TransportEvent::Open).await;
    }

    pub async fn close(&self, status_code: Option<u16>) {
        self.send_event(TransportEvent::Closed(CloseInfo::new(
            status_code,
            "scripted close",
        )))
        .await;
    }

    pub async fn notify(&self, messages: Vec<RawMessage>) {
        self.send_event(TransportEvent::Messages {
            kind: UpsertKind::Notify,
            messages,
        })
        .await;
    }
}

/// A plain-text message from `jid`.
pub fn text_message(jid: &str, id: &str, text: &str) -> RawMessage {
    let mut raw = RawMessage::default();
    raw.key.remote_jid = jid.to_string();
    raw.key.id = id.to_string();
    raw.message_timestamp = Some(1_706_400_000);
    raw.message = Some(crate::message::MessageContent {
        conversation: Some(text.to_string()),
        ..Default::default()
    });
    raw
}
