//! Protocol client adapter.
//!
//! Owns the single live session with the chat network and turns raw library
//! events into `BridgeEvent`s. Handles:
//! - Single-flight connect (a live or dialling session makes `connect()` a no-op)
//! - Fixed-delay reconnect after any close that is not a logout
//! - Credential persistence whenever the library rotates them
//! - Pairing challenges rendered to the log

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chatrelay_core::{BridgeError, BridgeEvent, LinkStatus};
use parking_lot::{Mutex, RwLock};
use tokio::sync::{mpsc, oneshot, Mutex as TokioMutex, MutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::credentials::{CredentialStore, Credentials};
use crate::error::{AdapterError, AdapterResult};
use crate::message::{normalize, UpsertKind};
use crate::qr;
use crate::transport::{
    CloseInfo, ProtocolTransport, TransportCommand, TransportEvent, TransportSession,
};

/// Adapter configuration.
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Delay before redialling after a non-logout close.
    pub reconnect_delay_ms: u64,
    /// Close status code that means the session was revoked.
    pub logout_status_code: u16,
    /// How long a send waits for the library to accept it.
    pub send_timeout_ms: u64,
    /// Capacity of the outgoing event channel.
    pub event_buffer: usize,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 5000,
            logout_status_code: 401,
            send_timeout_ms: 30_000,
            event_buffer: 256,
        }
    }
}

/// Link state as seen by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterState {
    /// No session and none scheduled.
    Disconnected,
    /// The network is waiting for a pairing scan.
    AwaitingQr,
    /// Dialling, or waiting to redial.
    Connecting,
    Connected,
    /// Credentials were revoked. Only a manual connect leaves this state.
    LoggedOut,
}

struct ActiveSession {
    generation: u64,
    /// Set once the transport has opened.
    commands: Option<mpsc::Sender<TransportCommand>>,
    cancel: CancellationToken,
}

struct PendingReconnect {
    id: u64,
    cancel: CancellationToken,
}

type SessionSlot<'a> = MutexGuard<'a, Option<ActiveSession>>;

struct Inner<T> {
    config: AdapterConfig,
    transport: T,
    store: CredentialStore,
    state: RwLock<AdapterState>,
    events: mpsc::Sender<BridgeEvent>,
    session: TokioMutex<Option<ActiveSession>>,
    /// Generation of the session allowed to emit events; 0 when none.
    active_generation: AtomicU64,
    next_generation: AtomicU64,
    reconnect: Mutex<Option<PendingReconnect>>,
    next_reconnect: AtomicU64,
}

/// Client adapter for the chat network.
///
/// Cheap to clone; clones share the same session.
pub struct ProtocolAdapter<T: ProtocolTransport> {
    inner: Arc<Inner<T>>,
}

impl<T: ProtocolTransport> Clone for ProtocolAdapter<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: ProtocolTransport> ProtocolAdapter<T> {
    /// Create an adapter and the receiver for its events.
    pub fn new(
        config: AdapterConfig,
        transport: T,
        store: CredentialStore,
    ) -> (Self, mpsc::Receiver<BridgeEvent>) {
        let (events, events_rx) = mpsc::channel(config.event_buffer.max(1));
        let inner = Inner {
            config,
            transport,
            store,
            state: RwLock::new(AdapterState::Disconnected),
            events,
            session: TokioMutex::new(None),
            active_generation: AtomicU64::new(0),
            next_generation: AtomicU64::new(0),
            reconnect: Mutex::new(None),
            next_reconnect: AtomicU64::new(0),
        };
        (
            Self {
                inner: Arc::new(inner),
            },
            events_rx,
        )
    }

    pub fn state(&self) -> AdapterState {
        *self.inner.state.read()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == AdapterState::Connected
    }

    /// Whether a reconnect timer is armed.
    pub fn reconnect_pending(&self) -> bool {
        self.inner.reconnect.lock().is_some()
    }

    /// Open a session with the network.
    ///
    /// A pending reconnect timer is cancelled and the dial happens now. If a
    /// session is already live or dialling this is a no-op. Fails only when
    /// the credentials cannot be loaded.
    pub async fn connect(&self) -> AdapterResult<()> {
        let slot = self.inner.session.lock().await;
        self.inner.cancel_reconnect();
        self.inner.open_session(slot).await
    }

    /// Send a text message through the live session.
    ///
    /// Resolves once the library accepts the message, not on delivery.
    pub async fn send_message(&self, to: &str, text: &str) -> AdapterResult<()> {
        let commands = {
            let slot = self.inner.session.lock().await;
            match slot.as_ref().and_then(|s| s.commands.clone()) {
                Some(commands) if self.is_connected() => commands,
                _ => return Err(AdapterError::NotConnected),
            }
        };

        let (ack, ack_rx) = oneshot::channel();
        commands
            .send(TransportCommand::Send {
                to: to.to_string(),
                text: text.to_string(),
                ack,
            })
            .await
            .map_err(|_| AdapterError::NotConnected)?;

        let timeout_ms = self.inner.config.send_timeout_ms;
        match tokio::time::timeout(Duration::from_millis(timeout_ms), ack_rx).await {
            Ok(Ok(Ok(()))) => {
                debug!(to, "Message accepted by the network");
                Ok(())
            }
            Ok(Ok(Err(reason))) => Err(AdapterError::SendRejected(reason)),
            Ok(Err(_)) => Err(AdapterError::Transport(
                "session ended before the send was accepted".to_string(),
            )),
            Err(_) => {
                warn!(to, timeout_ms, "Send was not acknowledged in time");
                Err(AdapterError::Transport(format!(
                    "send not acknowledged within {timeout_ms}ms"
                )))
            }
        }
    }

    /// Close the session without reconnecting.
    ///
    /// Safe to call in any state, including repeatedly.
    pub async fn disconnect(&self) {
        let active = {
            // A close racing this call arms its timer under the same lock.
            let mut slot = self.inner.session.lock().await;
            self.inner.cancel_reconnect();
            self.inner.active_generation.store(0, Ordering::SeqCst);
            if self.state() != AdapterState::LoggedOut {
                self.inner.set_state(AdapterState::Disconnected);
            }
            slot.take()
        };

        match active {
            Some(session) => {
                session.cancel.cancel();
                info!(generation = session.generation, "Disconnected from chat network");
            }
            None => debug!("Disconnect requested with no active session"),
        }
    }
}

impl<T: ProtocolTransport> Inner<T> {
    fn set_state(&self, next: AdapterState) {
        let prev = std::mem::replace(&mut *self.state.write(), next);
        if prev != next {
            debug!(from = ?prev, to = ?next, "Adapter state changed");
        }
    }

    async fn emit(&self, event: BridgeEvent) {
        if self.events.send(event).await.is_err() {
            warn!("Bridge event receiver dropped");
        }
    }

    fn is_current(&self, generation: u64) -> bool {
        self.active_generation.load(Ordering::SeqCst) == generation
    }

    async fn open_session(self: &Arc<Self>, mut slot: SessionSlot<'_>) -> AdapterResult<()> {
        if let Some(active) = slot.as_ref() {
            debug!(
                generation = active.generation,
                "Session already active, connect ignored"
            );
            return Ok(());
        }

        let credentials = match self.store.load_or_create().await {
            Ok(credentials) => credentials,
            Err(e) => {
                error!(error = %e, "Failed to load credentials");
                return Err(e);
            }
        };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancellationToken::new();
        *slot = Some(ActiveSession {
            generation,
            commands: None,
            cancel: cancel.clone(),
        });
        self.active_generation.store(generation, Ordering::SeqCst);
        self.set_state(AdapterState::Connecting);
        drop(slot);

        info!(generation, "Connecting to chat network");
        tokio::spawn(run_session(Arc::clone(self), generation, credentials, cancel));
        Ok(())
    }

    /// Publish the command channel of a freshly opened session.
    ///
    /// Returns false if the session was superseded while dialling.
    async fn attach_commands(
        &self,
        generation: u64,
        commands: mpsc::Sender<TransportCommand>,
    ) -> bool {
        let mut slot = self.session.lock().await;
        match slot.as_mut() {
            Some(active) if active.generation == generation => {
                active.commands = Some(commands);
                true
            }
            _ => false,
        }
    }

    async fn handle_event(&self, generation: u64, event: TransportEvent) {
        if !self.is_current(generation) {
            trace!(generation, "Dropping event from stale session");
            return;
        }

        match event {
            TransportEvent::Qr(challenge) => {
                self.set_state(AdapterState::AwaitingQr);
                match qr::render(&challenge) {
                    Some(art) => info!("Scan this QR code to pair the bridge:\n{art}"),
                    None => warn!("Pairing challenge could not be rendered"),
                }
                self.emit(BridgeEvent::qr(challenge)).await;
            }
            TransportEvent::Open => {
                self.set_state(AdapterState::Connected);
                info!(generation, "Connected to chat network");
                self.emit(BridgeEvent::status(LinkStatus::Connected)).await;
            }
            TransportEvent::CredentialsUpdated(credentials) => {
                if let Err(e) = self.store.save(&credentials).await {
                    error!(error = %e, "Failed to persist credentials");
                    self.emit(BridgeEvent::error(e.to_string())).await;
                }
            }
            TransportEvent::Messages { kind, messages } => {
                if kind != UpsertKind::Notify {
                    debug!(count = messages.len(), ?kind, "Ignoring non-live message batch");
                    return;
                }
                for raw in &messages {
                    match normalize(raw) {
                        Some(message) => {
                            debug!(id = %message.id, sender = %message.sender, "Inbound message");
                            self.emit(BridgeEvent::Message(message)).await;
                        }
                        None => trace!(id = %raw.key.id, "Message not relayed"),
                    }
                }
            }
            TransportEvent::Error(reason) => {
                warn!(error = %reason, "Protocol library error");
                self.emit(BridgeEvent::error(reason)).await;
            }
            TransportEvent::Closed(close) => {
                debug!(reason = %close.reason, "Close delivered out of band");
            }
        }
    }

    async fn handle_close(self: &Arc<Self>, generation: u64, close: CloseInfo) {
        let logged_out = close.status_code == Some(self.config.logout_status_code);
        {
            let mut slot = self.session.lock().await;
            if slot.as_ref().map(|s| s.generation) != Some(generation) {
                debug!(generation, "Ignoring close of superseded session");
                return;
            }
            *slot = None;
            self.active_generation.store(0, Ordering::SeqCst);

            // The reconnect timer is armed while the slot is held.
            if logged_out {
                self.set_state(AdapterState::LoggedOut);
            } else {
                self.set_state(AdapterState::Connecting);
                warn!(
                    status_code = ?close.status_code,
                    reason = %close.reason,
                    "Connection closed"
                );
                self.schedule_reconnect();
            }
        }

        if logged_out {
            error!(
                status_code = ?close.status_code,
                reason = %close.reason,
                "Logged out by the network, not reconnecting"
            );
        }
        self.emit(BridgeEvent::status(LinkStatus::Disconnected)).await;
        if logged_out {
            self.emit(BridgeEvent::error(BridgeError::ProtocolLogout.to_string()))
                .await;
        }
    }

    fn schedule_reconnect(self: &Arc<Self>) {
        let (id, cancel) = {
            let mut pending = self.reconnect.lock();
            if pending.is_some() {
                debug!("Reconnect already scheduled");
                return;
            }
            let id = self.next_reconnect.fetch_add(1, Ordering::SeqCst) + 1;
            let cancel = CancellationToken::new();
            *pending = Some(PendingReconnect {
                id,
                cancel: cancel.clone(),
            });
            (id, cancel)
        };

        let delay_ms = self.config.reconnect_delay_ms;
        warn!(delay_ms, "Reconnecting after delay");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(Duration::from_millis(delay_ms)) => {}
                () = cancel.cancelled() => {
                    debug!("Scheduled reconnect cancelled");
                    return;
                }
            }

            let slot = inner.session.lock().await;
            if !inner.take_reconnect(id) {
                return;
            }
            if let Err(e) = inner.open_session(slot).await {
                error!(error = %e, "Reconnect failed");
                inner.emit(BridgeEvent::error(e.to_string())).await;
            }
        });
    }

    /// Clear the pending reconnect if it is still `id`.
    fn take_reconnect(&self, id: u64) -> bool {
        let mut pending = self.reconnect.lock();
        if pending.as_ref().is_some_and(|p| p.id == id) {
            *pending = None;
            true
        } else {
            false
        }
    }

    fn cancel_reconnect(&self) {
        let pending = self.reconnect.lock().take();
        if let Some(pending) = pending {
            pending.cancel.cancel();
            debug!("Pending reconnect cancelled");
        }
    }
}

async fn run_session<T: ProtocolTransport>(
    inner: Arc<Inner<T>>,
    generation: u64,
    credentials: Credentials,
    cancel: CancellationToken,
) {
    let opened = tokio::select! {
        result = inner.transport.open(credentials) => result,
        () = cancel.cancelled() => {
            debug!(generation, "Session cancelled while dialling");
            return;
        }
    };

    let TransportSession {
        mut events,
        commands,
    } = match opened {
        Ok(session) => session,
        Err(e) => {
            warn!(generation, error = %e, "Failed to open session");
            inner
                .handle_close(generation, CloseInfo::new(None, e.to_string()))
                .await;
            return;
        }
    };

    if !inner.attach_commands(generation, commands.clone()).await {
        let _ = commands.send(TransportCommand::Close).await;
        return;
    }

    let close = loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                let _ = commands.send(TransportCommand::Close).await;
                debug!(generation, "Session closed locally");
                return;
            }

            event = events.recv() => match event {
                Some(TransportEvent::Closed(close)) => break close,
                Some(event) => inner.handle_event(generation, event).await,
                None => break CloseInfo::new(None, "Transport event stream ended"),
            },
        }
    };

    inner.handle_close(generation, close).await;
}
