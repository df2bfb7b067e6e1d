//! Registry of connected local peers.
//!
//! Each peer gets a bounded outbox drained by its socket writer. Broadcast
//! never waits on a peer: a full or closed outbox means the peer is not
//! writable and the frame is skipped for it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chatrelay_telemetry::Metrics;
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::error::{RelayError, RelayResult};

struct PeerHandle {
    outbox: mpsc::Sender<String>,
    closer: CancellationToken,
}

/// A freshly registered peer.
pub struct PeerRegistration {
    pub id: u64,
    /// Queue for frames addressed to this peer alone.
    pub outbox: mpsc::Sender<String>,
    /// Frames for the socket writer.
    pub inbox: mpsc::Receiver<String>,
    /// Cancelled when the server closes the peer.
    pub closer: CancellationToken,
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub skipped: usize,
}

struct Peers {
    handles: HashMap<u64, PeerHandle>,
    closed: bool,
}

pub struct PeerRegistry {
    peers: RwLock<Peers>,
    next_id: AtomicU64,
    max_peers: usize,
    buffer: usize,
}

impl PeerRegistry {
    /// `max_peers` of 0 means unlimited.
    pub fn new(max_peers: usize, buffer: usize) -> Self {
        Self {
            peers: RwLock::new(Peers {
                handles: HashMap::new(),
                closed: false,
            }),
            next_id: AtomicU64::new(1),
            max_peers,
            buffer: buffer.max(1),
        }
    }

    /// Register a new peer.
    ///
    /// Fails once `close_all` has run or when the peer limit is reached.
    pub fn register(&self) -> RelayResult<PeerRegistration> {
        let mut peers = self.peers.write();
        if peers.closed {
            Metrics::peer_rejected();
            return Err(RelayError::ShuttingDown);
        }
        if self.max_peers > 0 && peers.handles.len() >= self.max_peers {
            Metrics::peer_rejected();
            return Err(RelayError::PeerLimit {
                max: self.max_peers,
            });
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (outbox, inbox) = mpsc::channel(self.buffer);
        let closer = CancellationToken::new();
        peers.handles.insert(
            id,
            PeerHandle {
                outbox: outbox.clone(),
                closer: closer.clone(),
            },
        );
        Metrics::peer_registered();

        Ok(PeerRegistration {
            id,
            outbox,
            inbox,
            closer,
        })
    }

    /// Forget a peer. Returns false if it was already gone.
    pub fn remove(&self, id: u64) -> bool {
        let removed = self.peers.write().handles.remove(&id).is_some();
        if removed {
            Metrics::peer_removed();
        }
        removed
    }

    /// Queue `payload` for every writable peer.
    pub fn broadcast(&self, payload: &str) -> BroadcastOutcome {
        let peers = self.peers.read();
        let mut outcome = BroadcastOutcome::default();

        for (id, peer) in &peers.handles {
            match peer.outbox.try_send(payload.to_string()) {
                Ok(()) => outcome.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(peer = id, "Peer outbox full, skipping delivery");
                    outcome.skipped += 1;
                }
                Err(TrySendError::Closed(_)) => {
                    trace!(peer = id, "Peer outbox closed, skipping delivery");
                    outcome.skipped += 1;
                }
            }
        }

        outcome
    }

    /// Close every peer and refuse new ones. Returns how many were closed.
    pub fn close_all(&self) -> usize {
        let handles = {
            let mut peers = self.peers.write();
            peers.closed = true;
            std::mem::take(&mut peers.handles)
        };

        for peer in handles.values() {
            peer.closer.cancel();
            Metrics::peer_removed();
        }
        handles.len()
    }

    pub fn len(&self) -> usize {
        self.peers.read().handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_closed(&self) -> bool {
        self.peers.read().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_broadcast_reaches_every_peer_in_order() {
        let registry = PeerRegistry::new(0, 8);
        let mut a = registry.register().unwrap();
        let mut b = registry.register().unwrap();

        registry.broadcast("one");
        let outcome = registry.broadcast("two");
        assert_eq!(
            outcome,
            BroadcastOutcome {
                delivered: 2,
                skipped: 0
            }
        );

        for peer in [&mut a, &mut b] {
            assert_eq!(peer.inbox.try_recv().unwrap(), "one");
            assert_eq!(peer.inbox.try_recv().unwrap(), "two");
        }
    }

    #[test]
    fn test_non_writable_peers_are_skipped() {
        let registry = PeerRegistry::new(0, 1);
        let mut healthy = registry.register().unwrap();
        let _full = registry.register().unwrap();
        let gone = registry.register().unwrap();
        drop(gone.inbox);

        registry.broadcast("first");
        healthy.inbox.try_recv().unwrap();

        let outcome = registry.broadcast("second");
        assert_eq!(outcome.delivered, 1);
        assert_eq!(outcome.skipped, 2);
        assert_eq!(healthy.inbox.try_recv().unwrap(), "second");
    }

    #[test]
    fn test_peer_limit() {
        let registry = PeerRegistry::new(2, 4);
        let first = registry.register().unwrap();
        let _second = registry.register().unwrap();
        assert!(matches!(
            registry.register(),
            Err(RelayError::PeerLimit { max: 2 })
        ));

        assert!(registry.remove(first.id));
        assert!(!registry.remove(first.id));
        assert!(registry.register().is_ok());
    }

    #[test]
    fn test_close_all_cancels_and_refuses() {
        let registry = PeerRegistry::new(0, 4);
        let a = registry.register().unwrap();
        let b = registry.register().unwrap();

        assert_eq!(registry.close_all(), 2);
        assert!(a.closer.is_cancelled());
        assert!(b.closer.is_cancelled());
        assert!(registry.is_empty());
        assert!(registry.is_closed());
        assert!(matches!(registry.register(), Err(RelayError::ShuttingDown)));
    }
}
