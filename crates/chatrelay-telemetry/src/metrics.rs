//! Prometheus metrics for the chat relay bridge.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, which is a build defect and should crash at
//! first use rather than silently drop metrics.

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_int_counter, register_int_gauge, CounterVec,
    Encoder, Gauge, IntCounter, IntGauge, TextEncoder,
};

use crate::error::{TelemetryError, TelemetryResult};

/// Chat network link state (1 = connected, 0 = disconnected).
pub static LINK_CONNECTED: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "chatrelay_link_connected",
        "Chat network link state (1=connected)"
    )
    .unwrap()
});

/// Link drops reported to peers.
pub static LINK_DROPS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chatrelay_link_drops_total",
        "Total times the chat network link went down"
    )
    .unwrap()
});

/// Pairing challenges issued.
pub static QR_CHALLENGES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chatrelay_qr_challenges_total",
        "Total pairing challenges received from the network"
    )
    .unwrap()
});

/// Currently registered local peers.
pub static PEERS_CONNECTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("chatrelay_peers_connected", "Registered local peers").unwrap()
});

/// Peers turned away because the registry was full or closed.
pub static PEERS_REJECTED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chatrelay_peers_rejected_total",
        "Total peer connections refused"
    )
    .unwrap()
});

/// Events fanned out to peers.
/// Labels: type (message/status/qr/error)
pub static BROADCASTS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chatrelay_broadcasts_total",
        "Total events broadcast to peers",
        &["type"]
    )
    .unwrap()
});

/// Per-peer deliveries skipped because the peer was not writable.
pub static DELIVERIES_SKIPPED_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "chatrelay_deliveries_skipped_total",
        "Total broadcast deliveries skipped for non-writable peers"
    )
    .unwrap()
});

/// Peer commands handled.
/// Labels: command, outcome (sent/error/ignored)
pub static COMMANDS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "chatrelay_commands_total",
        "Total peer commands handled",
        &["command", "outcome"]
    )
    .unwrap()
});

/// Metrics facade for easy access.
pub struct Metrics;

impl Metrics {
    pub fn link_connected() {
        LINK_CONNECTED.set(1.0);
    }

    /// Record the link going down.
    pub fn link_disconnected() {
        LINK_CONNECTED.set(0.0);
        LINK_DROPS_TOTAL.inc();
    }

    pub fn qr_challenge() {
        QR_CHALLENGES_TOTAL.inc();
    }

    pub fn peer_registered() {
        PEERS_CONNECTED.inc();
    }

    pub fn peer_removed() {
        PEERS_CONNECTED.dec();
    }

    pub fn peer_rejected() {
        PEERS_REJECTED_TOTAL.inc();
    }

    /// Record one broadcast and how many peers were skipped.
    pub fn broadcast(event_type: &str, skipped: usize) {
        BROADCASTS_TOTAL.with_label_values(&[event_type]).inc();
        DELIVERIES_SKIPPED_TOTAL.inc_by(skipped as u64);
    }

    pub fn command(command: &str, outcome: &str) {
        COMMANDS_TOTAL.with_label_values(&[command, outcome]).inc();
    }

    /// Encode every registered metric in the Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&prometheus::gather(), &mut buf)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buf).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}
