//! Keepalive tracking for gateway sessions.
//!
//! Pings go out when the link has been quiet for a full interval. Any
//! received frame counts as proof of life.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

/// Keepalive state for one gateway session.
pub struct HeartbeatManager {
    /// How long the link may stay quiet before a ping is sent.
    interval_ms: u64,
    /// How long to wait for traffic after a ping.
    timeout_ms: u64,
    last_ping: RwLock<Option<DateTime<Utc>>>,
    last_message: RwLock<DateTime<Utc>>,
    waiting_for_pong: RwLock<bool>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            last_ping: RwLock::new(None),
            last_message: RwLock::new(Utc::now()),
            waiting_for_pong: RwLock::new(false),
        }
    }

    pub fn record_ping(&self) {
        *self.last_ping.write() = Some(Utc::now());
        *self.waiting_for_pong.write() = true;
    }

    /// Record any inbound frame, pongs included.
    pub fn record_message(&self) {
        let now = Utc::now();
        *self.last_message.write() = now;

        let mut waiting = self.waiting_for_pong.write();
        if *waiting {
            *waiting = false;
            if let Some(ping_time) = *self.last_ping.read() {
                debug!(rtt_ms = (now - ping_time).num_milliseconds(), "Keepalive answered");
            }
        }
    }

    pub fn is_timed_out(&self) -> bool {
        if !*self.waiting_for_pong.read() {
            return false;
        }

        match *self.last_ping.read() {
            Some(ping_time) => (Utc::now() - ping_time).num_milliseconds() > self.timeout_ms as i64,
            None => false,
        }
    }

    pub fn should_send_ping(&self) -> bool {
        if *self.waiting_for_pong.read() {
            return false;
        }
        (Utc::now() - *self.last_message.read()).num_milliseconds() >= self.interval_ms as i64
    }

    /// Sleep until the next check is due.
    pub async fn wait_for_check(&self) {
        let period = (self.interval_ms / 2).min(self.timeout_ms / 2).max(10);
        tokio::time::sleep(Duration::from_millis(period)).await;
    }
}
