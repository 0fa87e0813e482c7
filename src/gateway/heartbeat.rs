//! Heartbeat liveness tracking for zombie connection detection.
//!
//! The ticker lives inside the shard's own event loop, so the ack flag has
//! a single writer and needs no lock.

use std::time::Duration;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tracing::trace;

/// What the shard should do when the heartbeat timer fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Beat {
    /// Previous heartbeat was acknowledged, send the next one.
    Send,
    /// Previous heartbeat was never acknowledged.
    Zombie,
}

/// Heartbeat timer plus the `acked` liveness flag.
#[derive(Debug)]
pub struct Heartbeat {
    acked: bool,
    ticker: Option<Interval>,
}

impl Heartbeat {
    /// No ticker yet; starts acknowledged (no heartbeat sent).
    pub fn new() -> Self {
        Self {
            acked: true,
            ticker: None,
        }
    }

    /// Start beating at the HELLO interval. The first tick is one full
    /// interval from now. A zero interval is raised to one millisecond.
    pub fn start(&mut self, interval: Duration) {
        let interval = interval.max(Duration::from_millis(1));
        let mut ticker = interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        self.ticker = Some(ticker);
        self.acked = true;
    }

    /// Cancel the timer (connection gone).
    pub fn stop(&mut self) {
        self.ticker = None;
        self.acked = true;
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_some()
    }

    pub fn is_acked(&self) -> bool {
        self.acked
    }

    /// Record that a heartbeat ACK was received.
    pub fn ack(&mut self) {
        self.acked = true;
        trace!("Heartbeat ACK received");
    }

    /// Wait for the next tick and decide what it means. Pending forever
    /// while no ticker is running.
    pub async fn tick(&mut self) -> Beat {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                self.on_tick()
            }
            None => std::future::pending().await,
        }
    }

    /// Liveness check for one tick. A `Send` verdict clears `acked` so the
    /// next tick requires a fresh ACK.
    pub fn on_tick(&mut self) -> Beat {
        if self.acked {
            self.acked = false;
            Beat::Send
        } else {
            Beat::Zombie
        }
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}
