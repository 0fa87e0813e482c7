//! Shard state tracking
//!
//! Shared health table read by the health server and the client.

use dashmap::DashMap;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Health status for a shard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardHealth {
    /// Shard is connecting or waiting for the handshake
    Connecting,
    /// Shard is ready and receiving events
    Ready,
    /// Shard is resuming after disconnect
    Resuming,
    /// Shard is disconnected, waiting out its backoff
    Disconnected,
    /// Shard closed with an unrecoverable code
    Dead,
}

impl ShardHealth {
    /// Returns true if the shard is healthy
    pub fn is_healthy(&self) -> bool {
        matches!(self, ShardHealth::Ready | ShardHealth::Resuming)
    }

    /// Returns true if the shard is ready to receive events
    pub fn is_ready(&self) -> bool {
        matches!(self, ShardHealth::Ready)
    }
}

/// State for a single shard
#[derive(Debug)]
pub struct ShardStateEntry {
    pub health: ShardHealth,
    pub guilds: u64,
    pub events_received: AtomicU64,
    pub reconnects: AtomicU64,
    pub last_close_code: Option<u16>,
    pub last_heartbeat: Option<Instant>,
    pub connected_at: Option<Instant>,
}

impl Default for ShardStateEntry {
    fn default() -> Self {
        Self {
            health: ShardHealth::Connecting,
            guilds: 0,
            events_received: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            last_close_code: None,
            last_heartbeat: None,
            connected_at: None,
        }
    }
}

/// Point-in-time view of one shard, as served by `/shards`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShardStatus {
    pub shard_id: u64,
    pub health: ShardHealth,
    pub guilds: u64,
    pub events_received: u64,
    pub reconnects: u64,
    pub last_close_code: Option<u16>,
    /// Milliseconds since the last heartbeat ACK.
    pub heartbeat_age_ms: Option<u64>,
}

/// Shared state across all shards in a pool
#[derive(Debug, Clone)]
pub struct ShardState {
    inner: Arc<ShardStateInner>,
}

#[derive(Debug)]
struct ShardStateInner {
    pool_id: u64,
    shards: DashMap<u64, ShardStateEntry>,
    total_shards: u64,
}

impl ShardState {
    /// Create a new shard state tracker
    pub fn new(pool_id: u64, shard_ids: impl Iterator<Item = u64>, total_shards: u64) -> Self {
        let shards = DashMap::new();
        for shard_id in shard_ids {
            shards.insert(shard_id, ShardStateEntry::default());
        }

        Self {
            inner: Arc::new(ShardStateInner {
                pool_id,
                shards,
                total_shards,
            }),
        }
    }

    /// Get the pool ID
    pub fn pool_id(&self) -> u64 {
        self.inner.pool_id
    }

    /// Get total shards across the cluster
    pub fn total_shards(&self) -> u64 {
        self.inner.total_shards
    }

    /// Update shard health
    pub fn set_health(&self, shard_id: u64, health: ShardHealth) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.health = health;
            if health == ShardHealth::Ready {
                entry.connected_at = Some(Instant::now());
            }
        }
    }

    /// Update shard guild count
    pub fn set_guilds(&self, shard_id: u64, count: u64) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.guilds = count;
        }
    }

    /// Increment event received counter
    pub fn record_event(&self, shard_id: u64) {
        if let Some(entry) = self.inner.shards.get(&shard_id) {
            entry.events_received.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a recoverable close and the reconnect that follows
    pub fn record_close(&self, shard_id: u64, code: u16) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.last_close_code = Some(code);
            entry.reconnects.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record heartbeat
    pub fn record_heartbeat(&self, shard_id: u64) {
        if let Some(mut entry) = self.inner.shards.get_mut(&shard_id) {
            entry.last_heartbeat = Some(Instant::now());
        }
    }

    /// Get health for a specific shard
    pub fn get_health(&self, shard_id: u64) -> Option<ShardHealth> {
        self.inner.shards.get(&shard_id).map(|e| e.health)
    }

    /// Last close code seen by a shard
    pub fn last_close_code(&self, shard_id: u64) -> Option<u16> {
        self.inner.shards.get(&shard_id).and_then(|e| e.last_close_code)
    }

    /// Reconnects performed by a shard
    pub fn reconnects(&self, shard_id: u64) -> u64 {
        self.inner
            .shards
            .get(&shard_id)
            .map_or(0, |e| e.reconnects.load(Ordering::Relaxed))
    }

    /// Every shard's status, ordered by shard id.
    pub fn shards(&self) -> Vec<ShardStatus> {
        let mut shards: Vec<ShardStatus> = self
            .inner
            .shards
            .iter()
            .map(|e| ShardStatus {
                shard_id: *e.key(),
                health: e.health,
                guilds: e.guilds,
                events_received: e.events_received.load(Ordering::Relaxed),
                reconnects: e.reconnects.load(Ordering::Relaxed),
                last_close_code: e.last_close_code,
                heartbeat_age_ms: e
                    .last_heartbeat
                    .map(|at| at.elapsed().as_millis() as u64),
            })
            .collect();
        shards.sort_by_key(|s| s.shard_id);
        shards
    }

    /// Shards closed with an unrecoverable code
    pub fn dead_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.health == ShardHealth::Dead)
            .count()
    }

    /// Get total events received across all shards
    pub fn total_events_received(&self) -> u64 {
        self.inner
            .shards
            .iter()
            .map(|e| e.events_received.load(Ordering::Relaxed))
            .sum()
    }

    /// Get total guilds across all shards
    pub fn total_guilds(&self) -> u64 {
        self.inner.shards.iter().map(|e| e.guilds).sum()
    }

    /// Get count of ready shards
    pub fn ready_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.health.is_ready())
            .count()
    }

    /// Get count of healthy shards (ready or resuming)
    pub fn healthy_shards(&self) -> usize {
        self.inner
            .shards
            .iter()
            .filter(|e| e.health.is_healthy())
            .count()
    }

    /// Get total shard count in this pool
    pub fn shard_count(&self) -> usize {
        self.inner.shards.len()
    }

    /// Check if pool is ready (at least one shard ready)
    pub fn is_ready(&self) -> bool {
        self.ready_shards() > 0
    }

    /// Check if pool is fully healthy
    pub fn is_healthy(&self) -> bool {
        self.healthy_shards() == self.shard_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_shard_updates_are_ignored() {
        let state = ShardState::new(0, 0..2, 2);
        state.set_health(9, ShardHealth::Ready);
        state.record_event(9);
        assert_eq!(state.get_health(9), None);
        assert_eq!(state.total_events_received(), 0);
    }

    #[test]
    fn readiness_and_health_counts() {
        let state = ShardState::new(1, 25..28, 60);
        assert_eq!(state.shard_count(), 3);
        assert!(!state.is_ready());

        state.set_health(25, ShardHealth::Ready);
        state.set_health(26, ShardHealth::Resuming);
        assert!(state.is_ready());
        assert_eq!(state.ready_shards(), 1);
        assert_eq!(state.healthy_shards(), 2);
        assert!(!state.is_healthy());

        state.set_health(27, ShardHealth::Ready);
        assert!(state.is_healthy());
    }

    #[test]
    fn close_bookkeeping() {
        let state = ShardState::new(0, 0..1, 1);
        state.record_close(0, 1006);
        state.record_close(0, 4000);
        assert_eq!(state.last_close_code(0), Some(4000));
        assert_eq!(state.reconnects(0), 2);

        state.set_guilds(0, 12);
        assert_eq!(state.total_guilds(), 12);
    }

    #[test]
    fn status_snapshot_is_ordered_and_complete() {
        let state = ShardState::new(0, [2, 0, 1].into_iter(), 3);
        state.set_health(1, ShardHealth::Dead);
        state.record_close(2, 4000);
        state.record_event(2);
        state.record_heartbeat(2);

        let shards = state.shards();
        let ids: Vec<u64> = shards.iter().map(|s| s.shard_id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
        assert_eq!(shards[1].health, ShardHealth::Dead);
        assert_eq!(shards[2].last_close_code, Some(4000));
        assert_eq!(shards[2].reconnects, 1);
        assert_eq!(shards[2].events_received, 1);
        assert!(shards[2].heartbeat_age_ms.is_some());
        assert_eq!(shards[0].heartbeat_age_ms, None);
        assert_eq!(state.dead_shards(), 1);

        let json = serde_json::to_value(&shards[1]).unwrap();
        assert_eq!(json["health"], "dead");
    }
}
