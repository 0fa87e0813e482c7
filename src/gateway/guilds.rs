//! Guild availability tracking and the per-shard guild cache.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Minimal cached guild.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuildRecord {
    pub id: String,
    pub name: Option<String>,
    pub member_count: Option<u64>,
}

/// Outcome of a GUILD_CREATE with respect to the READY guild list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuildAvailability {
    /// Was pending from READY; others are still outstanding.
    Pending { remaining: usize },
    /// Was the last pending guild: initial sync is complete.
    Loaded,
    /// Not pending from READY: a guild joined while the shard was live.
    Joined,
}

/// Distinguishes "became available after handshake" from "newly joined".
///
/// The pending set exists only between READY and the last matching
/// GUILD_CREATE.
#[derive(Debug, Default)]
pub struct GuildAvailabilityTracker {
    unavailable: Option<HashSet<String>>,
}

impl GuildAvailabilityTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset from a READY guild list. Returns true if there is nothing to
    /// wait for, i.e. the shard is loaded already.
    pub fn begin<I>(&mut self, guild_ids: I) -> bool
    where
        I: IntoIterator<Item = String>,
    {
        let set: HashSet<String> = guild_ids.into_iter().collect();
        if set.is_empty() {
            self.unavailable = None;
            true
        } else {
            self.unavailable = Some(set);
            false
        }
    }

    pub fn mark_available(&mut self, guild_id: &str) -> GuildAvailability {
        let Some(set) = self.unavailable.as_mut() else {
            return GuildAvailability::Joined;
        };
        if !set.remove(guild_id) {
            return GuildAvailability::Joined;
        }
        if set.is_empty() {
            self.unavailable = None;
            GuildAvailability::Loaded
        } else {
            GuildAvailability::Pending {
                remaining: set.len(),
            }
        }
    }

    /// True while READY guilds are still outstanding.
    pub fn is_loading(&self) -> bool {
        self.unavailable.is_some()
    }

    pub fn pending(&self) -> usize {
        self.unavailable.as_ref().map_or(0, HashSet::len)
    }
}

/// Guild cache owned by one shard task.
#[derive(Debug, Default)]
pub struct GuildCache {
    guilds: HashMap<String, GuildRecord>,
}

impl GuildCache {
    pub fn upsert(&mut self, record: GuildRecord) {
        self.guilds.insert(record.id.clone(), record);
    }

    pub fn get(&self, guild_id: &str) -> Option<&GuildRecord> {
        self.guilds.get(guild_id)
    }

    pub fn len(&self) -> usize {
        self.guilds.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guilds.is_empty()
    }

    /// Owned copy for readers outside the shard task.
    pub fn snapshot(&self) -> Vec<GuildRecord> {
        let mut records: Vec<GuildRecord> = self.guilds.values().cloned().collect();
        records.sort_by(|a, b| a.id.cmp(&b.id));
        records
    }
}
