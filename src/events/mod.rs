//! Semantic shard events and their broker serialization.

pub mod serialize;

pub use serialize::{serialize_event, GatewayEvent};

use crate::gateway::guilds::GuildRecord;
use serde_json::Value;
use tokio::sync::mpsc;

/// Sender half each shard emits on. The orchestrator owns the receiver.
pub type EventSender = mpsc::UnboundedSender<ShardEvent>;

/// Receiver half handed to subscribers.
pub type EventReceiver = mpsc::UnboundedReceiver<ShardEvent>;

/// Events a shard emits upward, in the order the gateway delivered them.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardEvent {
    /// IDENTIFY succeeded; `data` is the raw READY payload.
    Ready {
        shard_id: u64,
        session_id: String,
        data: Value,
    },
    /// RESUME succeeded.
    Resumed { shard_id: u64 },
    /// Every guild listed in READY has arrived.
    Loaded { shard_id: u64 },
    /// A guild that was not pending from READY became visible.
    GuildJoin {
        shard_id: u64,
        guild: GuildRecord,
        data: Value,
    },
    MessageCreate { shard_id: u64, data: Value },
    /// Other pass-through dispatch.
    Dispatch {
        shard_id: u64,
        event_type: String,
        data: Value,
    },
    /// Free-text diagnostics, only emitted when debug is enabled.
    Debug { shard_id: u64, message: String },
    /// Shard closed with an unrecoverable code and will not reconnect.
    Fatal { shard_id: u64, code: u16 },
}

impl ShardEvent {
    /// Subscriber-facing event name.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Ready { .. } => "ready",
            Self::Resumed { .. } => "resumed",
            Self::Loaded { .. } => "loaded",
            Self::GuildJoin { .. } => "guildJoin",
            Self::MessageCreate { .. } => "messageCreate",
            Self::Dispatch { .. } => "dispatch",
            Self::Debug { .. } => "debug",
            Self::Fatal { .. } => "fatal",
        }
    }

    pub fn shard_id(&self) -> u64 {
        match self {
            Self::Ready { shard_id, .. }
            | Self::Resumed { shard_id }
            | Self::Loaded { shard_id }
            | Self::GuildJoin { shard_id, .. }
            | Self::MessageCreate { shard_id, .. }
            | Self::Dispatch { shard_id, .. }
            | Self::Debug { shard_id, .. }
            | Self::Fatal { shard_id, .. } => *shard_id,
        }
    }
}
