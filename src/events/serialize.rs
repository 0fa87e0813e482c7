//! Event serialization for the message broker
//!
//! Converts shard events to JSON envelopes for NATS publishing.

use super::ShardEvent;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

/// Generic gateway event payload
#[derive(Debug, Clone, Serialize)]
pub struct GatewayEvent {
    pub event_id: String,
    pub event_type: String,
    pub shard_id: u64,
    pub timestamp: u64,
    pub guild_id: Option<String>,
    pub channel_id: Option<String>,
    pub user_id: Option<String>,
    pub data: Value,
}

impl GatewayEvent {
    fn new(event_type: impl Into<String>, shard_id: u64, data: Value) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            shard_id,
            timestamp: now_millis(),
            guild_id: None,
            channel_id: None,
            user_id: None,
            data,
        }
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(str::to_string)
}

/// Serialize a shard event to a GatewayEvent payload
///
/// Returns None for events we don't forward (debug, fatal, resumed)
pub fn serialize_event(event: &ShardEvent) -> Option<GatewayEvent> {
    match event {
        ShardEvent::Ready { shard_id, session_id, data } => {
            let guilds = data.get("guilds").and_then(Value::as_array).map_or(0, Vec::len);
            let mut payload = GatewayEvent::new(
                "shard.ready",
                *shard_id,
                serde_json::json!({
                    "session_id": session_id,
                    "guild_count": guilds,
                }),
            );
            payload.user_id = data.get("user").and_then(|u| str_field(u, "id"));
            Some(payload)
        }

        ShardEvent::Loaded { shard_id } => {
            Some(GatewayEvent::new("shard.loaded", *shard_id, Value::Null))
        }

        ShardEvent::GuildJoin { shard_id, guild, .. } => {
            let mut payload = GatewayEvent::new(
                "guild.join",
                *shard_id,
                serde_json::json!({
                    "id": guild.id,
                    "name": guild.name,
                    "member_count": guild.member_count,
                }),
            );
            payload.guild_id = Some(guild.id.clone());
            Some(payload)
        }

        ShardEvent::MessageCreate { shard_id, data } => {
            let mut payload = GatewayEvent::new(
                "message.create",
                *shard_id,
                serde_json::json!({
                    "message_id": str_field(data, "id"),
                    "content": str_field(data, "content"),
                }),
            );
            payload.guild_id = str_field(data, "guild_id");
            payload.channel_id = str_field(data, "channel_id");
            payload.user_id = data.get("author").and_then(|a| str_field(a, "id"));
            Some(payload)
        }

        ShardEvent::Dispatch { shard_id, event_type, data } => {
            let mut payload = GatewayEvent::new(
                dispatch_event_type(event_type),
                *shard_id,
                data.clone(),
            );
            payload.guild_id = str_field(data, "guild_id");
            payload.channel_id = str_field(data, "channel_id");
            payload.user_id = data
                .get("user")
                .and_then(|u| str_field(u, "id"))
                .or_else(|| {
                    data.get("member")
                        .and_then(|m| m.get("user"))
                        .and_then(|u| str_field(u, "id"))
                });
            Some(payload)
        }

        // Local-only events: never forwarded to workers
        ShardEvent::Resumed { .. } | ShardEvent::Debug { .. } | ShardEvent::Fatal { .. } => None,
    }
}

/// Map a raw dispatch name to the broker's dotted event type.
fn dispatch_event_type(raw: &str) -> String {
    match raw {
        "GUILD_UPDATE" => "guild.update".to_string(),
        "GUILD_DELETE" => "guild.leave".to_string(),
        "GUILD_MEMBER_ADD" => "member.join".to_string(),
        "GUILD_MEMBER_REMOVE" => "member.leave".to_string(),
        "GUILD_MEMBER_UPDATE" => "member.update".to_string(),
        "MESSAGE_UPDATE" => "message.update".to_string(),
        "MESSAGE_DELETE" => "message.delete".to_string(),
        "INTERACTION_CREATE" => "interaction.create".to_string(),
        other => format!("dispatch.{}", other.to_ascii_lowercase()),
    }
}
