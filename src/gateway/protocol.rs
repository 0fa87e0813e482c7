//! Gateway wire types, opcodes and command builders.
//!
//! Only the opcodes and fields the shard state machine needs are modelled.
//! Dispatch payloads are forwarded as opaque `serde_json::Value`.

use serde::{Deserialize, Serialize};

// ── Opcodes ──────────────────────────────────────────────────

/// Gateway opcodes.
pub mod opcode {
    /// Event dispatch (receive only).
    pub const DISPATCH: u8 = 0;
    /// Heartbeat (bidirectional).
    pub const HEARTBEAT: u8 = 1;
    /// Identify (send only).
    pub const IDENTIFY: u8 = 2;
    /// Presence update (send only).
    pub const PRESENCE_UPDATE: u8 = 3;
    /// Resume (send only).
    pub const RESUME: u8 = 6;
    /// Server requests reconnect (receive only).
    pub const RECONNECT: u8 = 7;
    /// Invalid session (receive only).
    pub const INVALID_SESSION: u8 = 9;
    /// Hello, carries the heartbeat interval (receive only).
    pub const HELLO: u8 = 10;
    /// Heartbeat ACK (receive only).
    pub const HEARTBEAT_ACK: u8 = 11;
}

/// Close codes the client itself uses or classifies.
pub mod close_code {
    /// "No status received". The gateway occasionally closes this way
    /// when the session cannot continue.
    pub const NO_STATUS: u16 = 1005;
    /// Stream dropped without a close frame.
    pub const ABNORMAL: u16 = 1006;
    /// Client-initiated close that keeps the session resumable.
    pub const RECONNECT: u16 = 4000;
    /// Client-initiated close after an undecodable frame.
    pub const DECODE_ERROR: u16 = 4002;
    /// Authentication failed, bad token.
    pub const AUTHENTICATION_FAILED: u16 = 4004;
    /// Invalid shard configuration.
    pub const INVALID_SHARD: u16 = 4010;
    /// Too many guilds, sharding required.
    pub const SHARDING_REQUIRED: u16 = 4011;
    /// Invalid API version.
    pub const INVALID_API_VERSION: u16 = 4012;
    /// Invalid intents value.
    pub const INVALID_INTENTS: u16 = 4013;
    /// Disallowed intents (not enabled in the portal).
    pub const DISALLOWED_INTENTS: u16 = 4014;
}

/// Close codes that end a shard instead of reconnecting.
pub const DEFAULT_UNRECOVERABLE_CLOSE_CODES: &[u16] = &[
    close_code::NO_STATUS,
    close_code::AUTHENTICATION_FAILED,
    close_code::INVALID_SHARD,
    close_code::SHARDING_REQUIRED,
    close_code::INVALID_API_VERSION,
    close_code::INVALID_INTENTS,
    close_code::DISALLOWED_INTENTS,
];

/// Default Gateway intents bitmask: `GUILDS | GUILD_MESSAGES`.
pub const DEFAULT_INTENTS: u64 = (1 << 0) | (1 << 9);

// ── Wire Types ───────────────────────────────────────────────

/// Raw Gateway payload as received/sent over the stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GatewayPayload {
    /// Opcode for the payload.
    pub op: u8,
    /// Event data (opcode-dependent).
    #[serde(default)]
    pub d: Option<serde_json::Value>,
    /// Sequence number (only for `op=0` dispatch events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub s: Option<u64>,
    /// Event name (only for `op=0` dispatch events).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub t: Option<String>,
}

impl GatewayPayload {
    /// Build a command payload with no sequence or event name.
    pub fn command(op: u8, d: Option<serde_json::Value>) -> Self {
        Self {
            op,
            d,
            s: None,
            t: None,
        }
    }

    /// Build a dispatch payload (server side, used by tests and tooling).
    pub fn dispatch(event: &str, sequence: u64, d: serde_json::Value) -> Self {
        Self {
            op: opcode::DISPATCH,
            d: Some(d),
            s: Some(sequence),
            t: Some(event.to_string()),
        }
    }
}

/// Hello payload (`op=10`).
#[derive(Debug, Deserialize)]
pub struct HelloPayload {
    /// Heartbeat interval in milliseconds.
    pub heartbeat_interval: u64,
}

/// Ready event data (`t="READY"`).
#[derive(Debug, Deserialize)]
pub struct ReadyPayload {
    /// Session ID for resuming.
    pub session_id: String,
    /// Preferred resume gateway URL (newer API versions only).
    #[serde(default)]
    pub resume_gateway_url: Option<String>,
    /// The bot user object.
    #[serde(default)]
    pub user: serde_json::Value,
    /// Guilds the shard will receive GUILD_CREATE for.
    #[serde(default)]
    pub guilds: Vec<UnavailableGuild>,
}

/// Guild stub listed in READY.
#[derive(Debug, Deserialize)]
pub struct UnavailableGuild {
    pub id: String,
}

/// Fields of GUILD_CREATE kept in the guild cache.
#[derive(Debug, Deserialize)]
pub struct GuildCreatePayload {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub member_count: Option<u64>,
}

/// Response from `GET /gateway/bot`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBotResponse {
    /// Gateway WebSocket URL.
    pub url: String,
    /// Recommended shard count.
    #[serde(default)]
    pub shards: Option<u64>,
}

/// Client metadata sent with IDENTIFY.
#[derive(Debug, Clone)]
pub struct IdentifyProperties {
    pub os: String,
    pub browser: String,
    pub device: String,
}

impl Default for IdentifyProperties {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            browser: "arrakis".to_string(),
            device: "arrakis".to_string(),
        }
    }
}

// ── Command Builders ─────────────────────────────────────────

/// Format the credential the gateway and REST API expect.
pub fn bot_token(token: &str) -> String {
    if token.starts_with("Bot ") {
        token.to_string()
    } else {
        format!("Bot {token}")
    }
}

/// Build an Identify payload (`op=2`).
pub fn build_identify(
    token: &str,
    properties: &IdentifyProperties,
    shard: [u64; 2],
    intents: u64,
) -> GatewayPayload {
    GatewayPayload::command(
        opcode::IDENTIFY,
        Some(serde_json::json!({
            "token": bot_token(token),
            "properties": {
                "os": properties.os,
                "browser": properties.browser,
                "device": properties.device,
            },
            "shard": shard,
            "intents": intents,
        })),
    )
}

/// Build a Resume payload (`op=6`).
pub fn build_resume(token: &str, session_id: &str, sequence: u64) -> GatewayPayload {
    GatewayPayload::command(
        opcode::RESUME,
        Some(serde_json::json!({
            "token": bot_token(token),
            "session_id": session_id,
            "seq": sequence,
        })),
    )
}

/// Build a Heartbeat payload (`op=1`).
pub fn build_heartbeat(sequence: Option<u64>) -> GatewayPayload {
    GatewayPayload::command(opcode::HEARTBEAT, sequence.map(serde_json::Value::from))
}

/// Build a Presence Update payload (`op=3`).
pub fn build_presence_update(presence: serde_json::Value) -> GatewayPayload {
    GatewayPayload::command(opcode::PRESENCE_UPDATE, Some(presence))
}

/// Append the version/encoding query the gateway expects.
pub fn gateway_connect_url(base: &str, api_version: u8, encoding: &str) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{base}{separator}v={api_version}&encoding={encoding}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_unrecoverable_codes_match_gateway_fatal_set() {
        for code in [1005, 4004, 4010, 4011, 4012, 4013, 4014] {
            assert!(DEFAULT_UNRECOVERABLE_CLOSE_CODES.contains(&code), "{code}");
        }
        for code in [1000, 1001, 1006, 4000, 4001, 4002, 4007, 4009] {
            assert!(!DEFAULT_UNRECOVERABLE_CLOSE_CODES.contains(&code), "{code}");
        }
    }

    #[test]
    fn default_intents_value() {
        // GUILDS(1) | GUILD_MESSAGES(512)
        assert_eq!(DEFAULT_INTENTS, 513);
    }

    #[test]
    fn gateway_payload_minimal() {
        let json = r#"{"op":10,"d":{"heartbeat_interval":41250}}"#;
        let payload: GatewayPayload = serde_json::from_str(json).unwrap();
        assert_eq!(payload.op, opcode::HELLO);
        assert!(payload.s.is_none());
        assert!(payload.t.is_none());

        let hello: HelloPayload = serde_json::from_value(payload.d.unwrap()).unwrap();
        assert_eq!(hello.heartbeat_interval, 41250);
    }

    #[test]
    fn commands_omit_sequence_and_event_name() {
        let json = serde_json::to_string(&build_heartbeat(Some(7))).unwrap();
        assert_eq!(json, r#"{"op":1,"d":7}"#);

        let json = serde_json::to_string(&build_heartbeat(None)).unwrap();
        assert_eq!(json, r#"{"op":1,"d":null}"#);
    }

    #[test]
    fn build_identify_payload() {
        let props = IdentifyProperties {
            os: "linux".into(),
            browser: "arrakis".into(),
            device: "arrakis".into(),
        };
        let payload = build_identify("secret", &props, [2, 4], 513);
        assert_eq!(payload.op, opcode::IDENTIFY);
        let d = payload.d.unwrap();
        assert_eq!(d["token"], "Bot secret");
        assert_eq!(d["intents"], 513);
        assert_eq!(d["shard"], serde_json::json!([2, 4]));
        assert_eq!(d["properties"]["os"], "linux");
    }

    #[test]
    fn build_resume_payload() {
        let payload = build_resume("Bot tok", "sess-123", 42);
        assert_eq!(payload.op, opcode::RESUME);
        let d = payload.d.unwrap();
        assert_eq!(d["token"], "Bot tok");
        assert_eq!(d["session_id"], "sess-123");
        assert_eq!(d["seq"], 42);
    }

    #[test]
    fn ready_payload_tolerates_missing_optional_fields() {
        let json = serde_json::json!({
            "v": 10,
            "session_id": "abc123",
            "user": { "id": "42", "username": "arrakis" },
            "guilds": [{ "id": "1", "unavailable": true }, { "id": "2", "unavailable": true }]
        });
        let ready: ReadyPayload = serde_json::from_value(json).unwrap();
        assert_eq!(ready.session_id, "abc123");
        assert!(ready.resume_gateway_url.is_none());
        assert_eq!(ready.guilds.len(), 2);
        assert_eq!(ready.user["id"], "42");
    }

    #[test]
    fn connect_url_appends_query() {
        assert_eq!(
            gateway_connect_url("wss://gateway.discord.gg/", 10, "json"),
            "wss://gateway.discord.gg/?v=10&encoding=json"
        );
        assert_eq!(
            gateway_connect_url("wss://gw.example?compress=false", 10, "json"),
            "wss://gw.example?compress=false&v=10&encoding=json"
        );
    }

    #[test]
    fn bot_token_is_not_double_prefixed() {
        assert_eq!(bot_token("abc"), "Bot abc");
        assert_eq!(bot_token("Bot abc"), "Bot abc");
    }
}
