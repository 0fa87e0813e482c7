//! Client configuration module
//!
//! Handles loading configuration from environment variables.

use crate::error::GatewayError;
use crate::gateway::protocol::{DEFAULT_INTENTS, DEFAULT_UNRECOVERABLE_CLOSE_CODES};
use crate::gateway::ShardConfig;
use crate::rest::{ExhaustedPolicy, QueueConfig};
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Default gateway endpoint
pub const GATEWAY_URL: &str = "wss://gateway.discord.gg/";

/// Default REST API base
pub const API_URL: &str = "https://discord.com/api/v10/";

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Discord bot token
    pub discord_token: String,

    /// Pool ID for this process (0-indexed)
    /// Each pool manages SHARDS_PER_POOL shards
    pub pool_id: u64,

    /// Total number of shards across all pools
    pub total_shards: u64,

    /// Gateway WebSocket endpoint
    pub gateway_url: String,

    /// REST API base URL
    pub api_url: String,

    /// Gateway API version sent in the connect query
    pub api_version: u8,

    /// Gateway intents bitmask
    pub intents: u64,

    /// Emit free-text debug events to subscribers
    pub debug: bool,

    /// Close codes that terminate a shard instead of reconnecting
    pub unrecoverable_close_codes: Vec<u16>,

    /// Reconnect backoff base (milliseconds)
    pub reconnect_backoff_base_ms: u64,

    /// Reconnect backoff cap (milliseconds)
    pub reconnect_backoff_max_ms: u64,

    /// What a route does with a response that exhausted its bucket
    pub rate_limit_policy: ExhaustedPolicy,

    /// Exhausted retries per request before the last response is delivered
    pub max_exhausted_retries: u32,

    /// Delay between a fatal close and process exit, to flush logs
    pub fatal_exit_grace_ms: u64,

    /// NATS server URL(s) - comma-separated for multiple servers
    pub nats_url: Option<String>,

    /// Health/metrics HTTP port
    pub http_port: u16,

    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
}

impl ClientConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, GatewayError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, GatewayError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let discord_token = lookup("DISCORD_TOKEN")
            .or_else(|| lookup("DISCORD_BOT_TOKEN"))
            .ok_or_else(|| {
                GatewayError::Config("DISCORD_TOKEN or DISCORD_BOT_TOKEN must be set".to_string())
            })?;

        let pool_id = parse_or(&lookup, "POOL_ID", 0)?;
        let total_shards: u64 = parse_or(&lookup, "TOTAL_SHARDS", 1)?;
        if total_shards == 0 {
            return Err(GatewayError::Config("TOTAL_SHARDS must be at least 1".to_string()));
        }

        let unrecoverable_close_codes = match lookup("UNRECOVERABLE_CLOSE_CODES") {
            Some(raw) => parse_code_list(&raw)?,
            None => DEFAULT_UNRECOVERABLE_CLOSE_CODES.to_vec(),
        };

        let rate_limit_policy = match lookup("RATE_LIMIT_POLICY") {
            Some(raw) => raw.parse().map_err(GatewayError::Config)?,
            None => ExhaustedPolicy::default(),
        };

        Ok(Self {
            discord_token,
            pool_id,
            total_shards,
            gateway_url: lookup("GATEWAY_URL").unwrap_or_else(|| GATEWAY_URL.to_string()),
            api_url: lookup("API_URL").unwrap_or_else(|| API_URL.to_string()),
            api_version: parse_or(&lookup, "API_VERSION", 10)?,
            intents: parse_or(&lookup, "INTENTS", DEFAULT_INTENTS)?,
            debug: parse_bool(&lookup, "DEBUG")?,
            unrecoverable_close_codes,
            reconnect_backoff_base_ms: parse_or(&lookup, "RECONNECT_BACKOFF_BASE_MS", 1000)?,
            reconnect_backoff_max_ms: parse_or(&lookup, "RECONNECT_BACKOFF_MAX_MS", 60_000)?,
            rate_limit_policy,
            max_exhausted_retries: parse_or(&lookup, "MAX_EXHAUSTED_RETRIES", 5)?,
            fatal_exit_grace_ms: parse_or(&lookup, "FATAL_EXIT_GRACE_MS", 1000)?,
            nats_url: lookup("NATS_URL"),
            http_port: parse_or(&lookup, "HTTP_PORT", 9090)?,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        })
    }

    /// Per-shard settings derived from this config
    pub fn shard_config(&self) -> ShardConfig {
        ShardConfig {
            token: self.discord_token.clone(),
            gateway_url: self.gateway_url.clone(),
            api_version: self.api_version,
            intents: self.intents,
            total_shards: self.total_shards,
            debug: self.debug,
            unrecoverable_close_codes: self.unrecoverable_close_codes.clone(),
            backoff_base_ms: self.reconnect_backoff_base_ms,
            backoff_max_ms: self.reconnect_backoff_max_ms,
            properties: Default::default(),
        }
    }

    /// Route queue settings derived from this config
    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            policy: self.rate_limit_policy,
            max_exhausted_retries: self.max_exhausted_retries,
        }
    }

    pub fn fatal_exit_grace(&self) -> Duration {
        Duration::from_millis(self.fatal_exit_grace_ms)
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, GatewayError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| GatewayError::Config(format!("{key} is invalid: {e}"))),
        None => Ok(default),
    }
}

fn parse_bool<F>(lookup: &F, key: &str) -> Result<bool, GatewayError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None | Some("") => Ok(false),
        Some("1" | "true" | "yes" | "on") => Ok(true),
        Some("0" | "false" | "no" | "off") => Ok(false),
        Some(other) => Err(GatewayError::Config(format!(
            "{key} must be a boolean, got '{other}'"
        ))),
    }
}

fn parse_code_list(raw: &str) -> Result<Vec<u16>, GatewayError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse().map_err(|e| {
                GatewayError::Config(format!(
                    "UNRECOVERABLE_CLOSE_CODES entry '{s}' is invalid: {e}"
                ))
            })
        })
        .collect()
}
