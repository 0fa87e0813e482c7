//! Arrakis Client - Discord gateway shards and rate-limited REST dispatch
//!
//! - Shard connection lifecycle: handshake, heartbeat liveness, resume
//! - Per-route serialized REST requests with server-driven backoff
//! - Typed shard events merged onto one channel
//! - Optional NATS relay, health endpoints and Prometheus metrics

pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod health;
pub mod metrics;
pub mod nats;
pub mod rest;

pub use client::Client;
pub use config::ClientConfig;
pub use error::GatewayError;
pub use events::ShardEvent;
