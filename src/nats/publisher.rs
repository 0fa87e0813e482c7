//! NATS event publisher
//!
//! Publishes serialized shard events to NATS JetStream

use crate::error::GatewayError;
use crate::events::serialize::GatewayEvent;
use async_nats::jetstream::{self, Context as JsContext};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Stream names
pub mod streams {
    /// Commands stream for interactions
    pub const COMMANDS: &str = "COMMANDS";
    /// Events stream for guild/member/message/shard events
    pub const EVENTS: &str = "EVENTS";
}

/// Subject prefixes for routing
pub mod subjects {
    /// Interactions: commands.interaction
    pub const COMMANDS: &str = "commands";
    /// Guild events: events.guild.{event_type}
    pub const GUILD_EVENTS: &str = "events.guild";
    /// Member events: events.member.{event_type}
    pub const MEMBER_EVENTS: &str = "events.member";
    /// Message events: events.message.{event_type}
    pub const MESSAGE_EVENTS: &str = "events.message";
    /// Shard lifecycle: events.shard.{ready,loaded}
    pub const SHARD_EVENTS: &str = "events.shard";
}

/// NATS publisher for shard events
pub struct NatsPublisher {
    jetstream: JsContext,
    connected: AtomicBool,
    messages_published: AtomicU64,
    publish_failures: AtomicU64,
}

impl NatsPublisher {
    /// Connect to NATS server
    pub async fn connect(servers: &str) -> Result<Arc<Self>, GatewayError> {
        info!(servers, "Connecting to NATS");

        let client = async_nats::connect(servers)
            .await
            .map_err(|e| GatewayError::NatsConnectionFailed(Box::new(e)))?;

        let jetstream = jetstream::new(client);

        info!("Connected to NATS JetStream");

        Ok(Arc::new(Self {
            jetstream,
            connected: AtomicBool::new(true),
            messages_published: AtomicU64::new(0),
            publish_failures: AtomicU64::new(0),
        }))
    }

    /// Check if connected
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Get total messages published
    pub fn messages_published(&self) -> u64 {
        self.messages_published.load(Ordering::Relaxed)
    }

    /// Get total publish failures
    pub fn publish_failures(&self) -> u64 {
        self.publish_failures.load(Ordering::Relaxed)
    }

    /// Publish a shard event to the appropriate stream
    pub async fn publish_event(&self, event: &GatewayEvent) -> Result<(), GatewayError> {
        let subject = subject_for(&event.event_type);
        let payload = serde_json::to_vec(event).map_err(|source| GatewayError::SerializationFailed {
            event_type: event.event_type.clone(),
            shard_id: event.shard_id,
            source,
        })?;

        debug!(
            event_type = %event.event_type,
            subject = %subject,
            event_id = %event.event_id,
            "Publishing event"
        );

        let published = async {
            self.jetstream
                .publish(subject.clone(), payload.into())
                .await?
                .await
        }
        .await;

        match published {
            Ok(ack) => {
                self.messages_published.fetch_add(1, Ordering::Relaxed);
                debug!(
                    subject = %subject,
                    stream = %ack.stream,
                    seq = ack.sequence,
                    "Event published"
                );
                Ok(())
            }
            Err(e) => {
                self.publish_failures.fetch_add(1, Ordering::Relaxed);
                warn!(subject = %subject, error = %e, "Failed to publish event");
                Err(GatewayError::NatsPublishFailed {
                    subject,
                    source: Box::new(e),
                })
            }
        }
    }

    /// Ensure streams exist with correct configuration
    pub async fn ensure_streams(&self) -> Result<(), GatewayError> {
        use async_nats::jetstream::stream::{Config, RetentionPolicy, StorageType};

        // COMMANDS stream - memory storage, 60s retention for fast command processing
        // EVENTS stream - memory storage, 5min retention for event processing
        let configs = [
            (streams::COMMANDS, "commands.>", Duration::from_secs(60)),
            (streams::EVENTS, "events.>", Duration::from_secs(300)),
        ];

        for (name, subjects, max_age) in configs {
            let config = Config {
                name: name.to_string(),
                subjects: vec![subjects.to_string()],
                retention: RetentionPolicy::Limits,
                max_age,
                storage: StorageType::Memory,
                ..Default::default()
            };
            self.jetstream
                .get_or_create_stream(config)
                .await
                .map_err(|e| GatewayError::NatsStreamSetup {
                    stream: name.to_string(),
                    source: Box::new(e),
                })?;
            debug!(stream = name, "Stream ready");
        }

        info!("NATS streams configured");
        Ok(())
    }

    /// Graceful shutdown
    pub async fn close(&self) {
        info!("Closing NATS connection");
        self.connected.store(false, Ordering::SeqCst);
        // async-nats handles cleanup on drop
    }
}

/// Route event to a subject based on its dotted event type
pub fn subject_for(event_type: &str) -> String {
    match event_type {
        // Interactions go to COMMANDS stream
        "interaction.create" => format!("{}.interaction", subjects::COMMANDS),

        // Guild events go to EVENTS stream
        "guild.join" => format!("{}.join", subjects::GUILD_EVENTS),
        "guild.leave" => format!("{}.leave", subjects::GUILD_EVENTS),
        "guild.update" => format!("{}.update", subjects::GUILD_EVENTS),

        // Member events go to EVENTS stream
        "member.join" => format!("{}.join", subjects::MEMBER_EVENTS),
        "member.leave" => format!("{}.leave", subjects::MEMBER_EVENTS),
        "member.update" => format!("{}.update", subjects::MEMBER_EVENTS),

        "message.create" => format!("{}.create", subjects::MESSAGE_EVENTS),
        "message.update" => format!("{}.update", subjects::MESSAGE_EVENTS),
        "message.delete" => format!("{}.delete", subjects::MESSAGE_EVENTS),

        "shard.ready" => format!("{}.ready", subjects::SHARD_EVENTS),
        "shard.loaded" => format!("{}.loaded", subjects::SHARD_EVENTS),

        // Default: generic event
        other => format!("events.{}", other.replace('.', "_")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_route_interaction() {
        assert_eq!(subject_for("interaction.create"), "commands.interaction");
    }

    #[test]
    fn test_route_events() {
        assert_eq!(subject_for("guild.join"), "events.guild.join");
        assert_eq!(subject_for("member.leave"), "events.member.leave");
        assert_eq!(subject_for("message.create"), "events.message.create");
        assert_eq!(subject_for("shard.loaded"), "events.shard.loaded");
        assert_eq!(subject_for("dispatch.typing_start"), "events.dispatch_typing_start");
    }

    #[test]
    fn test_stream_constants() {
        assert_eq!(streams::COMMANDS, "COMMANDS");
        assert_eq!(streams::EVENTS, "EVENTS");
    }
}
