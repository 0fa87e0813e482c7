//! NATS JetStream integration
//!
//! Optional relay of shard events to NATS streams.

mod publisher;

pub use publisher::{streams, subject_for, subjects, NatsPublisher};
