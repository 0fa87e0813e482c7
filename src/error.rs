//! Domain error types for the Arrakis client
//!
//! main.rs is the ONLY module allowed to use anyhow::Result (process boundary).
//! All library code returns Result<T, GatewayError>.

use crate::gateway::codec::CodecError;
use thiserror::Error;

/// Client domain errors
///
/// Every variant carries structured context fields for diagnostics.
/// On-call engineers can pattern-match on the variant to understand
/// the failure mode without parsing error message strings.
///
/// Example log output:
/// ```text
/// GatewayError::UnrecoverableClose { shard_id: 3, code: 4004 }
/// → "shard 3 closed with unrecoverable code 4004"
/// ```
#[derive(Error, Debug)]
pub enum GatewayError {
    /// Gateway closed the stream with a code from the unrecoverable set
    #[error("shard {shard_id} closed with unrecoverable code {code}")]
    UnrecoverableClose { shard_id: u64, code: u16 },

    /// WebSocket transport error (connect, send or receive)
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// Wire codec could not encode or decode a payload
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// HTTP transport failed before a response was received
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// REST API answered with a non-success status
    #[error("request on route '{route}' failed with status {status}")]
    Api {
        route: String,
        status: u16,
        body: String,
    },

    /// REST response body did not have the expected shape
    #[error("response on route '{route}' could not be decoded")]
    ResponseDecode {
        route: String,
        #[source]
        source: serde_json::Error,
    },

    /// Route queue worker is gone (runtime shutting down)
    #[error("route queue '{route}' is closed")]
    QueueClosed { route: String },

    /// Shard task is not running or no longer accepts commands
    #[error("shard {shard_id} is not accepting commands")]
    ShardUnavailable { shard_id: u64 },

    /// NATS publish failed for a specific subject
    #[error("NATS publish failed for subject '{subject}'")]
    NatsPublishFailed {
        subject: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// NATS connection failed
    #[error("NATS connection failed")]
    NatsConnectionFailed(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// JetStream stream could not be created or looked up
    #[error("NATS stream setup failed for '{stream}'")]
    NatsStreamSetup {
        stream: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Event serialization failed
    #[error("event serialization failed for {event_type} on shard {shard_id}")]
    SerializationFailed {
        event_type: String,
        shard_id: u64,
        #[source]
        source: serde_json::Error,
    },

    /// Configuration error (environment variable missing or invalid)
    #[error("configuration error: {0}")]
    Config(String),

    /// Prometheus recorder could not be installed
    #[error("metrics recorder installation failed")]
    MetricsInstall(#[source] metrics_exporter_prometheus::BuildError),
}

impl From<tokio_tungstenite::tungstenite::Error> for GatewayError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl GatewayError {
    /// Returns a static label string suitable for Prometheus metrics.
    ///
    /// Used as the `error_type` label on `gateway_errors_total` counter,
    /// enabling per-error-type monitoring and alerting.
    pub fn error_type_label(&self) -> &'static str {
        match self {
            Self::UnrecoverableClose { .. } => "unrecoverable_close",
            Self::WebSocket(_) => "websocket",
            Self::Codec(_) => "codec",
            Self::Http(_) => "http_transport",
            Self::Api { .. } => "api_status",
            Self::ResponseDecode { .. } => "response_decode",
            Self::QueueClosed { .. } => "queue_closed",
            Self::ShardUnavailable { .. } => "shard_unavailable",
            Self::NatsPublishFailed { .. } => "nats_publish",
            Self::NatsConnectionFailed(_) => "nats_connection",
            Self::NatsStreamSetup { .. } => "nats_stream_setup",
            Self::SerializationFailed { .. } => "serialization",
            Self::Config(_) => "config",
            Self::MetricsInstall(_) => "metrics_install",
        }
    }

    /// Returns true if the error ends the shard for good.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnrecoverableClose { .. })
    }
}
