//! Prometheus metrics module
//!
//! Shard lifecycle, event relay and REST dispatch metrics.

use crate::error::GatewayError;
use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram, Unit,
};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::sync::Arc;
use std::time::Duration;

/// Client metrics collector
///
/// Recording goes through the global `metrics` recorder, so a collector
/// built with [`GatewayMetrics::disabled`] records into the no-op recorder.
#[derive(Clone)]
pub struct GatewayMetrics {
    handle: Option<Arc<PrometheusHandle>>,
}

impl GatewayMetrics {
    /// Install the Prometheus recorder and register descriptions
    ///
    /// Fails if a global recorder is already installed.
    pub fn new() -> Result<Self, GatewayError> {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(GatewayError::MetricsInstall)?;

        Self::register_metrics();

        Ok(Self {
            handle: Some(Arc::new(handle)),
        })
    }

    /// Collector without an installed recorder (tests, embedding)
    pub fn disabled() -> Self {
        Self { handle: None }
    }

    /// Register metric descriptions
    fn register_metrics() {
        // Gateway counters
        describe_counter!(
            "gateway_events_received_total",
            Unit::Count,
            "Total dispatch events received from the gateway"
        );
        describe_counter!(
            "gateway_reconnects_total",
            Unit::Count,
            "Shard reconnects after a recoverable close"
        );
        describe_counter!(
            "gateway_errors_total",
            Unit::Count,
            "Total client errors by type"
        );
        describe_counter!(
            "gateway_events_routed_total",
            Unit::Count,
            "Total events relayed to NATS"
        );
        describe_counter!(
            "gateway_route_failures_total",
            Unit::Count,
            "Failed event relays to NATS"
        );

        // REST counters
        describe_counter!(
            "rest_requests_total",
            Unit::Count,
            "REST requests executed, by method and status"
        );
        describe_counter!(
            "rest_rate_limited_total",
            Unit::Count,
            "REST responses that exhausted their rate-limit bucket"
        );

        // Latency histograms
        describe_histogram!(
            "gateway_event_route_duration_seconds",
            Unit::Seconds,
            "Time to relay an event to NATS"
        );
        describe_histogram!(
            "rest_request_duration_seconds",
            Unit::Seconds,
            "REST request round-trip time"
        );

        // Gauges
        describe_gauge!(
            "gateway_shards_ready",
            Unit::Count,
            "Number of shards in ready state"
        );
        describe_gauge!(
            "gateway_guilds_total",
            Unit::Count,
            "Cached guilds per shard"
        );
        describe_gauge!(
            "gateway_nats_connected",
            Unit::Count,
            "NATS connection status (1=connected, 0=disconnected)"
        );
        describe_gauge!(
            "gateway_last_heartbeat_timestamp",
            Unit::Seconds,
            "Unix time of the last heartbeat ACK per shard"
        );
    }

    /// Record a dispatch event received
    pub fn record_event(&self, shard_id: u64, event_type: &str) {
        counter!(
            "gateway_events_received_total",
            "shard_id" => shard_id.to_string(),
            "event_type" => event_type.to_ascii_lowercase()
        )
        .increment(1);
    }

    /// Record a reconnect after a recoverable close
    pub fn record_reconnect(&self, shard_id: u64, code: u16) {
        counter!(
            "gateway_reconnects_total",
            "shard_id" => shard_id.to_string(),
            "close_code" => code.to_string()
        )
        .increment(1);
    }

    /// Record client error with type classification
    pub fn record_error(&self, shard_id: u64, error_type: &'static str) {
        counter!(
            "gateway_errors_total",
            "shard_id" => shard_id.to_string(),
            "error_type" => error_type
        )
        .increment(1);
    }

    /// Record successful relay to NATS
    pub fn record_route_success(&self, shard_id: u64, duration: Duration) {
        counter!(
            "gateway_events_routed_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);

        histogram!(
            "gateway_event_route_duration_seconds",
            "shard_id" => shard_id.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record failed relay
    pub fn record_route_failure(&self, shard_id: u64) {
        counter!(
            "gateway_route_failures_total",
            "shard_id" => shard_id.to_string()
        )
        .increment(1);
    }

    /// Record one executed REST request
    ///
    /// Labelled by method only: route keys embed ids and would explode
    /// label cardinality.
    pub fn record_rest_request(&self, method: &str, status: u16, duration: Duration) {
        counter!(
            "rest_requests_total",
            "method" => method.to_string(),
            "status" => status.to_string()
        )
        .increment(1);

        histogram!(
            "rest_request_duration_seconds",
            "method" => method.to_string()
        )
        .record(duration.as_secs_f64());
    }

    /// Record a response that exhausted its bucket
    pub fn record_rate_limited(&self, method: &str) {
        counter!(
            "rest_rate_limited_total",
            "method" => method.to_string()
        )
        .increment(1);
    }

    /// Record heartbeat
    pub fn record_heartbeat(&self, shard_id: u64) {
        // Heartbeats are frequent, just update a gauge
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map_or(0, |d| d.as_secs());
        gauge!(
            "gateway_last_heartbeat_timestamp",
            "shard_id" => shard_id.to_string()
        )
        .set(now as f64);
    }

    /// Set guild count for a shard
    pub fn set_guilds(&self, shard_id: u64, count: u64) {
        gauge!(
            "gateway_guilds_total",
            "shard_id" => shard_id.to_string()
        )
        .set(count as f64);
    }

    /// Set shards ready count
    pub fn set_shards_ready(&self, pool_id: u64, count: usize) {
        gauge!(
            "gateway_shards_ready",
            "pool_id" => pool_id.to_string()
        )
        .set(count as f64);
    }

    /// Set NATS connection status
    pub fn set_nats_connected(&self, connected: bool) {
        gauge!("gateway_nats_connected").set(if connected { 1.0 } else { 0.0 });
    }

    /// Render metrics in Prometheus format
    pub fn render(&self) -> String {
        self.handle
            .as_ref()
            .map(|handle| handle.render())
            .unwrap_or_default()
    }
}
