//! Lazily spawned route queues keyed by route.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use super::queue::{QueueConfig, RouteQueue};
use super::route::{ApiRequest, ApiResponse};
use super::transport::RequestTransport;
use crate::error::GatewayError;

/// One [`RouteQueue`] per route key, created on first use and never evicted.
#[derive(Clone)]
pub struct RouteRegistry {
    queues: Arc<DashMap<String, RouteQueue>>,
    transport: Arc<dyn RequestTransport>,
    config: QueueConfig,
    metrics: crate::metrics::GatewayMetrics,
}

impl RouteRegistry {
    pub fn new(transport: Arc<dyn RequestTransport>, config: QueueConfig) -> Self {
        Self {
            queues: Arc::new(DashMap::new()),
            transport,
            config,
            metrics: crate::metrics::GatewayMetrics::disabled(),
        }
    }

    pub fn with_metrics(mut self, metrics: crate::metrics::GatewayMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Cached queue for `route`, spawning its worker on first use.
    pub fn resolve(&self, route: &str) -> RouteQueue {
        if let Some(queue) = self.queues.get(route) {
            return queue.value().clone();
        }
        self.queues
            .entry(route.to_string())
            .or_insert_with(|| {
                debug!(route, "Spawning route queue");
                RouteQueue::spawn(
                    route,
                    Arc::clone(&self.transport),
                    self.config,
                    self.metrics.clone(),
                )
            })
            .value()
            .clone()
    }

    /// Route `request` to its queue and wait for the outcome.
    pub async fn submit(&self, request: ApiRequest) -> Result<ApiResponse, GatewayError> {
        let queue = self.resolve(&request.route_key());
        queue.submit(request).await
    }

    pub fn len(&self) -> usize {
        self.queues.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }

    /// Routes with a request in flight.
    pub fn busy_routes(&self) -> usize {
        self.queues.iter().filter(|e| e.value().is_busy()).count()
    }

    /// Known route keys, sorted.
    pub fn routes(&self) -> Vec<String> {
        let mut routes: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        routes.sort();
        routes
    }
}
