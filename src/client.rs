//! Client orchestrator
//!
//! Owns this pool's shard tasks and the REST dispatcher, and merges every
//! shard's events onto one receiver.

use std::ops::Range;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::ClientConfig;
use crate::error::GatewayError;
use crate::events::{EventReceiver, EventSender};
use crate::gateway::{
    GatewayTransport, GuildRecord, ShardConnection, ShardHandle, ShardState, WebSocketTransport,
};
use crate::metrics::GatewayMetrics;
use crate::rest::{HttpTransport, RequestTransport, RestClient, RouteRegistry};

/// Number of shards per client process (pool)
pub const SHARDS_PER_POOL: u64 = 25;

/// Shard ids owned by `pool_id`.
pub fn pool_shard_range(pool_id: u64, total_shards: u64) -> Range<u64> {
    let start = pool_id.saturating_mul(SHARDS_PER_POOL).min(total_shards);
    let end = pool_id
        .saturating_add(1)
        .saturating_mul(SHARDS_PER_POOL)
        .min(total_shards);
    start..end
}

/// Gateway shards plus REST dispatcher for one pool.
pub struct Client {
    config: ClientConfig,
    gateway: Arc<dyn GatewayTransport>,
    rest: RestClient,
    metrics: GatewayMetrics,
    state: ShardState,
    shards: Vec<ShardHandle>,
    tasks: JoinSet<(u64, Result<(), GatewayError>)>,
    event_tx: EventSender,
    event_rx: Option<EventReceiver>,
}

impl Client {
    /// Production client: WebSocket gateway and HTTP REST.
    pub fn new(config: ClientConfig, metrics: GatewayMetrics) -> Result<Self, GatewayError> {
        let http = HttpTransport::new(&config.api_url, &config.discord_token)?;
        Ok(Self::with_transports(
            config,
            Arc::new(WebSocketTransport),
            Arc::new(http),
            metrics,
        ))
    }

    /// Client over arbitrary transports.
    pub fn with_transports(
        config: ClientConfig,
        gateway: Arc<dyn GatewayTransport>,
        requests: Arc<dyn RequestTransport>,
        metrics: GatewayMetrics,
    ) -> Self {
        let registry =
            RouteRegistry::new(requests, config.queue_config()).with_metrics(metrics.clone());
        let range = pool_shard_range(config.pool_id, config.total_shards);
        let state = ShardState::new(config.pool_id, range, config.total_shards);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            rest: RestClient::from_registry(registry),
            config,
            gateway,
            metrics,
            state,
            shards: Vec::new(),
            tasks: JoinSet::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Spawn one task per shard in this pool. Calling it again is a no-op.
    pub fn connect(&mut self) {
        if !self.shards.is_empty() {
            warn!(pool_id = self.config.pool_id, "Client already connected");
            return;
        }

        let range = pool_shard_range(self.config.pool_id, self.config.total_shards);
        info!(
            pool_id = self.config.pool_id,
            start_shard = range.start,
            end_shard = range.end,
            shard_count = range.end - range.start,
            "Starting shard pool"
        );

        for shard_id in range {
            let (shard, handle) = ShardConnection::new(
                shard_id,
                self.config.shard_config(),
                Arc::clone(&self.gateway),
                self.event_tx.clone(),
            );
            let shard = shard
                .with_state(self.state.clone())
                .with_metrics(self.metrics.clone());

            self.tasks
                .spawn(async move { (shard_id, shard.run().await) });
            self.shards.push(handle);
        }
    }

    /// The merged event receiver. `None` after the first call.
    pub fn take_events(&mut self) -> Option<EventReceiver> {
        self.event_rx.take()
    }

    pub fn rest(&self) -> &RestClient {
        &self.rest
    }

    pub fn shards(&self) -> &[ShardHandle] {
        &self.shards
    }

    pub fn shard(&self, shard_id: u64) -> Option<&ShardHandle> {
        self.shards.iter().find(|h| h.shard_id() == shard_id)
    }

    /// Shared shard health table (for health checks)
    pub fn state(&self) -> ShardState {
        self.state.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Send the same presence update to every shard.
    ///
    /// Every shard is attempted; the first failure is returned.
    pub fn set_all_status(&self, presence: Value) -> Result<(), GatewayError> {
        let mut first_error = None;
        for handle in &self.shards {
            if let Err(err) = handle.update_presence(presence.clone()) {
                warn!(shard_id = handle.shard_id(), error = %err, "Presence update not delivered");
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Guild cache snapshots of all live shards, concatenated.
    pub async fn guilds(&self) -> Result<Vec<GuildRecord>, GatewayError> {
        let mut all = Vec::new();
        for handle in &self.shards {
            all.extend(handle.guilds().await?);
        }
        Ok(all)
    }

    /// Ask every shard to close.
    pub fn shutdown(&self) {
        info!(pool_id = self.config.pool_id, "Shutting down shard pool");
        for handle in &self.shards {
            handle.shutdown();
        }
    }

    /// Wait for every shard task. Returns the first unrecoverable close.
    pub async fn join(&mut self) -> Result<(), GatewayError> {
        let mut first_error = None;
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((shard_id, Err(err))) => {
                    error!(shard_id, error = %err, "Shard task failed");
                    first_error.get_or_insert(err);
                }
                Ok((shard_id, Ok(()))) => info!(shard_id, "Shard task finished"),
                Err(join_err) => error!(error = %join_err, "Shard task panicked"),
            }
        }
        info!(pool_id = self.config.pool_id, "Shard pool shut down");
        first_error.map_or(Ok(()), Err)
    }
}
