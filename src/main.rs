//! Arrakis Client - Discord gateway shard pool with REST dispatch
//!
//! This process:
//! - Runs one pool of gateway shards (identify, heartbeat, resume)
//! - Relays shard events to NATS JetStream when configured
//! - Exposes health/ready endpoints for Kubernetes
//! - Exports Prometheus metrics for observability

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::signal;
use tracing::{debug, error, info, warn};

use arrakis_client::events::{serialize_event, EventReceiver};
use arrakis_client::health::{self, AppState};
use arrakis_client::metrics::GatewayMetrics;
use arrakis_client::nats::NatsPublisher;
use arrakis_client::{Client, ClientConfig, GatewayError, ShardEvent};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first to get log level
    let config = ClientConfig::from_env()?;

    // Initialize tracing with configured log level
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("arrakis_client={}", config.log_level).parse()?)
                .add_directive("tungstenite=info".parse()?)
                .add_directive("tokio_tungstenite=info".parse()?)
                .add_directive("async_nats=warn".parse()?),
        )
        .json()
        .init();

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pool_id = config.pool_id,
        total_shards = config.total_shards,
        intents = config.intents,
        "Starting Arrakis client"
    );

    // Initialize metrics
    let metrics = GatewayMetrics::new()?;
    info!("Prometheus metrics initialized");

    // Connect to NATS if configured
    let nats = if let Some(ref url) = config.nats_url {
        match NatsPublisher::connect(url).await {
            Ok(publisher) => {
                if let Err(e) = publisher.ensure_streams().await {
                    warn!(error = %e, "NATS streams not configured");
                }
                metrics.set_nats_connected(true);
                Some(publisher)
            }
            Err(e) => {
                error!(error = %e, "Failed to connect to NATS - running in local mode");
                metrics.set_nats_connected(false);
                None
            }
        }
    } else {
        info!("No NATS_URL configured - running in local mode");
        None
    };

    let mut client = Client::new(config.clone(), metrics.clone())?;

    match client.rest().get_gateway_bot().await {
        Ok(bot) => info!(
            url = %bot.url,
            recommended_shards = ?bot.shards,
            configured_shards = config.total_shards,
            "Gateway info"
        ),
        Err(e) => warn!(error = %e, "Could not fetch gateway info"),
    }

    let mut events = client
        .take_events()
        .context("event receiver already taken")?;
    client.connect();

    // Start health server
    let app_state = AppState {
        shard_state: client.state(),
        routes: client.rest().registry().clone(),
        nats: nats.clone(),
        metrics: metrics.clone(),
    };

    let health_router = health::router(app_state);
    let addr: SocketAddr = ([0, 0, 0, 0], config.http_port).into();

    info!(port = config.http_port, "Starting HTTP server");

    let http_server = axum::serve(
        tokio::net::TcpListener::bind(addr).await?,
        health_router,
    );

    // Run everything concurrently
    let fatal = tokio::select! {
        fatal = relay_events(&mut events, nats.clone(), &metrics) => fatal,
        result = http_server => {
            if let Err(e) = result {
                error!(error = %e, "HTTP server error");
            }
            None
        }
        _ = shutdown_signal() => {
            info!("Shutdown signal received");
            None
        }
    };

    // Graceful shutdown
    info!("Shutting down client...");
    client.shutdown();
    if let Err(e) = client.join().await {
        debug!(error = %e, "Shard pool ended with error");
    }

    if let Some(ref nats) = nats {
        nats.close().await;
    }

    if let Some(err) = fatal {
        // Let the log pipeline flush before the supervisor restarts us
        tokio::time::sleep(config.fatal_exit_grace()).await;
        return Err(err.into());
    }

    info!("Client shutdown complete");
    Ok(())
}

/// Log, count and relay shard events until one shard dies
async fn relay_events(
    events: &mut EventReceiver,
    nats: Option<Arc<NatsPublisher>>,
    metrics: &GatewayMetrics,
) -> Option<GatewayError> {
    while let Some(event) = events.recv().await {
        let shard_id = event.shard_id();
        match &event {
            ShardEvent::Fatal { code, .. } => {
                error!(shard_id, code, "Shard terminated, exiting");
                return Some(GatewayError::UnrecoverableClose {
                    shard_id,
                    code: *code,
                });
            }
            ShardEvent::Debug { message, .. } => {
                debug!(shard_id, message = %message, "Shard debug");
                continue;
            }
            other => debug!(shard_id, event = other.name(), "Shard event"),
        }

        // Route event to NATS if available
        let Some(ref nats) = nats else { continue };
        let Some(payload) = serialize_event(&event) else { continue };

        let start = Instant::now();
        match nats.publish_event(&payload).await {
            Ok(()) => metrics.record_route_success(shard_id, start.elapsed()),
            Err(e) => {
                metrics.record_route_failure(shard_id);
                metrics.record_error(shard_id, e.error_type_label());
                warn!(shard_id, error = %e, "Failed to publish event to NATS");
            }
        }
    }
    None
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
