//! Process health surface
//!
//! `/health` for liveness, `/ready` for routing traffic, `/shards` and
//! `/routes` for per-shard and per-route inspection, `/metrics` for
//! Prometheus.

use crate::gateway::{ShardState, ShardStatus};
use crate::metrics::GatewayMetrics;
use crate::nats::NatsPublisher;
use crate::rest::RouteRegistry;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

/// Liveness body
#[derive(Debug, Serialize)]
pub struct LivenessResponse {
    /// `ok`, or `degraded` once any shard is dead
    pub status: &'static str,
    pub version: &'static str,
    pub pool_id: u64,
    pub shards_dead: usize,
}

/// Readiness body
#[derive(Debug, Serialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    pub pool_id: u64,
    pub total_shards: u64,
    pub shards_in_pool: usize,
    pub shards_ready: usize,
    pub shards_dead: usize,
    pub nats_connected: Option<bool>,
    pub guilds_cached: u64,
}

/// Per-shard listing
#[derive(Debug, Serialize)]
pub struct ShardsResponse {
    pub pool_id: u64,
    pub shards: Vec<ShardStatus>,
}

/// Known REST routes
#[derive(Debug, Serialize)]
pub struct RoutesResponse {
    pub routes: Vec<String>,
    pub busy: usize,
}

/// Everything the handlers read
#[derive(Clone)]
pub struct AppState {
    pub shard_state: ShardState,
    pub routes: RouteRegistry,
    pub nats: Option<Arc<NatsPublisher>>,
    pub metrics: GatewayMetrics,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(liveness))
        .route("/ready", get(readiness))
        .route("/shards", get(shards))
        .route("/routes", get(routes))
        .route("/metrics", get(prometheus))
        .with_state(state)
}

/// Always 200 while the process serves requests.
async fn liveness(State(state): State<AppState>) -> impl IntoResponse {
    let shards_dead = state.shard_state.dead_shards();
    Json(LivenessResponse {
        status: if shards_dead == 0 { "ok" } else { "degraded" },
        version: env!("CARGO_PKG_VERSION"),
        pool_id: state.shard_state.pool_id(),
        shards_dead,
    })
}

/// 200 when a shard is ready, none is dead, and NATS (if configured) is up.
async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let shards = &state.shard_state;
    let nats_connected = state.nats.as_ref().map(|n| n.is_connected());
    let shards_dead = shards.dead_shards();
    let ready = shards.is_ready() && shards_dead == 0 && nats_connected.unwrap_or(true);

    let body = ReadinessResponse {
        ready,
        pool_id: shards.pool_id(),
        total_shards: shards.total_shards(),
        shards_in_pool: shards.shard_count(),
        shards_ready: shards.ready_shards(),
        shards_dead,
        nats_connected,
        guilds_cached: shards.total_guilds(),
    };
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body))
}

async fn shards(State(state): State<AppState>) -> impl IntoResponse {
    Json(ShardsResponse {
        pool_id: state.shard_state.pool_id(),
        shards: state.shard_state.shards(),
    })
}

async fn routes(State(state): State<AppState>) -> impl IntoResponse {
    Json(RoutesResponse {
        routes: state.routes.routes(),
        busy: state.routes.busy_routes(),
    })
}

async fn prometheus(State(state): State<AppState>) -> impl IntoResponse {
    state
        .metrics
        .set_shards_ready(state.shard_state.pool_id(), state.shard_state.ready_shards());
    if let Some(nats) = &state.nats {
        state.metrics.set_nats_connected(nats.is_connected());
    }

    (
        StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        state.metrics.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ShardHealth;
    use crate::rest::{ApiRequest, ApiResponse, QueueConfig, RequestTransport};
    use crate::GatewayError;
    use async_trait::async_trait;
    use axum::body::to_bytes;
    use serde_json::Value;

    struct NoContent;

    #[async_trait]
    impl RequestTransport for NoContent {
        async fn execute(&self, _request: &ApiRequest) -> Result<ApiResponse, GatewayError> {
            Ok(ApiResponse::new(204, Value::Null))
        }
    }

    fn app_state() -> AppState {
        AppState {
            shard_state: ShardState::new(0, 0..2, 2),
            routes: RouteRegistry::new(Arc::new(NoContent), QueueConfig::default()),
            nats: None,
            metrics: GatewayMetrics::disabled(),
        }
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn ready_needs_a_ready_shard_and_no_dead_ones() {
        let state = app_state();
        let response = readiness(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        state.shard_state.set_health(1, ShardHealth::Ready);
        let response = readiness(State(state.clone())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["shards_ready"], 1);
        assert_eq!(body["nats_connected"], Value::Null);

        state.shard_state.set_health(0, ShardHealth::Dead);
        let response = readiness(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn liveness_reports_degraded_after_a_dead_shard() {
        let state = app_state();
        let body = body_json(liveness(State(state.clone())).await.into_response()).await;
        assert_eq!(body["status"], "ok");

        state.shard_state.set_health(0, ShardHealth::Dead);
        let response = liveness(State(state)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "degraded");
        assert_eq!(body["shards_dead"], 1);
    }

    #[tokio::test]
    async fn shards_lists_close_bookkeeping() {
        let state = app_state();
        state.shard_state.record_close(1, 1006);
        let body = body_json(shards(State(state)).await.into_response()).await;
        assert_eq!(body["shards"][1]["shard_id"], 1);
        assert_eq!(body["shards"][1]["last_close_code"], 1006);
        assert_eq!(body["shards"][1]["reconnects"], 1);
        assert_eq!(body["shards"][0]["health"], "connecting");
    }

    #[tokio::test]
    async fn routes_lists_resolved_queues() {
        let state = app_state();
        state
            .routes
            .submit(ApiRequest::delete("users/@me/guilds/1"))
            .await
            .unwrap();
        let body = body_json(routes(State(state)).await.into_response()).await;
        assert_eq!(body["routes"][0], "DELETE users/@me/guilds/1");
        assert_eq!(body["busy"], 0);
    }

    #[tokio::test]
    async fn metrics_render_without_recorder() {
        let response = prometheus(State(app_state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
