//! Scripted in-memory transports for integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use arrakis_client::error::GatewayError;
use arrakis_client::events::{EventReceiver, ShardEvent};
use arrakis_client::gateway::protocol::{opcode, GatewayPayload};
use arrakis_client::gateway::{
    GatewayStream, GatewayTransport, ShardConfig, ShardConnection, ShardHandle, StreamEvent,
};
use arrakis_client::rest::{ApiRequest, ApiResponse, RateLimitInfo, RequestTransport};
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Guard against a test hanging forever on a missing frame or event.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(600);

// ── Gateway ──────────────────────────────────────────────────

/// What the shard wrote to the mock stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientFrame {
    Payload(GatewayPayload),
    Close(u16),
}

/// Gateway transport that hands each accepted connection to the test.
pub struct MockGateway {
    accepted: mpsc::UnboundedSender<ServerConn>,
    connects: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerConn>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let gateway = Arc::new(Self {
            accepted: tx,
            connects: AtomicUsize::new(0),
        });
        (gateway, rx)
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl GatewayTransport for MockGateway {
    async fn connect(&self, url: &str) -> Result<Box<dyn GatewayStream>, GatewayError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.accepted.send(ServerConn {
            url: url.to_string(),
            to_client: Some(to_client),
            from_client,
        });
        Ok(Box::new(MockStream { inbound, outbound }))
    }
}

struct MockStream {
    inbound: mpsc::UnboundedReceiver<StreamEvent>,
    outbound: mpsc::UnboundedSender<ClientFrame>,
}

#[async_trait]
impl GatewayStream for MockStream {
    async fn send(&mut self, frame: Vec<u8>) -> Result<(), GatewayError> {
        let payload: GatewayPayload =
            serde_json::from_slice(&frame).expect("shard sent invalid JSON");
        let _ = self.outbound.send(ClientFrame::Payload(payload));
        Ok(())
    }

    async fn next_event(&mut self) -> Option<StreamEvent> {
        self.inbound.recv().await
    }

    async fn close(&mut self, code: u16) -> Result<(), GatewayError> {
        let _ = self.outbound.send(ClientFrame::Close(code));
        Ok(())
    }
}

/// Server end of one mock connection.
pub struct ServerConn {
    pub url: String,
    to_client: Option<mpsc::UnboundedSender<StreamEvent>>,
    from_client: mpsc::UnboundedReceiver<ClientFrame>,
}

impl ServerConn {
    pub fn send(&self, payload: GatewayPayload) {
        self.raw(serde_json::to_vec(&payload).unwrap());
    }

    pub fn raw(&self, frame: Vec<u8>) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(StreamEvent::Message(frame));
        }
    }

    pub fn hello(&self, heartbeat_interval_ms: u64) {
        self.send(GatewayPayload::command(
            opcode::HELLO,
            Some(json!({ "heartbeat_interval": heartbeat_interval_ms })),
        ));
    }

    pub fn dispatch(&self, event: &str, seq: u64, data: Value) {
        self.send(GatewayPayload::dispatch(event, seq, data));
    }

    pub fn ready(&self, seq: u64, session_id: &str, guild_ids: &[&str]) {
        let guilds: Vec<Value> = guild_ids
            .iter()
            .map(|id| json!({ "id": id, "unavailable": true }))
            .collect();
        self.dispatch(
            "READY",
            seq,
            json!({
                "v": 10,
                "session_id": session_id,
                "user": { "id": "111111111111111111", "username": "arrakis" },
                "guilds": guilds,
            }),
        );
    }

    pub fn guild_create(&self, seq: u64, id: &str, name: &str) {
        self.dispatch(
            "GUILD_CREATE",
            seq,
            json!({ "id": id, "name": name, "member_count": 10 }),
        );
    }

    pub fn ack(&self) {
        self.send(GatewayPayload::command(opcode::HEARTBEAT_ACK, None));
    }

    /// Peer close with a status code.
    pub fn close(&self, code: u16) {
        if let Some(tx) = &self.to_client {
            let _ = tx.send(StreamEvent::Close {
                code,
                reason: String::new(),
            });
        }
    }

    /// Drop the stream without a close frame.
    pub fn drop_stream(&mut self) {
        self.to_client = None;
    }

    /// Next frame the shard wrote, heartbeats included.
    pub async fn next_frame(&mut self) -> ClientFrame {
        tokio::time::timeout(STEP_TIMEOUT, self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client stream dropped")
    }

    /// Next payload with `op`, skipping heartbeats when looking for
    /// anything else. Panics on a close.
    pub async fn expect_op(&mut self, op: u8) -> GatewayPayload {
        loop {
            match self.next_frame().await {
                ClientFrame::Payload(p) if p.op == op => return p,
                ClientFrame::Payload(p) if p.op == opcode::HEARTBEAT => continue,
                other => panic!("expected op {op}, got {other:?}"),
            }
        }
    }

    pub async fn expect_close(&mut self) -> u16 {
        loop {
            match self.next_frame().await {
                ClientFrame::Close(code) => return code,
                ClientFrame::Payload(p) if p.op == opcode::HEARTBEAT => continue,
                other => panic!("expected close, got {other:?}"),
            }
        }
    }
}

pub async fn accept(accepted: &mut mpsc::UnboundedReceiver<ServerConn>) -> ServerConn {
    tokio::time::timeout(STEP_TIMEOUT, accepted.recv())
        .await
        .expect("timed out waiting for a connection")
        .expect("gateway transport dropped")
}

/// Shard config with instant reconnects.
pub fn shard_config() -> ShardConfig {
    let mut config = ShardConfig::new("test-token");
    config.gateway_url = "wss://gateway.test/".to_string();
    config.backoff_base_ms = 0;
    config.backoff_max_ms = 0;
    config
}

pub struct TestShard {
    pub handle: ShardHandle,
    pub events: EventReceiver,
    pub accepted: mpsc::UnboundedReceiver<ServerConn>,
    pub gateway: Arc<MockGateway>,
    pub task: JoinHandle<Result<(), GatewayError>>,
}

pub fn spawn_shard(config: ShardConfig) -> TestShard {
    let (gateway, accepted) = MockGateway::new();
    let (tx, events) = mpsc::unbounded_channel();
    let (shard, handle) = ShardConnection::new(0, config, gateway.clone(), tx);
    let task = tokio::spawn(shard.run());
    TestShard {
        handle,
        events,
        accepted,
        gateway,
        task,
    }
}

/// Next event that is not a debug line.
pub async fn next_event(events: &mut EventReceiver) -> ShardEvent {
    loop {
        let event = tokio::time::timeout(STEP_TIMEOUT, events.recv())
            .await
            .expect("timed out waiting for a shard event")
            .expect("event channel closed");
        if !matches!(event, ShardEvent::Debug { .. }) {
            return event;
        }
    }
}

// ── REST ─────────────────────────────────────────────────────

/// One request the mock API executed.
#[derive(Debug, Clone)]
pub struct Call {
    pub route: String,
    pub request: ApiRequest,
    pub label: Option<String>,
    pub at: Instant,
}

pub enum Reply {
    Respond(ApiResponse),
    Fail(&'static str),
}

/// Request transport with scripted per-route replies.
///
/// Unscripted requests get `200 {}` with a healthy bucket.
#[derive(Default)]
pub struct MockApi {
    scripts: Mutex<HashMap<String, VecDeque<Reply>>>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    latency: Duration,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn with_latency(latency: Duration) -> Arc<Self> {
        Arc::new(Self {
            latency,
            ..Self::default()
        })
    }

    pub fn script(&self, route: &str, reply: Reply) {
        self.scripts
            .lock()
            .unwrap()
            .entry(route.to_string())
            .or_default()
            .push_back(reply);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn labels(&self, route: &str) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.route == route)
            .filter_map(|c| c.label)
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RequestTransport for MockApi {
    async fn execute(&self, request: &ApiRequest) -> Result<ApiResponse, GatewayError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let route = request.route_key();
        self.calls.lock().unwrap().push(Call {
            route: route.clone(),
            request: request.clone(),
            label: request
                .body
                .as_ref()
                .and_then(|b| b.get("label"))
                .and_then(Value::as_str)
                .map(str::to_string),
            at: Instant::now(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let reply = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&route)
            .and_then(VecDeque::pop_front);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match reply {
            Some(Reply::Respond(response)) => Ok(response),
            Some(Reply::Fail(reason)) => Err(GatewayError::Config(reason.to_string())),
            None => Ok(ok(json!({}))),
        }
    }
}

pub fn ok(body: Value) -> ApiResponse {
    ApiResponse::new(200, body).with_rate_limit(RateLimitInfo {
        remaining: Some(4),
        reset_after: Some(Duration::from_secs(1)),
        bucket: Some("bucket".to_string()),
    })
}

/// 2xx response that drained the bucket.
pub fn drained(reset_after: Duration) -> ApiResponse {
    ApiResponse::new(200, json!({ "drained": true })).with_rate_limit(RateLimitInfo {
        remaining: Some(0),
        reset_after: Some(reset_after),
        bucket: Some("bucket".to_string()),
    })
}

pub fn too_many_requests(retry_after_secs: f64) -> ApiResponse {
    ApiResponse::new(
        429,
        json!({ "message": "You are being rate limited.", "retry_after": retry_after_secs }),
    )
}

pub fn labelled(path: &str, label: &str) -> ApiRequest {
    ApiRequest::post(path).with_body(json!({ "label": label }))
}
