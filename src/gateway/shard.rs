//! Shard connection lifecycle.
//!
//! A [`ShardConnection`] owns one duplex stream at a time and drives it
//! through handshake, heartbeat liveness and recovery. The task is the only
//! writer of its session, sequence and guild cache; everything else talks
//! to it through a [`ShardHandle`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, trace, warn};

use super::backoff::Backoff;
use super::codec::{Codec, JsonCodec};
use super::guilds::{GuildAvailability, GuildAvailabilityTracker, GuildCache, GuildRecord};
use super::heartbeat::{Beat, Heartbeat};
use super::protocol::{
    self, close_code, opcode, GatewayPayload, GuildCreatePayload, HelloPayload, IdentifyProperties,
    ReadyPayload,
};
use super::state::{ShardHealth, ShardState};
use super::transport::{GatewayStream, GatewayTransport, StreamEvent};
use crate::error::GatewayError;
use crate::events::{EventSender, ShardEvent};

/// Dispatch types forwarded untouched as [`ShardEvent::Dispatch`].
pub const PASS_THROUGH_EVENTS: &[&str] = &[
    "GUILD_UPDATE",
    "GUILD_DELETE",
    "GUILD_MEMBER_ADD",
    "GUILD_MEMBER_REMOVE",
    "GUILD_MEMBER_UPDATE",
    "MESSAGE_UPDATE",
    "MESSAGE_DELETE",
    "INTERACTION_CREATE",
];

/// Normal closure, used when the shard is shut down locally.
const NORMAL_CLOSURE: u16 = 1000;

/// Where a shard is in its connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardStage {
    Disconnected,
    Connecting,
    AwaitingHello,
    Identifying,
    Resuming,
    Active,
    Closing,
    Reconnecting,
    Terminated,
}

impl fmt::Display for ShardStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::AwaitingHello => "awaiting_hello",
            Self::Identifying => "identifying",
            Self::Resuming => "resuming",
            Self::Active => "active",
            Self::Closing => "closing",
            Self::Reconnecting => "reconnecting",
            Self::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Per-shard connection settings.
#[derive(Debug, Clone)]
pub struct ShardConfig {
    pub token: String,
    pub gateway_url: String,
    pub api_version: u8,
    pub intents: u64,
    pub total_shards: u64,
    pub debug: bool,
    pub unrecoverable_close_codes: Vec<u16>,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub properties: IdentifyProperties,
}

impl ShardConfig {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            gateway_url: crate::config::GATEWAY_URL.to_string(),
            api_version: 10,
            intents: protocol::DEFAULT_INTENTS,
            total_shards: 1,
            debug: false,
            unrecoverable_close_codes: protocol::DEFAULT_UNRECOVERABLE_CLOSE_CODES.to_vec(),
            backoff_base_ms: 1000,
            backoff_max_ms: 60_000,
            properties: IdentifyProperties::default(),
        }
    }

    pub fn is_unrecoverable(&self, code: u16) -> bool {
        self.unrecoverable_close_codes.contains(&code)
    }
}

/// Requests a running shard task accepts.
#[derive(Debug)]
pub enum ShardCommand {
    /// Send a presence update (op 3) on the live stream.
    UpdatePresence(Value),
    /// Reply with a snapshot of the guild cache.
    Guilds(oneshot::Sender<Vec<GuildRecord>>),
    /// Close the stream and end the task.
    Shutdown,
}

/// Cloneable handle to a running [`ShardConnection`].
#[derive(Debug, Clone)]
pub struct ShardHandle {
    shard_id: u64,
    commands: mpsc::UnboundedSender<ShardCommand>,
}

impl ShardHandle {
    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    /// Queue a presence update. Dropped if the shard is between connections.
    pub fn update_presence(&self, presence: Value) -> Result<(), GatewayError> {
        self.send(ShardCommand::UpdatePresence(presence))
    }

    /// Snapshot of the shard's guild cache.
    pub async fn guilds(&self) -> Result<Vec<GuildRecord>, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.send(ShardCommand::Guilds(tx))?;
        rx.await.map_err(|_| GatewayError::ShardUnavailable {
            shard_id: self.shard_id,
        })
    }

    /// Ask the shard to close and stop. No-op if it already stopped.
    pub fn shutdown(&self) {
        let _ = self.commands.send(ShardCommand::Shutdown);
    }

    fn send(&self, command: ShardCommand) -> Result<(), GatewayError> {
        self.commands
            .send(command)
            .map_err(|_| GatewayError::ShardUnavailable {
                shard_id: self.shard_id,
            })
    }
}

/// Why one connection ended.
#[derive(Debug)]
enum SessionEnd {
    /// Stream closed (by the peer or by us) with this code.
    Closed { code: u16 },
    /// Transport could not open a stream.
    ConnectFailed(GatewayError),
    /// Local shutdown requested.
    Shutdown,
}

/// One gateway shard.
pub struct ShardConnection {
    shard_id: u64,
    config: ShardConfig,
    transport: Arc<dyn GatewayTransport>,
    codec: Arc<dyn Codec>,
    events: EventSender,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    state: ShardState,
    metrics: crate::metrics::GatewayMetrics,

    stage: ShardStage,
    session_id: Option<String>,
    sequence: Option<u64>,
    resume_url: Option<String>,
    resuming: bool,
    user: Option<Value>,
    heartbeat: Heartbeat,
    backoff: Backoff,
    tracker: GuildAvailabilityTracker,
    guilds: GuildCache,
}

impl ShardConnection {
    /// Create a shard and the handle used to command it.
    pub fn new(
        shard_id: u64,
        config: ShardConfig,
        transport: Arc<dyn GatewayTransport>,
        events: EventSender,
    ) -> (Self, ShardHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let state = ShardState::new(0, std::iter::once(shard_id), config.total_shards);
        let backoff = Backoff::new(config.backoff_base_ms, config.backoff_max_ms);

        let shard = Self {
            shard_id,
            config,
            transport,
            codec: Arc::new(JsonCodec),
            events,
            commands: rx,
            state,
            metrics: crate::metrics::GatewayMetrics::disabled(),
            stage: ShardStage::Disconnected,
            session_id: None,
            sequence: None,
            resume_url: None,
            resuming: false,
            user: None,
            heartbeat: Heartbeat::new(),
            backoff,
            tracker: GuildAvailabilityTracker::new(),
            guilds: GuildCache::default(),
        };
        let handle = ShardHandle {
            shard_id,
            commands: tx,
        };
        (shard, handle)
    }

    pub fn with_codec(mut self, codec: Arc<dyn Codec>) -> Self {
        self.codec = codec;
        self
    }

    /// Report health into a shared pool table instead of a private one.
    pub fn with_state(mut self, state: ShardState) -> Self {
        self.state = state;
        self
    }

    pub fn with_metrics(mut self, metrics: crate::metrics::GatewayMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn shard_id(&self) -> u64 {
        self.shard_id
    }

    pub fn stage(&self) -> ShardStage {
        self.stage
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn sequence(&self) -> Option<u64> {
        self.sequence
    }

    /// Bot user from the last READY.
    pub fn user(&self) -> Option<&Value> {
        self.user.as_ref()
    }

    /// Run until shutdown or an unrecoverable close.
    pub async fn run(mut self) -> Result<(), GatewayError> {
        let shard_id = self.shard_id;
        info!(shard_id, total_shards = self.config.total_shards, "Shard starting");

        loop {
            let code = match self.connect_and_run().await {
                SessionEnd::Shutdown => {
                    self.set_stage(ShardStage::Terminated);
                    self.state.set_health(shard_id, ShardHealth::Disconnected);
                    info!(shard_id, "Shard shut down");
                    return Ok(());
                }
                SessionEnd::ConnectFailed(err) => {
                    warn!(shard_id, error = %err, "Gateway connect failed");
                    self.metrics.record_error(shard_id, err.error_type_label());
                    self.emit_debug(format!("connect failed: {err}"));
                    None
                }
                SessionEnd::Closed { code } => Some(code),
            };

            if let Some(code) = code {
                if self.config.is_unrecoverable(code) {
                    return Err(self.terminate(code));
                }
                info!(shard_id, code, "Shard closed, reconnecting");
                self.state.record_close(shard_id, code);
                self.metrics.record_reconnect(shard_id, code);
                self.resuming = true;
            }

            self.set_stage(ShardStage::Reconnecting);
            self.state.set_health(shard_id, ShardHealth::Disconnected);
            let delay = self.backoff.next_delay();
            self.emit_debug(format!(
                "reconnecting in {}ms (attempt {})",
                delay.as_millis(),
                self.backoff.attempt()
            ));
            if self.wait_reconnect(delay).await.is_err() {
                self.set_stage(ShardStage::Terminated);
                info!(shard_id, "Shard shut down during backoff");
                return Ok(());
            }
        }
    }

    fn terminate(&mut self, code: u16) -> GatewayError {
        let shard_id = self.shard_id;
        self.set_stage(ShardStage::Terminated);
        self.state.set_health(shard_id, ShardHealth::Dead);
        let err = GatewayError::UnrecoverableClose { shard_id, code };
        self.metrics.record_error(shard_id, err.error_type_label());
        error!(shard_id, code, "Shard closed with unrecoverable code");
        self.emit(ShardEvent::Fatal { shard_id, code });
        err
    }

    /// Sleep out the backoff while still serving commands. `Err` on shutdown.
    async fn wait_reconnect(&mut self, delay: Duration) -> Result<(), ()> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Ok(()),
                command = self.commands.recv() => match command {
                    Some(ShardCommand::Guilds(reply)) => {
                        let _ = reply.send(self.guilds.snapshot());
                    }
                    Some(ShardCommand::UpdatePresence(_)) => {
                        self.emit_debug("presence update dropped while disconnected".to_string());
                    }
                    Some(ShardCommand::Shutdown) | None => return Err(()),
                },
            }
        }
    }

    fn connect_url(&self) -> String {
        let base = match (&self.resume_url, self.can_resume()) {
            (Some(url), true) => url.as_str(),
            _ => self.config.gateway_url.as_str(),
        };
        protocol::gateway_connect_url(base, self.config.api_version, self.codec.encoding())
    }

    fn can_resume(&self) -> bool {
        self.resuming && self.session_id.is_some() && self.sequence.is_some()
    }

    async fn connect_and_run(&mut self) -> SessionEnd {
        self.set_stage(ShardStage::Connecting);
        self.state.set_health(
            self.shard_id,
            if self.resuming {
                ShardHealth::Resuming
            } else {
                ShardHealth::Connecting
            },
        );
        let url = self.connect_url();
        debug!(shard_id = self.shard_id, %url, "Connecting to gateway");

        let mut stream = match self.transport.connect(&url).await {
            Ok(stream) => stream,
            Err(err) => return SessionEnd::ConnectFailed(err),
        };
        self.set_stage(ShardStage::AwaitingHello);

        let end = self.drive(stream.as_mut()).await;
        self.heartbeat.stop();
        end
    }

    /// Event loop for one open stream.
    async fn drive(&mut self, stream: &mut dyn GatewayStream) -> SessionEnd {
        loop {
            tokio::select! {
                beat = self.heartbeat.tick() => match beat {
                    Beat::Send => {
                        let payload = protocol::build_heartbeat(self.sequence);
                        if let Err(end) = self.send(stream, &payload).await {
                            return end;
                        }
                        trace!(shard_id = self.shard_id, seq = ?self.sequence, "Heartbeat sent");
                    }
                    Beat::Zombie => {
                        warn!(
                            shard_id = self.shard_id,
                            "Heartbeat not acknowledged, zombie connection"
                        );
                        self.emit_debug("zombie connection, closing".to_string());
                        return self.close(stream, close_code::RECONNECT).await;
                    }
                },

                command = self.commands.recv() => match command {
                    Some(ShardCommand::UpdatePresence(presence)) => {
                        let payload = protocol::build_presence_update(presence);
                        if let Err(end) = self.send(stream, &payload).await {
                            return end;
                        }
                    }
                    Some(ShardCommand::Guilds(reply)) => {
                        let _ = reply.send(self.guilds.snapshot());
                    }
                    Some(ShardCommand::Shutdown) | None => {
                        self.close(stream, NORMAL_CLOSURE).await;
                        return SessionEnd::Shutdown;
                    }
                },

                event = stream.next_event() => match event {
                    Some(StreamEvent::Message(frame)) => match self.codec.decode(&frame) {
                        Ok(payload) => {
                            if let Some(end) = self.handle_payload(stream, payload).await {
                                return end;
                            }
                        }
                        Err(err) => {
                            warn!(
                                shard_id = self.shard_id,
                                error = %err,
                                "Undecodable gateway frame"
                            );
                            let err = GatewayError::from(err);
                            self.metrics.record_error(self.shard_id, err.error_type_label());
                            self.emit_debug(err.to_string());
                            return self.close(stream, close_code::DECODE_ERROR).await;
                        }
                    },
                    Some(StreamEvent::Close { code, reason }) => {
                        info!(shard_id = self.shard_id, code, %reason, "Gateway closed the stream");
                        self.set_stage(ShardStage::Closing);
                        return SessionEnd::Closed { code };
                    }
                    Some(StreamEvent::Error(text)) => {
                        debug!(shard_id = self.shard_id, error = %text, "Transport error");
                        self.emit_debug(format!("transport error: {text}"));
                    }
                    None => {
                        info!(shard_id = self.shard_id, "Gateway stream ended without close frame");
                        self.set_stage(ShardStage::Closing);
                        return SessionEnd::Closed { code: close_code::ABNORMAL };
                    }
                },
            }
        }
    }

    async fn handle_payload(
        &mut self,
        stream: &mut dyn GatewayStream,
        payload: GatewayPayload,
    ) -> Option<SessionEnd> {
        let shard_id = self.shard_id;
        match payload.op {
            opcode::HELLO => {
                let hello = match parse::<HelloPayload>(payload.d) {
                    Some(hello) if hello.heartbeat_interval > 0 => hello,
                    _ => {
                        warn!(shard_id, "Malformed HELLO");
                        return Some(self.close(stream, close_code::DECODE_ERROR).await);
                    }
                };
                let interval = Duration::from_millis(hello.heartbeat_interval);
                self.heartbeat.start(interval);
                self.emit_debug(format!("hello, heartbeat every {}ms", hello.heartbeat_interval));

                let handshake = match (self.can_resume(), self.session_id.clone(), self.sequence) {
                    (true, Some(session_id), Some(seq)) => {
                        self.set_stage(ShardStage::Resuming);
                        info!(shard_id, seq, "Resuming session");
                        protocol::build_resume(&self.config.token, &session_id, seq)
                    }
                    _ => {
                        self.set_stage(ShardStage::Identifying);
                        self.sequence = None;
                        info!(shard_id, "Identifying");
                        protocol::build_identify(
                            &self.config.token,
                            &self.config.properties,
                            [shard_id, self.config.total_shards],
                            self.config.intents,
                        )
                    }
                };
                self.send(stream, &handshake).await.err()
            }

            opcode::HEARTBEAT_ACK => {
                self.heartbeat.ack();
                self.state.record_heartbeat(shard_id);
                self.metrics.record_heartbeat(shard_id);
                None
            }

            opcode::HEARTBEAT => {
                let beat = protocol::build_heartbeat(self.sequence);
                self.send(stream, &beat).await.err()
            }

            opcode::RECONNECT => {
                info!(shard_id, "Gateway requested reconnect");
                Some(self.close(stream, close_code::RECONNECT).await)
            }

            opcode::INVALID_SESSION => {
                let resumable = payload.d.as_ref().and_then(Value::as_bool).unwrap_or(false);
                warn!(shard_id, resumable, "Invalid session");
                if !resumable {
                    self.session_id = None;
                    self.sequence = None;
                    self.resume_url = None;
                }
                Some(self.close(stream, close_code::RECONNECT).await)
            }

            opcode::DISPATCH => {
                if let Some(seq) = payload.s {
                    self.sequence = Some(self.sequence.map_or(seq, |cur| cur.max(seq)));
                }
                let Some(event_type) = payload.t else {
                    debug!(shard_id, "Dispatch without event name");
                    return None;
                };
                self.state.record_event(shard_id);
                self.metrics.record_event(shard_id, &event_type);
                let data = payload.d.unwrap_or(Value::Null);
                match self.handle_dispatch(&event_type, data) {
                    Ok(()) => None,
                    Err(()) => Some(self.close(stream, close_code::DECODE_ERROR).await),
                }
            }

            other => {
                debug!(shard_id, op = other, "Unhandled opcode");
                None
            }
        }
    }

    /// Route one dispatch. `Err` means a handshake payload was malformed.
    fn handle_dispatch(&mut self, event_type: &str, data: Value) -> Result<(), ()> {
        let shard_id = self.shard_id;
        match event_type {
            "READY" => {
                let Some(ready) = parse::<ReadyPayload>(Some(data.clone())) else {
                    warn!(shard_id, "Malformed READY");
                    return Err(());
                };
                let guild_count = ready.guilds.len();
                let loaded = self
                    .tracker
                    .begin(ready.guilds.into_iter().map(|g| g.id));

                self.session_id = Some(ready.session_id.clone());
                if let Some(url) = ready.resume_gateway_url {
                    self.resume_url = Some(url);
                }
                self.user = Some(ready.user);
                self.resuming = false;
                self.backoff.reset();
                self.set_stage(ShardStage::Active);
                self.state.set_health(shard_id, ShardHealth::Ready);

                info!(
                    shard_id,
                    guilds = guild_count,
                    session_id = %ready.session_id,
                    "Shard ready"
                );
                self.emit(ShardEvent::Ready {
                    shard_id,
                    session_id: ready.session_id,
                    data,
                });
                if loaded {
                    info!(shard_id, "No guilds pending, shard loaded");
                    self.emit(ShardEvent::Loaded { shard_id });
                }
            }

            "RESUMED" => {
                self.resuming = false;
                self.backoff.reset();
                self.set_stage(ShardStage::Active);
                self.state.set_health(shard_id, ShardHealth::Ready);
                info!(shard_id, seq = ?self.sequence, "Shard resumed");
                self.emit(ShardEvent::Resumed { shard_id });
            }

            "GUILD_CREATE" => {
                let Some(created) = parse::<GuildCreatePayload>(Some(data.clone())) else {
                    warn!(shard_id, "GUILD_CREATE without a usable id");
                    return Ok(());
                };
                let guild = GuildRecord {
                    id: created.id,
                    name: created.name,
                    member_count: created.member_count,
                };
                self.guilds.upsert(guild.clone());
                let cached = self.guilds.len() as u64;
                self.state.set_guilds(shard_id, cached);
                self.metrics.set_guilds(shard_id, cached);

                match self.tracker.mark_available(&guild.id) {
                    GuildAvailability::Pending { remaining } => {
                        trace!(shard_id, guild_id = %guild.id, remaining, "Guild available");
                    }
                    GuildAvailability::Loaded => {
                        info!(shard_id, guilds = cached, "All guilds available, shard loaded");
                        self.emit(ShardEvent::Loaded { shard_id });
                    }
                    GuildAvailability::Joined => {
                        debug!(shard_id, guild_id = %guild.id, "Guild joined");
                        self.emit(ShardEvent::GuildJoin { shard_id, guild, data });
                    }
                }
            }

            "MESSAGE_CREATE" => self.emit(ShardEvent::MessageCreate { shard_id, data }),

            known if PASS_THROUGH_EVENTS.contains(&known) => self.emit(ShardEvent::Dispatch {
                shard_id,
                event_type: known.to_string(),
                data,
            }),

            unknown => {
                debug!(shard_id, event_type = unknown, "Ignoring dispatch");
                self.emit_debug(format!("unhandled dispatch {unknown}"));
            }
        }
        Ok(())
    }

    /// Encode and send. A failed send ends the connection as abnormal.
    async fn send(
        &mut self,
        stream: &mut dyn GatewayStream,
        payload: &GatewayPayload,
    ) -> Result<(), SessionEnd> {
        let result = match self.codec.encode(payload) {
            Ok(frame) => stream.send(frame).await,
            Err(err) => Err(err.into()),
        };
        result.map_err(|err| {
            warn!(shard_id = self.shard_id, op = payload.op, error = %err, "Gateway send failed");
            self.metrics.record_error(self.shard_id, err.error_type_label());
            self.set_stage(ShardStage::Closing);
            SessionEnd::Closed {
                code: close_code::ABNORMAL,
            }
        })
    }

    async fn close(&mut self, stream: &mut dyn GatewayStream, code: u16) -> SessionEnd {
        self.set_stage(ShardStage::Closing);
        if let Err(err) = stream.close(code).await {
            debug!(shard_id = self.shard_id, code, error = %err, "Close handshake failed");
        }
        SessionEnd::Closed { code }
    }

    fn set_stage(&mut self, stage: ShardStage) {
        if self.stage != stage {
            trace!(shard_id = self.shard_id, from = %self.stage, to = %stage, "Shard stage");
            self.stage = stage;
        }
    }

    fn emit(&self, event: ShardEvent) {
        // Subscriber gone: nothing left to deliver to.
        let _ = self.events.send(event);
    }

    fn emit_debug(&self, message: String) {
        debug!(shard_id = self.shard_id, "{message}");
        if self.config.debug {
            self.emit(ShardEvent::Debug {
                shard_id: self.shard_id,
                message,
            });
        }
    }
}

fn parse<T: serde::de::DeserializeOwned>(data: Option<Value>) -> Option<T> {
    data.and_then(|d| serde_json::from_value(d).ok())
}
