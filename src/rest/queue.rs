//! Per-route request queue.
//!
//! Each route gets one worker task. The worker owns the pending deque, so
//! at most one request per route is ever in flight. An exhausted response
//! puts its request back at the head and parks the whole route for the
//! server-given delay.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use super::route::{ApiRequest, ApiResponse};
use super::transport::RequestTransport;
use crate::error::GatewayError;

/// What a route does with a 2xx response that drained its bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExhaustedPolicy {
    /// Put the request back at the head and run it again after the delay.
    #[default]
    Retry,
    /// Hand the response to the caller, then wait the delay before the
    /// next request. A 429 is still retried.
    Defer,
}

impl FromStr for ExhaustedPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "retry" => Ok(Self::Retry),
            "defer" => Ok(Self::Defer),
            other => Err(format!(
                "RATE_LIMIT_POLICY must be 'retry' or 'defer', got '{other}'"
            )),
        }
    }
}

impl fmt::Display for ExhaustedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Retry => "retry",
            Self::Defer => "defer",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueConfig {
    pub policy: ExhaustedPolicy,
    /// Re-runs of a 2xx on a drained bucket before that response is
    /// delivered. A 429 is always retried and does not count against this.
    pub max_exhausted_retries: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            policy: ExhaustedPolicy::Retry,
            max_exhausted_retries: 5,
        }
    }
}

type Reply = oneshot::Sender<Result<ApiResponse, GatewayError>>;

struct PendingRequest {
    request: ApiRequest,
    reply: Reply,
    exhausted_retries: u32,
}

/// Handle to one route's worker. Cheap to clone.
#[derive(Clone)]
pub struct RouteQueue {
    route: Arc<str>,
    submissions: mpsc::UnboundedSender<PendingRequest>,
    busy: Arc<AtomicBool>,
}

impl fmt::Debug for RouteQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteQueue")
            .field("route", &self.route)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl RouteQueue {
    /// Spawn the worker for `route`. Must be called inside a tokio runtime.
    pub fn spawn(
        route: impl Into<Arc<str>>,
        transport: Arc<dyn RequestTransport>,
        config: QueueConfig,
        metrics: crate::metrics::GatewayMetrics,
    ) -> Self {
        let route: Arc<str> = route.into();
        let (tx, rx) = mpsc::unbounded_channel();
        let busy = Arc::new(AtomicBool::new(false));

        let worker = RouteWorker {
            route: Arc::clone(&route),
            transport,
            config,
            metrics,
            submissions: rx,
            pending: VecDeque::new(),
            busy: Arc::clone(&busy),
        };
        tokio::spawn(worker.run());

        Self {
            route,
            submissions: tx,
            busy,
        }
    }

    pub fn route(&self) -> &str {
        &self.route
    }

    /// True while a request is executing. The rate-limit cooldown and an
    /// empty deque both read as idle.
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    /// Enqueue at the tail and wait for the outcome.
    ///
    /// Dropping the returned future before it resolves withdraws the
    /// request if it has not started yet.
    pub async fn submit(&self, request: ApiRequest) -> Result<ApiResponse, GatewayError> {
        let (tx, rx) = oneshot::channel();
        self.submissions
            .send(PendingRequest {
                request,
                reply: tx,
                exhausted_retries: 0,
            })
            .map_err(|_| self.closed())?;
        rx.await.map_err(|_| self.closed())?
    }

    fn closed(&self) -> GatewayError {
        GatewayError::QueueClosed {
            route: self.route.to_string(),
        }
    }
}

struct RouteWorker {
    route: Arc<str>,
    transport: Arc<dyn RequestTransport>,
    config: QueueConfig,
    metrics: crate::metrics::GatewayMetrics,
    submissions: mpsc::UnboundedReceiver<PendingRequest>,
    pending: VecDeque<PendingRequest>,
    busy: Arc<AtomicBool>,
}

impl RouteWorker {
    async fn run(mut self) {
        debug!(route = %self.route, "Route queue started");
        loop {
            if self.pending.is_empty() {
                self.busy.store(false, Ordering::Release);
                match self.submissions.recv().await {
                    Some(next) => self.pending.push_back(next),
                    None => break,
                }
            }
            while let Ok(next) = self.submissions.try_recv() {
                self.pending.push_back(next);
            }

            let Some(mut next) = self.pending.pop_front() else {
                continue;
            };
            if next.reply.is_closed() {
                debug!(route = %self.route, "Caller gone, skipping request");
                continue;
            }
            self.busy.store(true, Ordering::Release);

            let started = Instant::now();
            let response = match self.transport.execute(&next.request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(route = %self.route, error = %err, "Request failed");
                    let _ = next.reply.send(Err(err));
                    continue;
                }
            };
            let method = next.request.method.as_str();
            self.metrics
                .record_rest_request(method, response.status, started.elapsed());

            if !response.is_exhausted() {
                self.deliver(next.reply, response);
                continue;
            }

            self.metrics.record_rate_limited(method);
            let cooldown = response.cooldown();
            // 429s always go back; the cap only bounds drained 2xx re-runs.
            let retry = response.is_too_many_requests()
                || (self.config.policy == ExhaustedPolicy::Retry
                    && next.exhausted_retries < self.config.max_exhausted_retries);

            if retry {
                next.exhausted_retries = next.exhausted_retries.saturating_add(1);
                debug!(
                    route = %self.route,
                    status = response.status,
                    attempt = next.exhausted_retries,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Route exhausted, retrying after cooldown"
                );
                self.pending.push_front(next);
            } else {
                debug!(
                    route = %self.route,
                    status = response.status,
                    cooldown_ms = cooldown.as_millis() as u64,
                    "Route exhausted, delivering response"
                );
                self.deliver(next.reply, response);
            }
            self.busy.store(false, Ordering::Release);
            tokio::time::sleep(cooldown).await;
        }
        debug!(route = %self.route, "Route queue stopped");
    }

    fn deliver(&self, reply: Reply, response: ApiResponse) {
        let outcome = if response.is_success() {
            Ok(response)
        } else {
            Err(GatewayError::Api {
                route: self.route.to_string(),
                status: response.status,
                body: response.body.to_string(),
            })
        };
        // Caller may have stopped waiting.
        let _ = reply.send(outcome);
    }
}
