use futures_util::future::BoxFuture;
use serde::Serialize;
use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    api::HeartbeatSource,
    config::DEFAULT_REQUEST_TIMEOUT,
    error::ApiError,
    models::presence::HeartbeatSnapshot,
    state::{AppState, WriteLease},
};

// tokio intervals reject a zero period
const MIN_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Default)]
struct Counters {
    started: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PollerStats {
    pub polls_started: u64,
    pub polls_applied: u64,
    pub polls_failed: u64,
    pub ticks_skipped: u64,
}

struct Running {
    lease: WriteLease,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Periodic `GET /user/heartbeat` that refreshes both counters.
///
/// Runs independently of the push channel. At most one call is in flight;
/// a tick that fires while one is outstanding is skipped rather than queued.
/// Failures are swallowed because the next tick is the retry.
pub struct HeartbeatPoller {
    source: Arc<dyn HeartbeatSource>,
    state: AppState,
    request_timeout: Duration,
    counters: Arc<Counters>,
    running: Option<Running>,
}

impl HeartbeatPoller {
    pub fn new(source: Arc<dyn HeartbeatSource>, state: AppState) -> Self {
        Self {
            source,
            state,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            counters: Arc::default(),
            running: None,
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Polls once right away and then every `interval`. No-op while running.
    pub fn start(&mut self, interval: Duration) {
        if self.is_running() {
            return;
        }
        self.stop();

        let interval = interval.max(MIN_INTERVAL);
        let lease = WriteLease::new();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(
            PollLoop {
                source: Arc::clone(&self.source),
                state: self.state.clone(),
                request_timeout: self.request_timeout,
                counters: Arc::clone(&self.counters),
                lease: lease.clone(),
                cancel: cancel.clone(),
            }
            .run(interval),
        );
        info!(interval_ms = interval.as_millis() as u64, "heartbeat started");

        self.running = Some(Running { lease, cancel, task });
    }

    /// Cancels the timer and any in-flight call. No counter write happens
    /// after this returns.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            running.lease.revoke();
            running.cancel.cancel();
            running.task.abort();
            info!("heartbeat stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .as_ref()
            .is_some_and(|running| !running.task.is_finished())
    }

    pub fn stats(&self) -> PollerStats {
        PollerStats {
            polls_started: self.counters.started.load(Ordering::Relaxed),
            polls_applied: self.counters.applied.load(Ordering::Relaxed),
            polls_failed: self.counters.failed.load(Ordering::Relaxed),
            ticks_skipped: self.counters.skipped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for HeartbeatPoller {
    fn drop(&mut self) {
        self.stop();
    }
}

struct PollLoop {
    source: Arc<dyn HeartbeatSource>,
    state: AppState,
    request_timeout: Duration,
    counters: Arc<Counters>,
    lease: WriteLease,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self, interval: Duration) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut in_flight: Option<BoxFuture<'static, Result<HeartbeatSnapshot, ApiError>>> = None;

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return,
                result = poll_outstanding(&mut in_flight) => {
                    in_flight = None;
                    self.apply(result);
                }
                _ = ticker.tick() => {
                    if in_flight.is_some() {
                        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                        debug!("heartbeat still in flight, skipping tick");
                        continue;
                    }
                    self.counters.started.fetch_add(1, Ordering::Relaxed);
                    in_flight = Some(self.call());
                }
            }
        }
    }

    fn call(&self) -> BoxFuture<'static, Result<HeartbeatSnapshot, ApiError>> {
        let source = Arc::clone(&self.source);
        let timeout = self.request_timeout;
        Box::pin(async move {
            time::timeout(timeout, source.fetch())
                .await
                .unwrap_or(Err(ApiError::Timeout(timeout)))
        })
    }

    fn apply(&self, result: Result<HeartbeatSnapshot, ApiError>) {
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.counters.failed.fetch_add(1, Ordering::Relaxed);
                debug!(error = %e, "heartbeat failed, waiting for next tick");
                return;
            }
        };

        let applied = self.lease.apply(|| {
            self.state.presence.set(snapshot.online, snapshot.max_online);
            self.state.session.set_unread(snapshot.unread_count);
        });
        if applied {
            self.counters.applied.fetch_add(1, Ordering::Relaxed);
            trace!(?snapshot, "heartbeat applied");
        }
    }
}

async fn poll_outstanding(
    in_flight: &mut Option<BoxFuture<'static, Result<HeartbeatSnapshot, ApiError>>>,
) -> Result<HeartbeatSnapshot, ApiError> {
    match in_flight {
        Some(call) => call.await,
        None => std::future::pending().await,
    }
}
