use chrono::{DateTime, Utc};
use reqwest::Url;
use serde::Serialize;
use std::{
    num::NonZeroU64,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{self, Instant, Interval, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::{
    config::{Config, DEFAULT_KEEPALIVE_INTERVAL, DEFAULT_RECONNECT_DELAY, channel_url},
    models::{
        frame::{InboundFrame, KEEPALIVE_PAYLOAD},
        identity::Identity,
    },
    state::{AppState, WriteLease},
    utils::tag::connection_tag,
    websocket::transport::{Connector, Transport},
};

// Upper bound on waiting for the close handshake once a session is cancelled.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Reached only through [`ConnectionSession::close`].
    Closed,
}

#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    pub site_url: Url,
    /// Flat delay between a drop and the next connect attempt.
    pub reconnect_delay: Duration,
    /// Zero disables keep-alive frames.
    pub keepalive_interval: Duration,
}

impl ConnectionSettings {
    pub fn new(site_url: Url) -> Self {
        Self {
            site_url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = interval;
        self
    }
}

impl From<&Config> for ConnectionSettings {
    fn from(config: &Config) -> Self {
        Self {
            site_url: config.site_url.clone(),
            reconnect_delay: config.reconnect_delay,
            keepalive_interval: config.keepalive_interval,
        }
    }
}

#[derive(Default)]
struct Counters {
    attempts: AtomicU64,
    frames_applied: AtomicU64,
    frames_dropped: AtomicU64,
    keepalives_sent: AtomicU64,
    connected_at: Mutex<Option<DateTime<Utc>>>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStats {
    pub state: ConnectionState,
    pub attempts: u64,
    pub frames_applied: u64,
    pub frames_dropped: u64,
    pub keepalives_sent: u64,
    pub connected_at: Option<DateTime<Utc>>,
}

struct Active {
    uid: NonZeroU64,
    lease: WriteLease,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owner of the long-lived push channel for the signed-in user.
///
/// `open` spawns a driver task that connects, routes inbound frames into the
/// counters, sends keep-alives, and reconnects after a flat delay for as long
/// as the identity it was opened for stays signed in. `close` (and dropping
/// the session) revokes the driver's write lease and cancels it, so nothing
/// the old driver does afterwards is observable.
pub struct ConnectionSession {
    settings: ConnectionSettings,
    connector: Arc<dyn Connector>,
    state: AppState,
    status: Arc<watch::Sender<ConnectionState>>,
    counters: Arc<Counters>,
    active: Option<Active>,
}

impl ConnectionSession {
    pub fn new(settings: ConnectionSettings, connector: Arc<dyn Connector>, state: AppState) -> Self {
        let (status, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            settings,
            connector,
            state,
            status: Arc::new(status),
            counters: Arc::default(),
            active: None,
        }
    }

    /// Starts the channel for `identity`. A no-op unless that identity is the
    /// one currently signed in, or if a driver for it is already running.
    pub fn open(&mut self, identity: &Identity) {
        let uid = identity.id;
        if !self.state.session.identity().is_some_and(|me| me.id == uid) {
            debug!(uid = uid.get(), "identity not signed in, channel stays down");
            return;
        }
        if let Some(active) = &self.active {
            if active.uid == uid && !active.task.is_finished() {
                return;
            }
        }
        self.release();

        let url = match channel_url(&self.settings.site_url, uid) {
            Ok(url) => url,
            Err(e) => {
                warn!(uid = uid.get(), error = %e, "no channel endpoint for this site");
                self.status.send_replace(ConnectionState::Disconnected);
                return;
            }
        };
        let lease = WriteLease::new();
        let cancel = CancellationToken::new();
        self.status.send_replace(ConnectionState::Connecting);

        let driver = Driver {
            url,
            uid,
            reconnect_delay: self.settings.reconnect_delay,
            keepalive_interval: self.settings.keepalive_interval,
            connector: Arc::clone(&self.connector),
            state: self.state.clone(),
            status: Arc::clone(&self.status),
            counters: Arc::clone(&self.counters),
            lease: lease.clone(),
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(driver.run());

        self.active = Some(Active {
            uid,
            lease,
            cancel,
            task,
        });
    }

    /// Stops the channel and any pending reconnect or keep-alive timer.
    /// Idempotent; the session stays `Closed` until the next `open`.
    ///
    /// Counter writes stop before this returns; the socket itself is closed
    /// by the driver task. Use [`ConnectionSession::close_and_wait`] when the
    /// close handshake must have happened, e.g. before the runtime exits.
    pub fn close(&mut self) {
        self.release();
        self.mark_closed();
    }

    /// [`ConnectionSession::close`], then waits for the driver to finish
    /// closing the socket.
    pub async fn close_and_wait(&mut self) {
        let task = self.release();
        self.mark_closed();

        let Some(mut task) = task else {
            return;
        };
        if time::timeout(CLOSE_GRACE * 2, &mut task).await.is_err() {
            debug!("channel driver still closing, aborting it");
            task.abort();
        }
    }

    fn mark_closed(&self) {
        if self.status.send_replace(ConnectionState::Closed) != ConnectionState::Closed {
            info!("channel closed");
        }
    }

    fn release(&mut self) -> Option<JoinHandle<()>> {
        let active = self.active.take()?;
        active.lease.revoke();
        active.cancel.cancel();
        Some(active.task)
    }

    pub fn state(&self) -> ConnectionState {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionState> {
        self.status.subscribe()
    }

    /// Whether a driver task is alive for some identity.
    pub fn is_open(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.task.is_finished())
    }

    pub fn stats(&self) -> ConnectionStats {
        let counters = &self.counters;
        ConnectionStats {
            state: self.state(),
            attempts: counters.attempts.load(Ordering::Relaxed),
            frames_applied: counters.frames_applied.load(Ordering::Relaxed),
            frames_dropped: counters.frames_dropped.load(Ordering::Relaxed),
            keepalives_sent: counters.keepalives_sent.load(Ordering::Relaxed),
            connected_at: *counters
                .connected_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        self.release();
    }
}

enum PumpExit {
    Cancelled,
    SignedOut,
    Dropped(String),
}

struct Driver {
    url: Url,
    uid: NonZeroU64,
    reconnect_delay: Duration,
    keepalive_interval: Duration,
    connector: Arc<dyn Connector>,
    state: AppState,
    status: Arc<watch::Sender<ConnectionState>>,
    counters: Arc<Counters>,
    lease: WriteLease,
    cancel: CancellationToken,
}

impl Driver {
    async fn run(self) {
        let uid = self.uid.get();
        loop {
            if !self.signed_in() {
                debug!(uid, "identity gone, channel going idle");
                self.set_state(ConnectionState::Disconnected);
                return;
            }

            self.set_state(ConnectionState::Connecting);
            let generation = self.counters.attempts.fetch_add(1, Ordering::Relaxed) + 1;
            let tag = connection_tag(generation);

            let connected = tokio::select! {
                _ = self.cancel.cancelled() => return,
                result = self.connector.connect(&self.url) => result,
            };

            match connected {
                Ok(mut transport) => {
                    if !self.mark_connected() {
                        close_quietly(transport.as_mut(), &tag).await;
                        return;
                    }
                    info!(uid, conn = %tag, "channel connected");
                    match self.pump(transport.as_mut(), &tag).await {
                        PumpExit::Cancelled => return,
                        PumpExit::SignedOut => {
                            info!(uid, conn = %tag, "identity changed, channel closed");
                            self.set_state(ConnectionState::Disconnected);
                            return;
                        }
                        PumpExit::Dropped(reason) => {
                            warn!(uid, conn = %tag, %reason, "channel dropped");
                        }
                    }
                }
                Err(e) => warn!(uid, conn = %tag, error = %e, "channel connect failed"),
            }

            if self.cancel.is_cancelled() {
                return;
            }
            if !self.signed_in() {
                debug!(uid, "identity gone, not reconnecting");
                self.set_state(ConnectionState::Disconnected);
                return;
            }

            self.set_state(ConnectionState::Reconnecting);
            info!(
                uid,
                delay_ms = self.reconnect_delay.as_millis() as u64,
                "reconnect scheduled"
            );
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = time::sleep(self.reconnect_delay) => {}
            }
        }
    }

    async fn pump(&self, transport: &mut dyn Transport, tag: &str) -> PumpExit {
        let mut keepalive = keepalive_timer(self.keepalive_interval);
        let mut identity = self.state.session.subscribe();
        if !self.signed_in() {
            close_quietly(transport, tag).await;
            return PumpExit::SignedOut;
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    close_quietly(transport, tag).await;
                    return PumpExit::Cancelled;
                }
                Ok(()) = identity.changed() => {
                    if !self.signed_in() {
                        close_quietly(transport, tag).await;
                        return PumpExit::SignedOut;
                    }
                }
                frame = transport.recv() => match frame {
                    Some(Ok(text)) => self.route(&text, tag),
                    Some(Err(e)) => {
                        close_quietly(transport, tag).await;
                        return PumpExit::Dropped(e.to_string());
                    }
                    None => return PumpExit::Dropped("closed by peer".to_string()),
                },
                _ = next_tick(&mut keepalive) => {
                    if let Err(e) = transport.send(KEEPALIVE_PAYLOAD.to_string()).await {
                        close_quietly(transport, tag).await;
                        return PumpExit::Dropped(e.to_string());
                    }
                    self.counters.keepalives_sent.fetch_add(1, Ordering::Relaxed);
                    trace!(conn = %tag, "keep-alive sent");
                }
            }
        }
    }

    fn route(&self, text: &str, tag: &str) {
        let frame = InboundFrame::decode(text);
        let mut written = false;
        self.lease.apply(|| {
            written = match frame {
                // only the user this channel was opened for
                InboundFrame::Notification { unread_count } => {
                    self.state.session.set_unread_for(self.uid, unread_count)
                }
                InboundFrame::Presence { online, max_online } => {
                    self.state.presence.set(online, max_online);
                    true
                }
                InboundFrame::Unknown => false,
            };
        });

        if frame.is_unknown() {
            self.counters.frames_dropped.fetch_add(1, Ordering::Relaxed);
            trace!(conn = %tag, len = text.len(), "dropping unrecognised frame");
        } else if written {
            self.counters.frames_applied.fetch_add(1, Ordering::Relaxed);
            trace!(conn = %tag, ?frame, "frame applied");
        } else {
            trace!(conn = %tag, ?frame, "frame not applied");
        }
    }

    fn signed_in(&self) -> bool {
        self.state
            .session
            .identity()
            .is_some_and(|me| me.id == self.uid)
    }

    fn set_state(&self, next: ConnectionState) {
        self.lease.apply(|| {
            self.status.send_replace(next);
        });
    }

    fn mark_connected(&self) -> bool {
        self.lease.apply(|| {
            self.status.send_replace(ConnectionState::Connected);
            *self
                .counters
                .connected_at
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
        })
    }
}

fn keepalive_timer(period: Duration) -> Option<Interval> {
    if period.is_zero() {
        return None;
    }
    let mut timer = time::interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    Some(timer)
}

async fn next_tick(timer: &mut Option<Interval>) {
    match timer {
        Some(timer) => {
            timer.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn close_quietly(transport: &mut dyn Transport, tag: &str) {
    match time::timeout(CLOSE_GRACE, transport.close()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => debug!(conn = %tag, error = %e, "error while closing channel"),
        Err(_) => debug!(conn = %tag, "close handshake timed out"),
    }
}
