use std::{future::Future, sync::Arc};
use tracing::{debug, info};

use crate::{
    api::{HeartbeatSource, IdentityService, client::ApiClient},
    auth::AuthGate,
    config::Config,
    error::Result,
    heartbeat::HeartbeatPoller,
    state::AppState,
    websocket::{
        connection::{ConnectionSession, ConnectionSettings},
        transport::{Connector, WsConnector},
    },
};

/// Everything one signed-in (or anonymous) browsing session needs: the
/// counters, the gate with its push channel, and the heartbeat fallback.
///
/// Constructed once per session and torn down with it; dropping the client
/// stops the poller and closes the channel.
pub struct PulseClient {
    config: Config,
    state: AppState,
    gate: AuthGate,
    poller: HeartbeatPoller,
}

impl PulseClient {
    pub fn new(config: Config) -> Result<Self> {
        let api = Arc::new(ApiClient::new(&config.site_url, config.request_timeout)?);
        let connector = Arc::new(WsConnector::new(config.request_timeout));
        Ok(Self::with_services(config, api.clone(), api, connector))
    }

    pub fn with_services(
        config: Config,
        identity: Arc<dyn IdentityService>,
        heartbeat: Arc<dyn HeartbeatSource>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        let state = AppState::new();
        let connection =
            ConnectionSession::new(ConnectionSettings::from(&config), connector, state.clone());
        let gate = AuthGate::new(identity, state.clone(), connection);
        let poller =
            HeartbeatPoller::new(heartbeat, state.clone()).with_request_timeout(config.request_timeout);

        Self {
            config,
            state,
            gate,
            poller,
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn gate(&mut self) -> &mut AuthGate {
        &mut self.gate
    }

    pub fn poller(&self) -> &HeartbeatPoller {
        &self.poller
    }

    /// Starts the heartbeat and establishes the identity, signing in with the
    /// configured credentials when the site reports nobody signed in.
    pub async fn start(&mut self) -> Result<()> {
        self.poller.start(self.config.heartbeat_interval);

        if self.gate.refresh_identity().await.is_some() {
            return Ok(());
        }
        match self.config.credentials.clone() {
            Some(credentials) => {
                self.gate.login(&credentials).await?;
            }
            None => info!("no identity, tracking presence only"),
        }
        Ok(())
    }

    /// Runs until `shutdown` resolves, logging counter changes as they land.
    /// Everything started here is released on every exit path.
    pub async fn run_until<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            self.shutdown().await;
            return Err(e);
        }

        let mut presence = self.state.presence.subscribe();
        let mut session = self.state.session.subscribe();
        let mut connection = self.gate.connection().subscribe();
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                Ok(()) = presence.changed() => {
                    let snapshot = *presence.borrow_and_update();
                    info!(online = snapshot.online, max_online = snapshot.max_online, "presence");
                }
                Ok(()) = session.changed() => {
                    let unread = session.borrow_and_update().as_ref().map(|me| me.unread_count);
                    match unread {
                        Some(unread) => info!(unread, "notifications"),
                        None => info!("signed out"),
                    }
                }
                Ok(()) = connection.changed() => {
                    let state = *connection.borrow_and_update();
                    debug!(?state, "channel state");
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// Stops the poller and closes the channel, waiting for the close
    /// handshake. The identity is kept.
    pub async fn shutdown(&mut self) {
        self.poller.stop();
        self.gate.disconnect().await;
    }
}
