use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::{
    api::IdentityService,
    error::{ApiError, Error, Result},
    models::{auth::Credentials, identity::Identity},
    state::AppState,
    websocket::connection::{ConnectionSession, ConnectionState},
};

/// Where gated navigation lands when it is refused.
pub const HOME_ROUTE: &str = "/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Redirect {
        to: &'static str,
        /// Ask the user to sign in. Set when the refusal is "nobody is signed
        /// in", not when a signed-in user lacks the admin role.
        prompt_login: bool,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow)
    }

    fn login_required() -> Self {
        Self::Redirect {
            to: HOME_ROUTE,
            prompt_login: true,
        }
    }

    fn forbidden() -> Self {
        Self::Redirect {
            to: HOME_ROUTE,
            prompt_login: false,
        }
    }
}

/// Gate in front of restricted navigation and state-changing actions.
///
/// It also owns the push channel: the channel is opened whenever an identity
/// is established and closed before the identity is cleared, so the
/// connection never outlives the authorization it was opened under.
pub struct AuthGate {
    identity: Arc<dyn IdentityService>,
    state: AppState,
    connection: ConnectionSession,
}

impl AuthGate {
    pub fn new(
        identity: Arc<dyn IdentityService>,
        state: AppState,
        connection: ConnectionSession,
    ) -> Self {
        Self {
            identity,
            state,
            connection,
        }
    }

    /// Route check. When auth is required and no identity is known yet, the
    /// identity is fetched exactly once before deciding.
    pub async fn can_proceed(&mut self, requires_auth: bool, requires_admin: bool) -> Decision {
        if !requires_auth && !requires_admin {
            return Decision::Allow;
        }

        let identity = match self.state.session.identity() {
            Some(identity) => Some(identity),
            None => self.refresh_identity().await,
        };
        let Some(identity) = identity else {
            debug!("gated route needs a signed-in user");
            return Decision::login_required();
        };

        if requires_admin && !identity.is_admin {
            debug!(uid = identity.id.get(), "admin route refused");
            return Decision::forbidden();
        }
        Decision::Allow
    }

    /// Check for state-changing actions (posting, liking, ...). Never calls
    /// the site.
    pub fn require_login(&self) -> Decision {
        if self.state.session.is_logged_in() {
            Decision::Allow
        } else {
            Decision::login_required()
        }
    }

    /// Fetches the current identity. Any failure counts as "nobody signed in".
    pub async fn refresh_identity(&mut self) -> Option<Identity> {
        match self.identity.fetch_current().await {
            Ok(Some(identity)) => {
                self.establish(identity.clone());
                Some(identity)
            }
            Ok(None) => {
                self.forget();
                None
            }
            Err(e) => {
                warn!(error = %e, "identity refresh failed");
                self.forget();
                None
            }
        }
    }

    pub async fn login(&mut self, credentials: &Credentials) -> Result<Identity> {
        self.identity.login(credentials).await?;
        let identity = self
            .refresh_identity()
            .await
            .ok_or(Error::NotAuthenticated)?;
        info!(uid = identity.id.get(), name = %identity.display_name, "logged in");
        Ok(identity)
    }

    /// Closes the channel, signs out remotely and clears the identity. The
    /// identity is cleared even if the remote call fails.
    pub async fn logout(&mut self) -> Result<(), ApiError> {
        self.connection.close_and_wait().await;
        let result = self.identity.logout().await;
        self.state.session.clear_identity();
        match &result {
            Ok(()) => info!("logged out"),
            Err(e) => warn!(error = %e, "remote logout failed, local session cleared anyway"),
        }
        result
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.connection.state()
    }

    pub fn connection(&self) -> &ConnectionSession {
        &self.connection
    }

    /// Closes the channel without touching the identity, e.g. on shutdown.
    /// Returns once the socket is closed.
    pub async fn disconnect(&mut self) {
        self.connection.close_and_wait().await;
    }

    fn establish(&mut self, identity: Identity) {
        let same_user = self
            .state
            .session
            .identity()
            .is_some_and(|me| me.id == identity.id);
        if !same_user {
            self.connection.close();
        }
        self.state.session.set_identity(identity.clone());
        self.connection.open(&identity);
    }

    fn forget(&mut self) {
        let signed_in = self.state.session.is_logged_in();
        if signed_in || self.connection.is_open() {
            self.connection.close();
        }
        if signed_in {
            self.state.session.clear_identity();
        }
    }
}
