//! REST collaborators of the realtime core.
//!
//! The core only talks to the site through [`IdentityService`] and
//! [`HeartbeatSource`]; [`client::ApiClient`] implements both over HTTP.

pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::ApiError;
use crate::models::{auth::Credentials, identity::Identity, presence::HeartbeatSnapshot};

#[async_trait]
pub trait IdentityService: Send + Sync {
    /// `Ok(None)` means the site answered but nobody is signed in.
    async fn fetch_current(&self) -> Result<Option<Identity>, ApiError>;

    async fn login(&self, credentials: &Credentials) -> Result<(), ApiError>;

    async fn logout(&self) -> Result<(), ApiError>;
}

#[async_trait]
pub trait HeartbeatSource: Send + Sync {
    async fn fetch(&self) -> Result<HeartbeatSnapshot, ApiError>;
}
