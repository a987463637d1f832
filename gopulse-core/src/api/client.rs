use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::{
    api::{HeartbeatSource, IdentityService, types::ApiResponse},
    config::api_base,
    error::ApiError,
    models::{
        auth::{Credentials, CurrentUser},
        identity::Identity,
        presence::HeartbeatSnapshot,
    },
};

const CURRENT_USER_PATH: &str = "user/current";
const HEARTBEAT_PATH: &str = "user/heartbeat";
const LOGIN_PATH: &str = "account/login";
const LOGOUT_PATH: &str = "account/logout";

/// HTTP client for the site's `/api/v1` endpoints.
///
/// Keeps a cookie jar so the session cookie set by login is sent with every
/// later call, the same way the browser does.
#[derive(Clone)]
pub struct ApiClient {
    http: Client,
    base: Url,
}

impl ApiClient {
    pub fn new(site_url: &Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        Ok(Self {
            http,
            base: api_base(site_url)?,
        })
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base.join(path).map_err(|e| ApiError::Url(e.to_string()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<ApiResponse<T>, ApiError> {
        let resp = self.http.get(self.endpoint(path)?).send().await?;
        envelope(resp).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        form: &[(&str, &str)],
    ) -> Result<ApiResponse<T>, ApiError> {
        let resp = self
            .http
            .post(self.endpoint(path)?)
            .form(form)
            .send()
            .await?;
        envelope(resp).await
    }
}

async fn envelope<T: DeserializeOwned>(resp: Response) -> Result<ApiResponse<T>, ApiError> {
    match resp.status() {
        StatusCode::UNAUTHORIZED => Err(ApiError::Unauthorized),
        status if !status.is_success() => Err(ApiError::Status(status)),
        _ => Ok(resp.json::<ApiResponse<T>>().await?),
    }
}

#[async_trait]
impl IdentityService for ApiClient {
    async fn fetch_current(&self) -> Result<Option<Identity>, ApiError> {
        let user = self
            .get::<CurrentUser>(CURRENT_USER_PATH)
            .await?
            .into_result()?;
        Ok(user.and_then(Identity::from_current))
    }

    async fn login(&self, credentials: &Credentials) -> Result<(), ApiError> {
        debug!(username = %credentials.username, "logging in");
        self.post_form::<Value>(LOGIN_PATH, &credentials.form())
            .await?
            .into_result()?;
        Ok(())
    }

    async fn logout(&self) -> Result<(), ApiError> {
        self.get::<Value>(LOGOUT_PATH).await?.into_result()?;
        Ok(())
    }
}

#[async_trait]
impl HeartbeatSource for ApiClient {
    async fn fetch(&self) -> Result<HeartbeatSnapshot, ApiError> {
        let data = self
            .get::<Value>(HEARTBEAT_PATH)
            .await?
            .into_data(HEARTBEAT_PATH)?;
        Ok(HeartbeatSnapshot::from_value(&data))
    }
}
