use reqwest::Url;
use std::{num::NonZeroU64, time::Duration};

use crate::error::{ApiError, ConfigError, TransportError};
use crate::models::auth::Credentials;

pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_millis(5_000);
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_millis(15_000);
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_millis(30_000);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_millis(15_000);

const API_PREFIX: &str = "/api/v1/";
const CHANNEL_PATH: &str = "/ws";

#[derive(Debug, Clone)]
pub struct Config {
    pub site_url: Url,
    pub reconnect_delay: Duration,
    /// Zero disables keep-alive frames.
    pub keepalive_interval: Duration,
    pub heartbeat_interval: Duration,
    pub request_timeout: Duration,
    pub credentials: Option<Credentials>,
}

impl Config {
    /// Site URL with every timing knob at its default.
    pub fn new(site_url: Url) -> Self {
        Self {
            site_url,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            credentials: None,
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let raw_site = lookup("GOPULSE_SITE_URL").ok_or(ConfigError::Missing("GOPULSE_SITE_URL"))?;
        let site_url = parse_site_url(&raw_site)?;

        let reconnect_delay = millis(&lookup, "GOPULSE_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY)?;
        let keepalive_interval =
            millis(&lookup, "GOPULSE_KEEPALIVE_INTERVAL_MS", DEFAULT_KEEPALIVE_INTERVAL)?;
        let heartbeat_interval =
            millis(&lookup, "GOPULSE_HEARTBEAT_INTERVAL_MS", DEFAULT_HEARTBEAT_INTERVAL)?;
        if heartbeat_interval.is_zero() {
            return Err(ConfigError::Invalid {
                key: "GOPULSE_HEARTBEAT_INTERVAL_MS",
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        let request_timeout = millis(&lookup, "GOPULSE_REQUEST_TIMEOUT_MS", DEFAULT_REQUEST_TIMEOUT)?;

        let remember_me = match lookup("GOPULSE_REMEMBER_ME") {
            None => false,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid {
                        key: "GOPULSE_REMEMBER_ME",
                        value: raw,
                        reason: "expected true or false".to_string(),
                    });
                }
            },
        };
        let credentials = match (lookup("GOPULSE_USERNAME"), lookup("GOPULSE_PASSWORD")) {
            (Some(username), Some(password)) => {
                Some(Credentials::new(username, password).remember_me(remember_me))
            }
            (Some(_), None) => return Err(ConfigError::Missing("GOPULSE_PASSWORD")),
            (None, _) => None,
        };

        Ok(Self {
            site_url,
            reconnect_delay,
            keepalive_interval,
            heartbeat_interval,
            request_timeout,
            credentials,
        })
    }

    pub fn api_base(&self) -> Result<Url, ApiError> {
        api_base(&self.site_url)
    }
}

fn parse_site_url(raw: &str) -> Result<Url, ConfigError> {
    let invalid = |reason: String| ConfigError::Invalid {
        key: "GOPULSE_SITE_URL",
        value: raw.to_string(),
        reason,
    };
    let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        _ => Err(invalid("expected an http(s) origin".to_string())),
    }
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Duration::from_millis)
            .map_err(|e| ConfigError::Invalid {
                key,
                value: raw,
                reason: e.to_string(),
            }),
    }
}

/// `<site>/api/v1/`, the base every REST path is joined onto.
pub fn api_base(site: &Url) -> Result<Url, ApiError> {
    site.join(API_PREFIX).map_err(|e| ApiError::Url(e.to_string()))
}

/// Channel endpoint for `uid`. The websocket scheme mirrors the page's own
/// transport security: `https` sites get `wss`, everything else `ws`.
/// Sites whose scheme cannot become a websocket one have no endpoint.
pub fn channel_url(site: &Url, uid: NonZeroU64) -> Result<Url, TransportError> {
    let mut url = site.clone();
    let scheme = if site.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::Endpoint(site.to_string()))?;
    url.set_path(CHANNEL_PATH);
    url.set_fragment(None);
    url.query_pairs_mut().clear().append_pair("uid", &uid.to_string());
    Ok(url)
}
