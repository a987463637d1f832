use reqwest::StatusCode;
use std::time::Duration;

/// Environment configuration problems, reported once at start-up.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} environment variable must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value {value:?}: {reason}")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Failures of the site's REST API.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("not authenticated")]
    Unauthorized,

    /// The envelope came back with a non-zero `code`.
    #[error("request rejected ({code}): {msg}")]
    Rejected { code: i64, msg: String },

    #[error("response for {0} carried no data")]
    MissingData(&'static str),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("invalid url: {0}")]
    Url(String),
}

/// Failures of the realtime channel. These only ever drive the reconnect
/// cycle; they are never surfaced to callers of `ConnectionSession::open`.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("handshake did not complete within {0:?}")]
    Timeout(Duration),

    #[error("channel closed")]
    Closed,

    #[error("no websocket endpoint for site {0}")]
    Endpoint(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// Login was accepted but no identity could be fetched afterwards.
    #[error("no identity available after login")]
    NotAuthenticated,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
