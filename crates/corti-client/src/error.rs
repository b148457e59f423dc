//! Client error types.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Token acquisition failed.
    #[error(transparent)]
    Auth(#[from] corti_auth::AuthError),

    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// URL parsing failed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// JSON serialization/deserialization failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// WebSocket handshake or transport failure.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] Box<tokio_tungstenite::tungstenite::Error>),

    /// Server returned an error response.
    #[error("API error ({status}): {body}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// Invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The stream socket has no open connection right now.
    #[error("Stream not connected")]
    NotConnected,

    /// The stream socket was closed for good.
    #[error("Stream closed")]
    Closed,
}

impl Error {
    /// Check if this is a configuration error (including token format errors).
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Auth(corti_auth::AuthError::Config(_))
        )
    }

    /// Check if this is an authentication error.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Api { status: 401, .. })
            || matches!(self, Error::Auth(e) if e.is_auth_error())
    }

    /// Check if this is a timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Http(e) if e.is_timeout())
            || matches!(self, Error::Auth(e) if e.is_timeout())
    }

    /// Check if this is a server error.
    pub fn is_server_error(&self) -> bool {
        matches!(self, Error::Api { status, .. } if *status >= 500)
    }
}

/// Failures delivered as stream error events rather than returned.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The server rejected the configuration. Carries the raw server message.
    #[error("Configuration denied: {0}")]
    Denied(String),

    /// The server gave up waiting for a configuration.
    #[error("Configuration timed out: {0}")]
    ConfigTimeout(String),

    /// The server reported an error on the stream.
    #[error("Stream error: {0}")]
    Server(String),

    /// Reconnecting failed more often than allowed.
    #[error("Giving up after {attempts} reconnect attempts")]
    RetriesExhausted { attempts: u32 },

    /// The connection could not be established or broke.
    #[error("Transport error: {0}")]
    Transport(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        Error::WebSocket(Box::new(e))
    }
}

/// Result type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
