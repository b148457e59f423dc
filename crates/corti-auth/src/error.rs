//! Error types for token acquisition and storage.

/// Result type alias for this crate.
pub type Result<T> = std::result::Result<T, AuthError>;

/// Errors that can occur while obtaining or renewing credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Invalid or missing configuration (malformed access token, missing PKCE verifier, ...).
    #[error("Config error: {0}")]
    Config(String),

    /// The token endpoint answered with a non-2xx status.
    #[error("API error ({status}): {body}")]
    ApiStatus {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// The request did not complete within the configured timeout.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// The endpoint answered 2xx with a body that is not valid JSON.
    #[error("Invalid response ({status}): {body}")]
    InvalidResponse {
        /// HTTP status code.
        status: u16,
        /// Raw response body.
        body: String,
    },

    /// Network/HTTP error.
    #[error("Network error: {0}")]
    Network(String),

    /// The caller aborted the request.
    #[error("Request cancelled")]
    Cancelled,

    /// A caller-supplied refresh callback failed.
    #[error("Token refresh failed: {0}")]
    Refresh(String),

    /// Durable key-value store failure.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl AuthError {
    /// Check if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, AuthError::Timeout { .. })
    }

    /// Check if the token endpoint rejected the credentials.
    pub fn is_auth_error(&self) -> bool {
        matches!(self, AuthError::ApiStatus { status: 400 | 401 | 403, .. })
    }
}

impl From<reqwest::Error> for AuthError {
    fn from(e: reqwest::Error) -> Self {
        AuthError::Network(e.to_string())
    }
}

/// Errors raised by a [`KeyValueStore`](crate::storage::KeyValueStore).
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The host has no usable store.
    #[error("storage unavailable: {0}")]
    Unavailable(String),

    /// The store is full.
    #[error("storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// The store refused access.
    #[error("storage access denied: {0}")]
    AccessDenied(String),

    /// Any other I/O failure.
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The backing file could not be (de)serialized.
    #[error("storage serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
