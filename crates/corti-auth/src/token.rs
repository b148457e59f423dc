//! Bearer token lifecycle: expiry tracking and refresh.
//!
//! Every expiry instant used to decide whether an access token is still
//! usable is moved [`EXPIRY_BUFFER_SECS`] earlier than the server-declared
//! lifetime. Refresh-token expiry carries no buffer.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use tokio::sync::Mutex;

use crate::claims::token_expiry;
use crate::error::{AuthError, Result};
use crate::oauth::{TokenExchanger, TokenRequest, TokenResponse};

/// Safety margin subtracted from access token lifetimes (2 minutes).
pub const EXPIRY_BUFFER_SECS: i64 = 2 * 60;

fn expiry_buffer() -> TimeDelta {
    TimeDelta::seconds(EXPIRY_BUFFER_SECS)
}

/// Expiry from a numeric lifetime, else the token's `exp` claim, else now.
fn compute_expiry(
    expires_in: Option<u64>,
    token: Option<&str>,
    buffer: TimeDelta,
) -> DateTime<Utc> {
    let now = Utc::now();
    let expires_at = match expires_in {
        Some(secs) => i64::try_from(secs)
            .ok()
            .and_then(TimeDelta::try_seconds)
            .and_then(|lifetime| now.checked_add_signed(lifetime))
            .unwrap_or(DateTime::<Utc>::MAX_UTC),
        None => token.and_then(token_expiry).unwrap_or(now),
    };
    expires_at
        .checked_sub_signed(buffer)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

// ============================================================================
// Traits
// ============================================================================

/// A source of currently valid access tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync + std::fmt::Debug {
    /// Get a usable access token, renewing it first if needed.
    async fn get_token(&self) -> Result<String>;
}

/// Shared token provider for use across async contexts.
pub type SharedTokenProvider = Arc<dyn TokenProvider>;

/// Caller-supplied renewal of an externally issued token.
#[async_trait]
pub trait RefreshAccessToken: Send + Sync {
    /// Produce new tokens given the current refresh token, if any.
    async fn refresh(&self, refresh_token: Option<String>) -> Result<TokenResponse>;
}

/// Adapter turning an async closure into a [`RefreshAccessToken`].
pub struct RefreshFn<F>(F);

#[async_trait]
impl<F, Fut> RefreshAccessToken for RefreshFn<F>
where
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TokenResponse>> + Send + 'static,
{
    async fn refresh(&self, refresh_token: Option<String>) -> Result<TokenResponse> {
        (self.0)(refresh_token).await
    }
}

/// Wrap an async closure as a shared refresh callback.
pub fn refresh_fn<F, Fut>(f: F) -> Arc<dyn RefreshAccessToken>
where
    F: Fn(Option<String>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<TokenResponse>> + Send + 'static,
{
    Arc::new(RefreshFn(f))
}

// ============================================================================
// BearerTokenProvider
// ============================================================================

/// Current access/refresh tokens and their expiry instants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BearerToken {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Access token expiry, already reduced by the safety buffer.
    pub expires_at: DateTime<Utc>,
    /// Refresh token expiry, without buffer.
    pub refresh_expires_at: DateTime<Utc>,
}

impl BearerToken {
    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }

    pub fn is_refresh_expired(&self) -> bool {
        Utc::now() >= self.refresh_expires_at
    }

    fn apply(&mut self, response: &TokenResponse) {
        self.expires_at = compute_expiry(
            response.expires_in,
            Some(&response.access_token),
            expiry_buffer(),
        );
        self.access_token = response.access_token.clone();

        // Keep the previous refresh token when the server does not rotate it.
        if let Some(refresh_token) = &response.refresh_token {
            self.refresh_expires_at = compute_expiry(
                response.refresh_expires_in,
                Some(refresh_token),
                TimeDelta::zero(),
            );
            self.refresh_token = Some(refresh_token.clone());
        }
    }
}

/// Construction options for [`BearerTokenProvider`].
#[derive(Clone, Default)]
pub struct BearerTokenOptions {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    /// Access token lifetime in seconds.
    pub expires_in: Option<u64>,
    /// Refresh token lifetime in seconds.
    pub refresh_expires_in: Option<u64>,
    pub refresh_access_token: Option<Arc<dyn RefreshAccessToken>>,
}

impl std::fmt::Debug for BearerTokenOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenOptions")
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .field("refresh_access_token", &self.refresh_access_token.is_some())
            .finish()
    }
}

impl BearerTokenOptions {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: Some(access_token.into()),
            ..Default::default()
        }
    }

    /// Options for a provider that obtains every token from the callback.
    pub fn refresh_only(callback: Arc<dyn RefreshAccessToken>) -> Self {
        Self {
            refresh_access_token: Some(callback),
            ..Default::default()
        }
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    pub fn with_expires_in(mut self, secs: u64) -> Self {
        self.expires_in = Some(secs);
        self
    }

    pub fn with_refresh_expires_in(mut self, secs: u64) -> Self {
        self.refresh_expires_in = Some(secs);
        self
    }

    pub fn with_refresh_callback(mut self, callback: Arc<dyn RefreshAccessToken>) -> Self {
        self.refresh_access_token = Some(callback);
        self
    }
}

/// Holds a bearer token and renews it through a caller-supplied callback.
///
/// The token state is locked for the whole refresh, so overlapping
/// `get_token()` calls share a single callback invocation.
pub struct BearerTokenProvider {
    state: Mutex<BearerToken>,
    refresher: Option<Arc<dyn RefreshAccessToken>>,
}

impl std::fmt::Debug for BearerTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BearerTokenProvider")
            .field("refresher", &self.refresher.is_some())
            .finish_non_exhaustive()
    }
}

impl BearerTokenProvider {
    pub fn new(options: BearerTokenOptions) -> Self {
        let access_token = options.access_token.unwrap_or_default();
        let expires_at =
            compute_expiry(options.expires_in, Some(&access_token), expiry_buffer());
        let refresh_expires_at = compute_expiry(
            options.refresh_expires_in,
            options.refresh_token.as_deref(),
            TimeDelta::zero(),
        );

        Self {
            state: Mutex::new(BearerToken {
                access_token,
                refresh_token: options.refresh_token,
                expires_at,
                refresh_expires_at,
            }),
            refresher: options.refresh_access_token,
        }
    }

    /// Get the current access token, refreshing it when expired.
    pub async fn get_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        if !state.is_expired() {
            return Ok(state.access_token.clone());
        }
        self.refresh_locked(&mut state).await
    }

    /// Force a refresh attempt.
    ///
    /// Without a callback, or with a refresh token that has itself expired,
    /// the current (possibly stale) access token is returned unchanged.
    pub async fn refresh(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        self.refresh_locked(&mut state).await
    }

    async fn refresh_locked(&self, state: &mut BearerToken) -> Result<String> {
        let Some(refresher) = &self.refresher else {
            tracing::debug!("no refresh callback configured, using current token");
            return Ok(state.access_token.clone());
        };

        if state.refresh_token.is_some() && state.is_refresh_expired() {
            tracing::warn!("refresh token expired, using current token");
            return Ok(state.access_token.clone());
        }

        tracing::info!("Token expired, refreshing...");
        let response = refresher.refresh(state.refresh_token.clone()).await?;
        state.apply(&response);
        tracing::info!(expires_at = %state.expires_at, "Token refreshed successfully");
        Ok(state.access_token.clone())
    }

    /// Store tokens obtained elsewhere (e.g. an initial code exchange).
    pub async fn apply_response(&self, response: &TokenResponse) {
        self.state.lock().await.apply(response);
    }

    /// Snapshot of the current token state.
    pub async fn token(&self) -> BearerToken {
        self.state.lock().await.clone()
    }
}

#[async_trait]
impl TokenProvider for BearerTokenProvider {
    async fn get_token(&self) -> Result<String> {
        BearerTokenProvider::get_token(self).await
    }
}

// ============================================================================
// ClientCredentialsProvider
// ============================================================================

/// Fetches and caches client-credentials tokens.
#[derive(Debug)]
pub struct ClientCredentialsProvider {
    exchanger: Arc<dyn TokenExchanger>,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    cached: Mutex<Option<(String, DateTime<Utc>)>>,
}

impl ClientCredentialsProvider {
    pub fn new(
        exchanger: Arc<dyn TokenExchanger>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            exchanger,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes: Vec::new(),
            cached: Mutex::new(None),
        }
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        self.scopes = scopes;
        self
    }
}

#[async_trait]
impl TokenProvider for ClientCredentialsProvider {
    async fn get_token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some((token, expires_at)) = cached.as_ref()
            && Utc::now() < *expires_at
        {
            return Ok(token.clone());
        }

        tracing::debug!(client_id = %self.client_id, "fetching client credentials token");
        let request = TokenRequest::client_credentials(&self.client_id, &self.client_secret)
            .with_scopes(self.scopes.clone());
        let response = self.exchanger.exchange(&request).await?;
        if response.access_token.is_empty() {
            return Err(AuthError::InvalidResponse {
                status: 200,
                body: "token response has an empty access_token".to_string(),
            });
        }

        let expires_at = compute_expiry(
            response.expires_in,
            Some(&response.access_token),
            expiry_buffer(),
        );
        *cached = Some((response.access_token.clone(), expires_at));
        Ok(response.access_token)
    }
}
