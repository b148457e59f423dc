//! OAuth 2.0 token endpoint exchange, authorization URLs, and PKCE.

use std::time::Duration;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio_util::sync::CancellationToken;

use crate::environment::Environment;
use crate::error::{AuthError, Result};
use crate::storage::KeyValueStore;

/// Default timeout for token endpoint requests (milliseconds).
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;

/// Store key holding the PKCE code verifier between redirect and exchange.
pub const CODE_VERIFIER_KEY: &str = "corti_sdk_code_verifier";

/// Header conveying the tenant to the token endpoint.
pub const TENANT_HEADER: &str = "Tenant-Name";

// ============================================================================
// Requests and responses
// ============================================================================

/// OAuth2 grant type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrantType {
    ClientCredentials,
    AuthorizationCode,
    RefreshToken,
    Password,
}

impl GrantType {
    pub fn as_str(self) -> &'static str {
        match self {
            GrantType::ClientCredentials => "client_credentials",
            GrantType::AuthorizationCode => "authorization_code",
            GrantType::RefreshToken => "refresh_token",
            GrantType::Password => "password",
        }
    }
}

/// A token endpoint request.
///
/// Grant-specific fields are only sent for the grant that uses them.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    pub grant_type: GrantType,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl TokenRequest {
    fn new(grant_type: GrantType, client_id: impl Into<String>) -> Self {
        Self {
            grant_type,
            client_id: client_id.into(),
            client_secret: None,
            scopes: Vec::new(),
            code: None,
            redirect_uri: None,
            code_verifier: None,
            refresh_token: None,
            username: None,
            password: None,
        }
    }

    pub fn client_credentials(client_id: impl Into<String>, client_secret: impl Into<String>) -> Self {
        Self::new(GrantType::ClientCredentials, client_id).with_client_secret(client_secret)
    }

    pub fn authorization_code(
        client_id: impl Into<String>,
        code: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Self {
        let mut request = Self::new(GrantType::AuthorizationCode, client_id);
        request.code = Some(code.into());
        request.redirect_uri = Some(redirect_uri.into());
        request
    }

    pub fn refresh(client_id: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        let mut request = Self::new(GrantType::RefreshToken, client_id);
        request.refresh_token = Some(refresh_token.into());
        request
    }

    pub fn password(
        client_id: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let mut request = Self::new(GrantType::Password, client_id);
        request.username = Some(username.into());
        request.password = Some(password.into());
        request
    }

    pub fn with_client_secret(mut self, secret: impl Into<String>) -> Self {
        self.client_secret = Some(secret.into());
        self
    }

    pub fn with_code_verifier(mut self, verifier: impl Into<String>) -> Self {
        self.code_verifier = Some(verifier.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    /// The `application/x-www-form-urlencoded` fields for this request.
    pub fn form_fields(&self) -> Vec<(&'static str, String)> {
        let mut fields = vec![("grant_type", self.grant_type.as_str().to_string())];

        match self.grant_type {
            GrantType::AuthorizationCode => {
                push_opt(&mut fields, "code", &self.code);
                push_opt(&mut fields, "redirect_uri", &self.redirect_uri);
                push_opt(&mut fields, "code_verifier", &self.code_verifier);
            }
            GrantType::RefreshToken => push_opt(&mut fields, "refresh_token", &self.refresh_token),
            GrantType::Password => {
                push_opt(&mut fields, "username", &self.username);
                push_opt(&mut fields, "password", &self.password);
            }
            GrantType::ClientCredentials => {}
        }

        fields.push(("scope", merge_scopes(&["openid"], &self.scopes)));
        fields.push(("client_id", self.client_id.clone()));
        push_opt(&mut fields, "client_secret", &self.client_secret);
        fields
    }
}

fn push_opt(fields: &mut Vec<(&'static str, String)>, name: &'static str, value: &Option<String>) {
    if let Some(value) = value {
        fields.push((name, value.clone()));
    }
}

/// Join base scopes and extra scopes, dropping duplicates but keeping order.
pub fn merge_scopes(base: &[&str], extra: &[String]) -> String {
    let mut merged: Vec<&str> = Vec::with_capacity(base.len() + extra.len());
    for scope in base.iter().copied().chain(extra.iter().map(String::as_str)) {
        if !scope.is_empty() && !merged.contains(&scope) {
            merged.push(scope);
        }
    }
    merged.join(" ")
}

/// Tokens returned from the token endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<u64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub refresh_expires_in: Option<u64>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

impl TokenResponse {
    /// A bare response carrying only an access token.
    pub fn bearer(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            token_type: default_token_type(),
            expires_in: None,
            refresh_token: None,
            refresh_expires_in: None,
            id_token: None,
            scope: None,
        }
    }
}

/// Per-call options for token endpoint requests.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// Overrides the client's tenant for the `Tenant-Name` header.
    pub tenant_name: Option<String>,
    /// Overrides the client's timeout.
    pub timeout: Option<Duration>,
    /// Aborts the in-flight request when cancelled.
    pub cancel: Option<CancellationToken>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
}

// ============================================================================
// AuthTokenClient
// ============================================================================

/// Anything that can turn a [`TokenRequest`] into tokens.
#[async_trait]
pub trait TokenExchanger: Send + Sync + std::fmt::Debug {
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse>;
}

/// Client for a tenant's OpenID Connect endpoints.
#[derive(Debug, Clone)]
pub struct AuthTokenClient {
    http: reqwest::Client,
    login_base: String,
    tenant_name: String,
    timeout: Duration,
}

impl AuthTokenClient {
    /// Create a client for `tenant_name` within `environment`.
    pub fn new(environment: &Environment, tenant_name: impl Into<String>) -> Self {
        Self::with_http(reqwest::Client::new(), environment, tenant_name)
    }

    /// Create a client reusing an existing HTTP client.
    pub fn with_http(
        http: reqwest::Client,
        environment: &Environment,
        tenant_name: impl Into<String>,
    ) -> Self {
        Self {
            http,
            login_base: environment.login.trim_end_matches('/').to_string(),
            tenant_name: tenant_name.into(),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }

    /// Set the default request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tenant_name(&self) -> &str {
        &self.tenant_name
    }

    /// `{login}/{tenant}/protocol/openid-connect/token`
    pub fn token_url(&self) -> String {
        format!(
            "{}/{}/protocol/openid-connect/token",
            self.login_base, self.tenant_name
        )
    }

    /// `{login}/{tenant}/protocol/openid-connect/auth`
    pub fn auth_url(&self) -> String {
        format!(
            "{}/{}/protocol/openid-connect/auth",
            self.login_base, self.tenant_name
        )
    }

    /// Exchange a grant at the token endpoint.
    pub async fn request_token(
        &self,
        request: &TokenRequest,
        options: &RequestOptions,
    ) -> Result<TokenResponse> {
        let timeout = options.timeout.unwrap_or(self.timeout);
        let timeout_ms = timeout_millis(timeout);
        let tenant = options.tenant_name.as_deref().unwrap_or(&self.tenant_name);

        let mut builder = self
            .http
            .post(self.token_url())
            .header(TENANT_HEADER, tenant)
            .form(&request.form_fields())
            .timeout(timeout);
        for (name, value) in &options.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }

        tracing::debug!(
            grant_type = request.grant_type.as_str(),
            tenant,
            "requesting token"
        );

        let exchange = async {
            let response = builder.send().await?;
            let status = response.status();
            let body = response.text().await?;
            Ok::<_, reqwest::Error>((status, body))
        };

        let outcome = match &options.cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => return Err(AuthError::Cancelled),
                outcome = exchange => outcome,
            },
            None => exchange.await,
        };

        let (status, body) = outcome.map_err(|e| {
            if e.is_timeout() {
                AuthError::Timeout { timeout_ms }
            } else {
                AuthError::from(e)
            }
        })?;

        if !status.is_success() {
            tracing::warn!(status = status.as_u16(), "token request rejected");
            return Err(AuthError::ApiStatus {
                status: status.as_u16(),
                body,
            });
        }

        serde_json::from_str(&body).map_err(|_| AuthError::InvalidResponse {
            status: status.as_u16(),
            body,
        })
    }

    /// Build the authorization URL, optionally opening it in the system browser.
    pub fn authorize_url(&self, request: &AuthorizeRequest) -> String {
        let scope = merge_scopes(&["openid", "profile"], &request.scopes);
        let mut params: Vec<(&str, &str)> = vec![
            ("response_type", "code"),
            ("scope", &scope),
            ("client_id", &request.client_id),
            ("redirect_uri", &request.redirect_uri),
        ];
        if let Some(challenge) = &request.code_challenge {
            params.push(("code_challenge", challenge));
            params.push(("code_challenge_method", "S256"));
        }

        let query = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        let url = format!("{}?{}", self.auth_url(), query);

        if request.open_browser
            && let Err(e) = open_url(&url)
        {
            tracing::warn!(error = %e, "could not open browser");
        }

        url
    }

    /// Start a PKCE flow: store a fresh verifier and return the authorization URL.
    pub fn authorize_pkce_url(
        &self,
        store: &dyn KeyValueStore,
        request: AuthorizeRequest,
    ) -> Result<String> {
        let verifier = generate_code_verifier(store)?;
        let request = request.with_code_challenge(code_challenge(&verifier));
        Ok(self.authorize_url(&request))
    }

    /// Finish a PKCE flow with the verifier stored by [`Self::authorize_pkce_url`].
    pub async fn exchange_pkce_code(
        &self,
        store: &dyn KeyValueStore,
        client_id: &str,
        code: &str,
        redirect_uri: &str,
    ) -> Result<TokenResponse> {
        let verifier = stored_code_verifier(store)?.ok_or_else(|| {
            AuthError::Config(
                "missing PKCE code verifier; start the flow with authorize_pkce_url".to_string(),
            )
        })?;

        let request = TokenRequest::authorization_code(client_id, code, redirect_uri)
            .with_code_verifier(verifier);
        let tokens = self
            .request_token(&request, &RequestOptions::default())
            .await?;
        store.remove(CODE_VERIFIER_KEY)?;
        Ok(tokens)
    }
}

#[async_trait]
impl TokenExchanger for AuthTokenClient {
    async fn exchange(&self, request: &TokenRequest) -> Result<TokenResponse> {
        self.request_token(request, &RequestOptions::default()).await
    }
}

/// Parameters for an authorization URL.
#[derive(Debug, Clone)]
pub struct AuthorizeRequest {
    pub client_id: String,
    pub redirect_uri: String,
    pub code_challenge: Option<String>,
    pub scopes: Vec<String>,
    /// Launch the system browser at the URL. Off by default.
    pub open_browser: bool,
}

impl AuthorizeRequest {
    pub fn new(client_id: impl Into<String>, redirect_uri: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            code_challenge: None,
            scopes: Vec::new(),
            open_browser: false,
        }
    }

    pub fn with_code_challenge(mut self, challenge: impl Into<String>) -> Self {
        self.code_challenge = Some(challenge.into());
        self
    }

    pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn open_browser(mut self, open: bool) -> Self {
        self.open_browser = open;
        self
    }
}

/// Try to open a URL in the default browser.
fn open_url(url: &str) -> std::io::Result<()> {
    #[cfg(target_os = "macos")]
    {
        std::process::Command::new("open").arg(url).status()?;
    }
    #[cfg(target_os = "linux")]
    {
        std::process::Command::new("xdg-open").arg(url).status()?;
    }
    #[cfg(target_os = "windows")]
    {
        std::process::Command::new("cmd")
            .args(["/C", "start", url])
            .status()?;
    }
    Ok(())
}

// ============================================================================
// PKCE
// ============================================================================

/// PKCE code verifier and challenge pair.
#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    /// Generate a new PKCE challenge pair.
    pub fn generate() -> Self {
        let mut verifier_bytes = [0u8; 32];
        rand::rng().fill_bytes(&mut verifier_bytes);
        let verifier = URL_SAFE_NO_PAD.encode(verifier_bytes);
        let challenge = code_challenge(&verifier);

        Self {
            verifier,
            challenge,
        }
    }
}

/// base64url(SHA-256(verifier)) without padding.
pub fn code_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Milliseconds for error reporting, saturating at `u64::MAX`.
fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

/// Generate a verifier and persist it under [`CODE_VERIFIER_KEY`].
pub fn generate_code_verifier(store: &dyn KeyValueStore) -> Result<String> {
    let pkce = PkceChallenge::generate();
    store.set(CODE_VERIFIER_KEY, &pkce.verifier)?;
    Ok(pkce.verifier)
}

/// The verifier stored by the last [`generate_code_verifier`] call.
pub fn stored_code_verifier(store: &dyn KeyValueStore) -> Result<Option<String>> {
    Ok(store.get(CODE_VERIFIER_KEY)?)
}
