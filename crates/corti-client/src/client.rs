//! Main client implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use corti_auth::{
    AuthError, AuthTokenClient, BearerTokenOptions, BearerTokenProvider,
    ClientCredentialsProvider, Environment, EnvironmentSpec, SharedTokenProvider, Supplier,
    TokenExchanger, TokenProvider, TokenRequest, TokenResponse, refresh_fn,
};
use reqwest::Method;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::api::{StreamsApi, TranscribeApi};
use crate::error::{Error, Result};
use crate::options::{self, AuthOptions, ClientOptions, ResolvedClientOptions};
use crate::stream::SocketConfig;

/// Default timeout for requests.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Header carrying the tenant on every request.
pub const TENANT_HEADER: &str = "Tenant-Name";

const SDK_NAME: &str = "corti-client";
const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Corti API client.
///
/// Holds the resolved environment and tenant, a token provider for the
/// configured auth mode, and the settings shared by REST calls and streams.
///
/// # Example
///
/// ```no_run
/// use corti_client::CortiClient;
///
/// # async fn example() -> corti_client::Result<()> {
/// let client = CortiClient::builder()
///     .environment("eu")
///     .tenant_name("acme")
///     .client_credentials("my-client", "secret")
///     .build()?;
///
/// let interactions: serde_json::Value = client.get("interactions").await?;
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CortiClient {
    /// Inner shared state.
    inner: Arc<ClientInner>,
}

/// Inner client state (shared across clones).
pub(crate) struct ClientInner {
    pub(crate) http: reqwest::Client,
    pub(crate) environment: Supplier<EnvironmentSpec>,
    pub(crate) tenant_name: Supplier<String>,
    pub(crate) base_url: Option<String>,
    pub(crate) token_provider: Option<SharedTokenProvider>,
    /// SDK and caller headers, in insertion order.
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) timeout: Duration,
    pub(crate) with_credentials: bool,
    pub(crate) encode_headers_as_ws_protocols: bool,
    pub(crate) socket_config: SocketConfig,
}

impl std::fmt::Debug for CortiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CortiClient")
            .field("environment", &self.inner.environment)
            .field("tenant_name", &self.inner.tenant_name)
            .field("base_url", &self.inner.base_url)
            .field("token_provider", &self.inner.token_provider)
            .field("timeout", &self.inner.timeout)
            .finish_non_exhaustive()
    }
}

/// Per-call settings for REST requests.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Attach the bearer token. Defaults to the client's setting.
    pub with_credentials: Option<bool>,
    /// Overrides the client's timeout.
    pub timeout: Option<Duration>,
    /// Aborts the request when cancelled.
    pub cancel: Option<CancellationToken>,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
}

impl CortiClient {
    pub(crate) fn inner(&self) -> &ClientInner {
        &self.inner
    }

    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Environment, possibly pending on an initial token refresh.
    pub fn environment(&self) -> &Supplier<EnvironmentSpec> {
        &self.inner.environment
    }

    /// Tenant, possibly pending on an initial token refresh.
    pub fn tenant_name(&self) -> &Supplier<String> {
        &self.inner.tenant_name
    }

    pub fn token_provider(&self) -> Option<&SharedTokenProvider> {
        self.inner.token_provider.as_ref()
    }

    /// A currently valid access token.
    pub async fn token(&self) -> Result<String> {
        let provider = self
            .inner
            .token_provider
            .as_ref()
            .ok_or_else(|| Error::Config("No auth configured".to_string()))?;
        Ok(provider.get_token().await?)
    }

    /// Endpoint URLs of the resolved environment.
    pub async fn environment_urls(&self) -> Result<Environment> {
        let environment = self.inner.environment.resolve().await?;
        if matches!(&environment, EnvironmentSpec::Named(name) if name.is_empty()) {
            return Err(Error::Config("environment is not set".to_string()));
        }
        Ok(environment.urls())
    }

    /// Token endpoint client for the resolved environment and tenant, for
    /// authorization-code and PKCE flows.
    pub async fn auth_client(&self) -> Result<AuthTokenClient> {
        let environment = self.environment_urls().await?;
        let tenant = self.inner.tenant_name.resolve().await?;
        Ok(AuthTokenClient::with_http(
            self.inner.http.clone(),
            &environment,
            tenant,
        ))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Stream connectors
    // ─────────────────────────────────────────────────────────────────────────

    /// Access the transcription stream API.
    pub fn transcribe(&self) -> TranscribeApi {
        TranscribeApi::new(self.clone())
    }

    /// Access the stream of one interaction.
    pub fn streams(&self, interaction_id: impl Into<String>) -> StreamsApi {
        StreamsApi::new(self.clone(), interaction_id)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Authenticated requests
    // ─────────────────────────────────────────────────────────────────────────

    /// Build a URL for an API path.
    pub async fn url(&self, path: &str) -> Result<Url> {
        let base = match &self.inner.base_url {
            Some(base_url) => base_url.clone(),
            None => self.environment_urls().await?.base,
        };
        let url = format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&url)?)
    }

    /// Start an authenticated request.
    ///
    /// Adds the `Tenant-Name` header and, unless credentials are disabled for
    /// this call, `Authorization: Bearer <token>`.
    pub async fn request(
        &self,
        method: Method,
        path: &str,
        context: &RequestContext,
    ) -> Result<reqwest::RequestBuilder> {
        let url = self.url(path).await?;
        let mut builder = self
            .inner
            .http
            .request(method, url)
            .timeout(context.timeout.unwrap_or(self.inner.timeout));

        let tenant = self.inner.tenant_name.resolve().await?;
        if !tenant.is_empty() {
            builder = builder.header(TENANT_HEADER, tenant);
        }

        let with_credentials = context
            .with_credentials
            .unwrap_or(self.inner.with_credentials);
        if with_credentials && let Some(provider) = &self.inner.token_provider {
            builder = builder.bearer_auth(provider.get_token().await?);
        }

        for (name, value) in &context.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        Ok(builder)
    }

    /// Send a request built by [`Self::request`], honoring the context's cancellation.
    pub async fn send(
        &self,
        builder: reqwest::RequestBuilder,
        context: &RequestContext,
    ) -> Result<reqwest::Response> {
        let response = match &context.cancel {
            Some(cancel) => tokio::select! {
                _ = cancel.cancelled() => return Err(AuthError::Cancelled.into()),
                response = builder.send() => response?,
            },
            None => builder.send().await?,
        };

        if !response.status().is_success() {
            return Err(extract_error(response).await);
        }
        Ok(response)
    }

    /// Make a GET request.
    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let context = RequestContext::default();
        let builder = self.request(Method::GET, path, &context).await?;
        Ok(self.send(builder, &context).await?.json().await?)
    }

    /// Make a POST request with a JSON body.
    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: serde::Serialize + ?Sized,
    {
        let context = RequestContext::default();
        let builder = self.request(Method::POST, path, &context).await?.json(body);
        Ok(self.send(builder, &context).await?.json().await?)
    }

    /// Make a DELETE request.
    pub async fn delete(&self, path: &str) -> Result<()> {
        let context = RequestContext::default();
        let builder = self.request(Method::DELETE, path, &context).await?;
        self.send(builder, &context).await?;
        Ok(())
    }
}

/// Extract an error from a failed response.
async fn extract_error(response: reqwest::Response) -> Error {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    tracing::debug!(status, "request failed");
    Error::Api { status, body }
}

// ─────────────────────────────────────────────────────────────────────────────
// Token sources
// ─────────────────────────────────────────────────────────────────────────────

/// Bearer provider whose first tokens come from a deferred call.
struct SeededTokenProvider {
    bearer: BearerTokenProvider,
    seed: Supplier<TokenResponse>,
    seeded: OnceCell<()>,
}

impl std::fmt::Debug for SeededTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeededTokenProvider")
            .field("bearer", &self.bearer)
            .field("seeded", &self.seeded.initialized())
            .finish_non_exhaustive()
    }
}

impl SeededTokenProvider {
    fn new(bearer: BearerTokenProvider, seed: Supplier<TokenResponse>) -> Self {
        Self {
            bearer,
            seed,
            seeded: OnceCell::new(),
        }
    }
}

#[async_trait]
impl TokenProvider for SeededTokenProvider {
    async fn get_token(&self) -> corti_auth::Result<String> {
        self.seeded
            .get_or_try_init(|| async {
                let tokens = self.seed.resolve().await?;
                self.bearer.apply_response(&tokens).await;
                Ok::<_, AuthError>(())
            })
            .await?;
        self.bearer.get_token().await
    }
}

/// Bearer provider whose first tokens come from a grant exchange.
///
/// A failed exchange is not remembered; the next call tries again.
struct GrantTokenProvider {
    bearer: BearerTokenProvider,
    exchanger: Arc<dyn TokenExchanger>,
    initial: TokenRequest,
    granted: OnceCell<()>,
}

impl std::fmt::Debug for GrantTokenProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GrantTokenProvider")
            .field("bearer", &self.bearer)
            .field("grant_type", &self.initial.grant_type)
            .field("granted", &self.granted.initialized())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenProvider for GrantTokenProvider {
    async fn get_token(&self) -> corti_auth::Result<String> {
        self.granted
            .get_or_try_init(|| async {
                let tokens = self.exchanger.exchange(&self.initial).await?;
                self.bearer.apply_response(&tokens).await;
                Ok::<_, AuthError>(())
            })
            .await?;
        self.bearer.get_token().await
    }
}

/// Provider for grants that are exchanged once and then renewed with the
/// refresh token. Password grants are repeated when no refresh token exists.
fn exchange_provider(
    exchanger: Arc<dyn TokenExchanger>,
    initial: TokenRequest,
) -> SharedTokenProvider {
    let client_id = initial.client_id.clone();
    let client_secret = initial.client_secret.clone();
    let regrant = matches!(initial.grant_type, corti_auth::GrantType::Password)
        .then(|| initial.clone());

    let refresh_exchanger = exchanger.clone();
    let callback = refresh_fn(move |refresh_token: Option<String>| {
        let exchanger = refresh_exchanger.clone();
        let client_id = client_id.clone();
        let client_secret = client_secret.clone();
        let regrant = regrant.clone();
        async move {
            let request = match (refresh_token, regrant) {
                (Some(refresh_token), _) => {
                    let request = TokenRequest::refresh(client_id, refresh_token);
                    match client_secret {
                        Some(secret) => request.with_client_secret(secret),
                        None => request,
                    }
                }
                (None, Some(initial)) => initial,
                (None, None) => {
                    return Err(AuthError::Refresh(
                        "no refresh token was issued; sign in again".to_string(),
                    ));
                }
            };
            exchanger.exchange(&request).await
        }
    });

    let bearer = BearerTokenProvider::new(BearerTokenOptions::default().with_refresh_callback(callback));
    Arc::new(GrantTokenProvider {
        bearer,
        exchanger,
        initial,
        granted: OnceCell::new(),
    })
}

/// Pick the token source for an auth mode.
fn select_token_provider(
    auth: AuthOptions,
    resolved: &ResolvedClientOptions,
    http: &reqwest::Client,
) -> SharedTokenProvider {
    let exchanger = || -> Arc<dyn TokenExchanger> {
        // Grant-based modes always resolve to immediate values.
        let environment = resolved.environment.now().unwrap_or_default();
        let tenant = resolved.tenant_name.now().unwrap_or_default();
        Arc::new(AuthTokenClient::with_http(
            http.clone(),
            &environment.urls(),
            tenant,
        ))
    };

    match auth {
        AuthOptions::ClientCredentials {
            client_id,
            client_secret,
        } => Arc::new(ClientCredentialsProvider::new(
            exchanger(),
            client_id,
            client_secret,
        )),
        AuthOptions::Bearer(options) => {
            let bearer = BearerTokenProvider::new(options);
            match &resolved.initial_token {
                Some(seed) => Arc::new(SeededTokenProvider::new(bearer, seed.clone())),
                None => Arc::new(bearer),
            }
        }
        AuthOptions::AuthorizationCode {
            client_id,
            client_secret,
            code,
            redirect_uri,
        } => exchange_provider(
            exchanger(),
            TokenRequest::authorization_code(client_id, code, redirect_uri)
                .with_client_secret(client_secret),
        ),
        AuthOptions::Pkce {
            client_id,
            code,
            redirect_uri,
            code_verifier,
        } => exchange_provider(
            exchanger(),
            TokenRequest::authorization_code(client_id, code, redirect_uri)
                .with_code_verifier(code_verifier),
        ),
        AuthOptions::Password {
            client_id,
            client_secret,
            username,
            password,
        } => {
            let request = TokenRequest::password(client_id, username, password);
            let request = match client_secret {
                Some(secret) => request.with_client_secret(secret),
                None => request,
            };
            exchange_provider(exchanger(), request)
        }
    }
}

fn sdk_headers() -> Vec<(String, String)> {
    [
        ("X-Fern-Language", "Rust".to_string()),
        ("X-Fern-SDK-Name", SDK_NAME.to_string()),
        ("X-Fern-SDK-Version", SDK_VERSION.to_string()),
        ("X-Fern-Runtime", "rust".to_string()),
        ("X-Fern-Runtime-Version", env!("CARGO_PKG_RUST_VERSION").to_string()),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value))
    .collect()
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Builder for creating a CortiClient.
#[derive(Debug)]
pub struct ClientBuilder {
    environment: Option<EnvironmentSpec>,
    tenant_name: Option<String>,
    base_url: Option<String>,
    auth: Option<AuthOptions>,
    timeout: Duration,
    headers: Vec<(String, String)>,
    user_agent: Option<String>,
    with_credentials: bool,
    encode_headers_as_ws_protocols: bool,
    socket_config: SocketConfig,
    http: Option<reqwest::Client>,
}

impl ClientBuilder {
    /// Create a new builder with defaults.
    pub fn new() -> Self {
        Self {
            environment: None,
            tenant_name: None,
            base_url: None,
            auth: None,
            timeout: DEFAULT_TIMEOUT,
            headers: Vec::new(),
            user_agent: None,
            with_credentials: true,
            encode_headers_as_ws_protocols: false,
            socket_config: SocketConfig::default(),
            http: None,
        }
    }

    /// Region name (`eu`, `us`) or custom endpoint URLs.
    pub fn environment(mut self, environment: impl Into<EnvironmentSpec>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn tenant_name(mut self, tenant_name: impl Into<String>) -> Self {
        self.tenant_name = Some(tenant_name.into());
        self
    }

    /// REST base URL overriding the environment's.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn auth(mut self, auth: AuthOptions) -> Self {
        self.auth = Some(auth);
        self
    }

    /// Authenticate with OAuth client credentials.
    pub fn client_credentials(
        self,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        self.auth(AuthOptions::ClientCredentials {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        })
    }

    /// Authenticate with an externally issued token.
    pub fn bearer(self, options: BearerTokenOptions) -> Self {
        self.auth(AuthOptions::Bearer(options))
    }

    /// Set the request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Add a header sent with every request.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Set a custom user agent.
    pub fn user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Whether requests carry the bearer token unless a call says otherwise.
    pub fn with_credentials(mut self, enabled: bool) -> Self {
        self.with_credentials = enabled;
        self
    }

    /// Send client headers as WebSocket subprotocols and connect streams in
    /// proxy mode.
    pub fn encode_headers_as_ws_protocols(mut self, enabled: bool) -> Self {
        self.encode_headers_as_ws_protocols = enabled;
        self
    }

    pub fn socket_config(mut self, config: SocketConfig) -> Self {
        self.socket_config = config;
        self
    }

    /// Reconnect attempts allowed per stream.
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.socket_config.max_retries = max_retries;
        self
    }

    /// Log stream state transitions.
    pub fn stream_debug(mut self, debug: bool) -> Self {
        self.socket_config.debug = debug;
        self
    }

    /// Reuse an existing HTTP client.
    pub fn http_client(mut self, http: reqwest::Client) -> Self {
        self.http = Some(http);
        self
    }

    /// Build the client.
    ///
    /// Never contacts the network; an initial token refresh, when needed to
    /// learn the tenant or environment, runs on first use.
    pub fn build(self) -> Result<CortiClient> {
        if let Some(base_url) = &self.base_url {
            Url::parse(base_url)?;
        }

        let user_agent = self
            .user_agent
            .unwrap_or_else(|| format!("{SDK_NAME}/{SDK_VERSION}"));
        let mut headers = sdk_headers();
        headers.push(("User-Agent".to_string(), user_agent.clone()));
        headers.extend(self.headers);

        let http = match self.http {
            Some(http) => http,
            None => {
                let mut default_headers = HeaderMap::new();
                for (name, value) in headers.iter().filter(|(name, _)| name != "User-Agent") {
                    let header_name = HeaderName::from_bytes(name.as_bytes())
                        .map_err(|_| Error::Config(format!("Invalid header name: {name}")))?;
                    let header_value = HeaderValue::from_str(value)
                        .map_err(|_| Error::Config(format!("Invalid value for header {name}")))?;
                    default_headers.insert(header_name, header_value);
                }
                reqwest::Client::builder()
                    .default_headers(default_headers)
                    .user_agent(user_agent)
                    .build()?
            }
        };

        let client_options = ClientOptions {
            environment: self.environment,
            tenant_name: self.tenant_name,
            base_url: self.base_url,
            auth: self.auth,
        };
        let resolved = options::resolve(&client_options)?;
        let token_provider = client_options
            .auth
            .map(|auth| select_token_provider(auth, &resolved, &http));

        Ok(CortiClient {
            inner: Arc::new(ClientInner {
                http,
                environment: resolved.environment,
                tenant_name: resolved.tenant_name,
                base_url: client_options.base_url,
                token_provider,
                headers,
                timeout: self.timeout,
                with_credentials: self.with_credentials,
                encode_headers_as_ws_protocols: self.encode_headers_as_ws_protocols,
                socket_config: self.socket_config,
            }),
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
