//! Stream endpoint connectors.
//!
//! Each connector opens a [`StreamSession`] in one of two modes:
//!
//! - **direct**: the client's token, tenant and environment WebSocket URL;
//!   token and tenant travel as `token` and `tenant-name` query parameters
//! - **proxy**: a caller-chosen URL, subprotocols and query; nothing is
//!   resolved. Used when [`ConnectOptions::proxy`] is set or the client was
//!   built with `encode_headers_as_ws_protocols`.

mod streams;
mod transcribe;

pub use streams::StreamsApi;
pub use transcribe::TranscribeApi;

use async_trait::async_trait;

use crate::client::CortiClient;
use crate::error::{Error, Result};
use crate::stream::{
    HeaderEntry, ReconnectingSocket, SocketTarget, StreamSession, encode, encode_protocols, header,
};

/// Subprotocols declared for a proxy connection.
#[derive(Debug, Clone, Default)]
pub enum ProxyProtocols {
    #[default]
    None,
    /// Passed through verbatim.
    List(Vec<String>),
    /// Encoded as `name, value` token pairs.
    Headers(Vec<HeaderEntry>),
}

/// Connection details when going through a proxy.
#[derive(Debug, Clone, Default)]
pub struct ProxyOptions {
    /// Defaults to the endpoint's URL in the client's environment.
    pub url: Option<String>,
    pub protocols: ProxyProtocols,
    pub query: Vec<(String, String)>,
}

impl ProxyOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: Some(url.into()),
            ..Default::default()
        }
    }

    pub fn with_protocols(mut self, protocols: Vec<String>) -> Self {
        self.protocols = ProxyProtocols::List(protocols);
        self
    }

    pub fn with_protocol_headers(mut self, headers: Vec<HeaderEntry>) -> Self {
        self.protocols = ProxyProtocols::Headers(headers);
        self
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((name.into(), value.into()));
        self
    }
}

/// Arguments for opening a stream.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    /// Sent automatically after every open.
    pub configuration: Option<serde_json::Value>,
    pub proxy: Option<ProxyOptions>,
}

impl ConnectOptions {
    pub fn with_configuration(configuration: serde_json::Value) -> Self {
        Self {
            configuration: Some(configuration),
            proxy: None,
        }
    }

    pub fn proxy(mut self, proxy: ProxyOptions) -> Self {
        self.proxy = Some(proxy);
        self
    }
}

/// A WebSocket endpoint that opens stream sessions.
#[async_trait]
pub trait StreamConnector: Send + Sync {
    fn client(&self) -> &CortiClient;

    /// Path below the environment's WebSocket base.
    fn path(&self) -> String;

    /// Open a session. The socket connects in the background; watch
    /// [`StreamSession::next_event`] for `Open`.
    async fn connect(&self, options: ConnectOptions) -> Result<StreamSession> {
        let client = self.client();
        let proxy_mode =
            options.proxy.is_some() || client.inner().encode_headers_as_ws_protocols;

        let target = if proxy_mode {
            proxy_target(client, &self.path(), options.proxy.unwrap_or_default()).await?
        } else {
            direct_target(client, &self.path()).await?
        };

        tracing::debug!(?target, proxy_mode, "opening stream");
        let socket = ReconnectingSocket::connect(target, client.inner().socket_config.clone())?;
        Ok(StreamSession::new(socket, options.configuration))
    }
}

fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}

async fn direct_target(client: &CortiClient, path: &str) -> Result<SocketTarget> {
    let provider = client.token_provider().ok_or_else(|| {
        Error::Config("Direct stream connections need auth; configure auth or use a proxy".into())
    })?;
    let token = provider.get_token().await?;
    let tenant = client.tenant_name().resolve().await?;
    let environment = client.environment_urls().await?;

    let mut target = SocketTarget::new(join_url(&environment.wss, path))
        .with_query("tenant-name", tenant)
        .with_query("token", format!("Bearer {token}"));
    for (name, value) in &client.inner().headers {
        target = target.with_header(name, value);
    }
    Ok(target)
}

async fn proxy_target(client: &CortiClient, path: &str, proxy: ProxyOptions) -> Result<SocketTarget> {
    let url = match proxy.url {
        Some(url) => url,
        None => join_url(&client.environment_urls().await?.wss, path),
    };

    let client_headers: Vec<HeaderEntry> = if client.inner().encode_headers_as_ws_protocols {
        client
            .inner()
            .headers
            .iter()
            .map(|(name, value)| header(name, value))
            .collect()
    } else {
        Vec::new()
    };
    let protocols = match proxy.protocols {
        ProxyProtocols::None => encode(&client_headers, true).await?,
        ProxyProtocols::List(list) => [encode(&client_headers, true).await?, list].concat(),
        ProxyProtocols::Headers(headers) => encode_protocols(&client_headers, &headers).await?,
    };

    let mut target = SocketTarget::new(url).with_protocols(protocols);
    target.query = proxy.query;
    Ok(target)
}
