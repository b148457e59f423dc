//! Client SDK for the Corti platform.
//!
//! Resolves where and as whom to connect, keeps a bearer token fresh, and
//! opens transcription streams that survive dropped connections.
//!
//! # Example
//!
//! ```no_run
//! use corti_client::{ConnectOptions, CortiClient, Result, SocketEvent, StreamConnector};
//!
//! # async fn example() -> Result<()> {
//! let client = CortiClient::builder()
//!     .environment("eu")
//!     .tenant_name("acme")
//!     .client_credentials("my-client", "secret")
//!     .build()?;
//!
//! let configuration = serde_json::json!({"primaryLanguage": "en"});
//! let mut session = client
//!     .transcribe()
//!     .connect(ConnectOptions::with_configuration(configuration))
//!     .await?;
//!
//! while let Some(event) = session.next_event().await {
//!     match event {
//!         SocketEvent::Message(payload) => println!("{payload:?}"),
//!         SocketEvent::Error(e) => eprintln!("stream error: {e}"),
//!         _ => {}
//!     }
//! }
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`options`]: environment and tenant resolution from construction options
//! - [`client`]: builder, token source selection, authenticated requests
//! - [`config`]: YAML client config with `CORTI_*` overrides
//! - [`stream`]: reconnecting socket, configuration handshake, subprotocol encoding
//! - [`api`]: transcribe and interaction stream connectors

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod options;
pub mod stream;

pub use api::{ConnectOptions, ProxyOptions, ProxyProtocols, StreamConnector, StreamsApi, TranscribeApi};
pub use client::{ClientBuilder, CortiClient, RequestContext};
pub use config::{AuthConfig, ClientConfig, load_client_config, load_client_config_from};
pub use error::{Error, Result, StreamError};
pub use options::{AuthOptions, ClientOptions, ResolvedClientOptions};
pub use stream::{
    Payload, ReconnectingSocket, SessionState, SocketConfig, SocketEvent, SocketState,
    SocketTarget, StreamSession,
};

pub use corti_auth;
