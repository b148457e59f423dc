//! OAuth 2.0 token lifecycle for the Corti platform.
//!
//! Obtains and renews the bearer tokens that the REST and streaming clients
//! attach to their requests.
//!
//! # Components
//!
//! - [`claims`]: unverified token decoding of issuer-derived environment/tenant hints and expiry
//! - [`environment`]: named regions and custom endpoint URL sets
//! - [`oauth`]: token endpoint grants, authorization URLs, PKCE
//! - [`token`]: bearer and client-credentials token providers with buffered expiry
//! - [`storage`]: durable key-value store for PKCE state
//! - [`supplier`]: values known now or resolved later from one async call

pub mod claims;
pub mod environment;
pub mod error;
pub mod oauth;
pub mod storage;
pub mod supplier;
pub mod token;

pub use claims::{DecodedTokenClaims, decode_token, token_expiry};
pub use environment::{Environment, EnvironmentSpec};
pub use error::{AuthError, Result, StorageError};
pub use oauth::{
    AuthTokenClient, AuthorizeRequest, CODE_VERIFIER_KEY, GrantType, PkceChallenge,
    RequestOptions, TokenExchanger, TokenRequest, TokenResponse,
};
pub use storage::{FileStore, KeyValueStore, MemoryStore, SharedStore, UnavailableStore};
pub use supplier::Supplier;
pub use token::{
    BearerToken, BearerTokenOptions, BearerTokenProvider, ClientCredentialsProvider,
    RefreshAccessToken, SharedTokenProvider, TokenProvider, refresh_fn,
};
