//! Construction options and their resolution into environment and tenant.
//!
//! Resolution avoids network traffic at construction time. The token
//! endpoint is only contacted early when the caller supplied nothing but a
//! refresh callback and left the environment or tenant unspecified; that one
//! call is deferred until something first needs its result.

use std::sync::Arc;

use corti_auth::supplier::{DeferredValue, deferred_value};
use corti_auth::{
    AuthError, BearerTokenOptions, EnvironmentSpec, RefreshAccessToken, Supplier, TokenResponse,
    decode_token,
};

use crate::error::Result;

/// How the client authenticates.
#[derive(Clone)]
pub enum AuthOptions {
    /// OAuth client credentials; tokens are fetched on demand.
    ClientCredentials {
        client_id: String,
        client_secret: String,
    },
    /// Externally issued token, optionally renewed by a callback.
    Bearer(BearerTokenOptions),
    /// Authorization code obtained from a browser redirect.
    AuthorizationCode {
        client_id: String,
        client_secret: String,
        code: String,
        redirect_uri: String,
    },
    /// Authorization code with a PKCE verifier instead of a client secret.
    Pkce {
        client_id: String,
        code: String,
        redirect_uri: String,
        code_verifier: String,
    },
    /// Resource-owner password credentials.
    Password {
        client_id: String,
        client_secret: Option<String>,
        username: String,
        password: String,
    },
}

impl std::fmt::Debug for AuthOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthOptions::ClientCredentials { client_id, .. } => f
                .debug_struct("ClientCredentials")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            AuthOptions::Bearer(options) => f.debug_tuple("Bearer").field(options).finish(),
            AuthOptions::AuthorizationCode { client_id, .. } => f
                .debug_struct("AuthorizationCode")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            AuthOptions::Pkce { client_id, .. } => f
                .debug_struct("Pkce")
                .field("client_id", client_id)
                .finish_non_exhaustive(),
            AuthOptions::Password {
                client_id,
                username,
                ..
            } => f
                .debug_struct("Password")
                .field("client_id", client_id)
                .field("username", username)
                .finish_non_exhaustive(),
        }
    }
}

/// Where and as whom the client connects.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    pub environment: Option<EnvironmentSpec>,
    pub tenant_name: Option<String>,
    /// REST base URL overriding the environment's.
    pub base_url: Option<String>,
    pub auth: Option<AuthOptions>,
}

impl ClientOptions {
    /// Whether the server is reachable without hints decoded from a token.
    fn reachable_without_token(&self) -> bool {
        self.base_url.is_some() || self.environment.as_ref().is_some_and(EnvironmentSpec::is_custom)
    }
}

/// Environment and tenant, possibly pending on one refresh call.
#[derive(Debug, Clone)]
pub struct ResolvedClientOptions {
    pub environment: Supplier<EnvironmentSpec>,
    pub tenant_name: Supplier<String>,
    /// Tokens produced while resolving, to seed the token provider.
    pub initial_token: Option<Supplier<TokenResponse>>,
}

impl ResolvedClientOptions {
    fn immediate(environment: EnvironmentSpec, tenant_name: String) -> Self {
        Self {
            environment: Supplier::Immediate(environment),
            tenant_name: Supplier::Immediate(tenant_name),
            initial_token: None,
        }
    }
}

fn invalid_token_error() -> AuthError {
    AuthError::Config(
        "auth.access_token is not a token issued by a Corti realm; \
         set environment and tenant_name, an environment object, or base_url"
            .to_string(),
    )
}

/// Resolve environment and tenant for the given options.
pub fn resolve(options: &ClientOptions) -> Result<ResolvedClientOptions> {
    let explicit_env = options.environment.clone();
    let explicit_tenant = options.tenant_name.clone();

    let bearer = match &options.auth {
        Some(AuthOptions::Bearer(bearer)) => bearer,
        // Grant-based modes fetch tokens with the explicit tenant and environment.
        _ => {
            return Ok(ResolvedClientOptions::immediate(
                explicit_env.unwrap_or_default(),
                explicit_tenant.unwrap_or_default(),
            ));
        }
    };

    if let Some(access_token) = &bearer.access_token {
        let decoded = decode_token(access_token);
        if decoded.is_none() && !options.reachable_without_token() {
            return Err(invalid_token_error().into());
        }
        let (env_hint, tenant_hint) = decoded
            .map(|claims| (claims.environment, claims.tenant_name))
            .unwrap_or_default();

        return Ok(ResolvedClientOptions::immediate(
            explicit_env
                .or(env_hint.map(EnvironmentSpec::Named))
                .unwrap_or_default(),
            explicit_tenant.or(tenant_hint).unwrap_or_default(),
        ));
    }

    let Some(callback) = bearer.refresh_access_token.clone() else {
        // Neither a token nor a way to get one: nothing to decode.
        return Ok(ResolvedClientOptions::immediate(
            explicit_env.unwrap_or_default(),
            explicit_tenant.unwrap_or_default(),
        ));
    };

    if let (Some(env), Some(tenant)) = (&explicit_env, &explicit_tenant) {
        tracing::debug!("environment and tenant given, skipping initial token refresh");
        return Ok(ResolvedClientOptions::immediate(env.clone(), tenant.clone()));
    }

    let shared = initial_refresh(
        callback,
        bearer.refresh_token.clone(),
        explicit_env,
        explicit_tenant,
        options.reachable_without_token(),
    );

    Ok(ResolvedClientOptions {
        environment: Supplier::map_deferred(shared.clone(), |(env, _, _)| env),
        tenant_name: Supplier::map_deferred(shared.clone(), |(_, tenant, _)| tenant),
        initial_token: Some(Supplier::map_deferred(shared, |(_, _, tokens)| tokens)),
    })
}

type InitialRefresh = (EnvironmentSpec, String, TokenResponse);

/// One deferred callback invocation shared by every value derived from it.
fn initial_refresh(
    callback: Arc<dyn RefreshAccessToken>,
    refresh_token: Option<String>,
    explicit_env: Option<EnvironmentSpec>,
    explicit_tenant: Option<String>,
    reachable: bool,
) -> DeferredValue<InitialRefresh> {
    deferred_value(async move {
        tracing::debug!("resolving environment and tenant from refresh callback");
        let tokens = callback.refresh(refresh_token).await?;
        let decoded = decode_token(&tokens.access_token);
        if decoded.is_none() && !reachable {
            return Err(invalid_token_error());
        }
        let (env_hint, tenant_hint) = decoded
            .map(|claims| (claims.environment, claims.tenant_name))
            .unwrap_or_default();

        let env = explicit_env
            .or(env_hint.map(EnvironmentSpec::Named))
            .unwrap_or_default();
        let tenant = explicit_tenant.or(tenant_hint).unwrap_or_default();
        Ok((env, tenant, tokens))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
    use corti_auth::{Environment, refresh_fn};
    use std::sync::atomic::{AtomicU32, Ordering};

    fn token_for(env: &str, tenant: &str) -> String {
        let claims = serde_json::json!({
            "iss": format!("https://keycloak.{env}.corti.app/realms/{tenant}"),
            "exp": 4_000_000_000i64,
        });
        format!(
            "e30.{}.sig",
            URL_SAFE_NO_PAD.encode(claims.to_string())
        )
    }

    fn counting_callback(calls: Arc<AtomicU32>, token: String) -> Arc<dyn RefreshAccessToken> {
        refresh_fn(move |_| {
            let calls = calls.clone();
            let token = token.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(TokenResponse {
                    expires_in: Some(300),
                    ..TokenResponse::bearer(token)
                })
            }
        })
    }

    fn bearer(token: &str) -> Option<AuthOptions> {
        Some(AuthOptions::Bearer(BearerTokenOptions::new(token)))
    }

    #[tokio::test]
    async fn test_client_credentials_pass_through() {
        let options = ClientOptions {
            environment: Some("us".into()),
            tenant_name: Some("acme".into()),
            auth: Some(AuthOptions::ClientCredentials {
                client_id: "cid".into(),
                client_secret: "secret".into(),
            }),
            ..Default::default()
        };
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.environment.now(), Some("us".into()));
        assert_eq!(resolved.tenant_name.now().as_deref(), Some("acme"));
        assert!(resolved.initial_token.is_none());
    }

    #[test]
    fn test_no_auth_defaults_to_empty() {
        let resolved = resolve(&ClientOptions::default()).unwrap();
        assert_eq!(resolved.environment.now(), Some(EnvironmentSpec::Named(String::new())));
        assert_eq!(resolved.tenant_name.now().as_deref(), Some(""));
    }

    #[test]
    fn test_bearer_decodes_hints() {
        let options = ClientOptions {
            auth: bearer(&token_for("eu", "acme")),
            ..Default::default()
        };
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.environment.now(), Some("eu".into()));
        assert_eq!(resolved.tenant_name.now().as_deref(), Some("acme"));
    }

    #[test]
    fn test_bearer_explicit_values_win() {
        let options = ClientOptions {
            environment: Some("us".into()),
            tenant_name: Some("other".into()),
            auth: bearer(&token_for("eu", "acme")),
            ..Default::default()
        };
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.environment.now(), Some("us".into()));
        assert_eq!(resolved.tenant_name.now().as_deref(), Some("other"));
    }

    #[test]
    fn test_bearer_invalid_token_is_config_error() {
        let options = ClientOptions {
            environment: Some("eu".into()),
            tenant_name: Some("acme".into()),
            auth: bearer("no_token"),
            ..Default::default()
        };
        let err = resolve(&options).unwrap_err();
        assert!(err.is_config_error());
        assert!(err.to_string().contains("auth.access_token"));
    }

    #[test]
    fn test_bearer_invalid_token_with_base_url() {
        let options = ClientOptions {
            base_url: Some("https://proxy.local".into()),
            tenant_name: Some("acme".into()),
            auth: bearer("no_token"),
            ..Default::default()
        };
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.tenant_name.now().as_deref(), Some("acme"));
        assert_eq!(resolved.environment.now(), Some(EnvironmentSpec::default()));
    }

    #[test]
    fn test_bearer_invalid_token_with_custom_environment() {
        let custom = Environment {
            base: "http://b".into(),
            wss: "ws://w".into(),
            login: "http://l".into(),
        };
        let options = ClientOptions {
            environment: Some(custom.clone().into()),
            auth: bearer("no_token"),
            ..Default::default()
        };
        let resolved = resolve(&options).unwrap();
        assert_eq!(resolved.environment.now(), Some(EnvironmentSpec::Custom(custom)));
        assert_eq!(resolved.tenant_name.now().as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_refresh_only_with_explicit_values_skips_callback() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = ClientOptions {
            environment: Some("eu".into()),
            tenant_name: Some("acme".into()),
            auth: Some(AuthOptions::Bearer(BearerTokenOptions::refresh_only(
                counting_callback(calls.clone(), token_for("us", "x")),
            ))),
            ..Default::default()
        };
        let resolved = resolve(&options).unwrap();
        assert!(!resolved.environment.is_deferred());
        assert_eq!(resolved.environment.resolve().await.unwrap(), "eu".into());
        assert_eq!(resolved.tenant_name.resolve().await.unwrap(), "acme");
        assert!(resolved.initial_token.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_refresh_only_resolves_from_one_call() {
        let calls = Arc::new(AtomicU32::new(0));
        let token = token_for("us", "acme");
        let options = ClientOptions {
            environment: Some("eu".into()),
            auth: Some(AuthOptions::Bearer(BearerTokenOptions::refresh_only(
                counting_callback(calls.clone(), token.clone()),
            ))),
            ..Default::default()
        };
        let resolved = resolve(&options).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(resolved.tenant_name.is_deferred());

        // Explicit environment still wins over the decoded hint.
        assert_eq!(resolved.environment.resolve().await.unwrap(), "eu".into());
        assert_eq!(resolved.tenant_name.resolve().await.unwrap(), "acme");
        let initial = resolved.initial_token.unwrap().resolve().await.unwrap();
        assert_eq!(initial.access_token, token);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_only_invalid_token_fails_lazily() {
        let calls = Arc::new(AtomicU32::new(0));
        let options = ClientOptions {
            auth: Some(AuthOptions::Bearer(BearerTokenOptions::refresh_only(
                counting_callback(calls.clone(), "opaque".into()),
            ))),
            ..Default::default()
        };
        let resolved = resolve(&options).unwrap();
        let err = resolved.tenant_name.resolve().await.unwrap_err();
        assert!(matches!(err, AuthError::Config(_)));
    }
}
