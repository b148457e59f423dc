//! Client configuration file.
//!
//! ```yaml
//! environment: eu
//! tenant-name: acme
//! auth:
//!   type: client-credentials
//!   client-id: my-client
//!   client-secret-env: CORTI_CLIENT_SECRET
//! timeout: 30
//! stream:
//!   max-retries: 10
//! ```
//!
//! `CORTI_ENVIRONMENT`, `CORTI_TENANT_NAME`, `CORTI_CLIENT_ID` and
//! `CORTI_CLIENT_SECRET` override the file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use corti_auth::{BearerTokenOptions, EnvironmentSpec};
use serde::{Deserialize, Serialize};

use crate::client::ClientBuilder;
use crate::error::{Error, Result};
use crate::options::AuthOptions;

const APP_NAME: &str = "corti";

/// Default config filename.
const CLIENT_CONFIG_FILE: &str = "client.yaml";

/// Overrides the config directory when set.
const CONFIG_DIR_ENV: &str = "CORTI_CONFIG_DIR";

const ENVIRONMENT_ENV: &str = "CORTI_ENVIRONMENT";
const TENANT_ENV: &str = "CORTI_TENANT_NAME";
const CLIENT_ID_ENV: &str = "CORTI_CLIENT_ID";
const CLIENT_SECRET_ENV: &str = "CORTI_CLIENT_SECRET";

/// Root client configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ClientConfig {
    /// Region name or custom `{base, wss, login}` URLs.
    #[serde(default)]
    pub environment: Option<EnvironmentSpec>,

    #[serde(default)]
    pub tenant_name: Option<String>,

    /// REST base URL override, e.g. a proxy.
    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Request timeout (seconds).
    #[serde(default)]
    pub timeout: Option<u64>,

    /// Send client headers as WebSocket subprotocols.
    #[serde(default)]
    pub encode_headers_as_ws_protocols: bool,

    #[serde(default)]
    pub stream: StreamConfig,
}

/// Stream reconnection settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StreamConfig {
    #[serde(default)]
    pub debug: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Authentication settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum AuthConfig {
    #[serde(rename_all = "kebab-case")]
    ClientCredentials {
        client_id: String,
        #[serde(default)]
        client_secret: Option<String>,
        /// Environment variable holding the secret.
        #[serde(default)]
        client_secret_env: Option<String>,
    },

    #[serde(rename_all = "kebab-case")]
    Bearer {
        #[serde(default)]
        access_token: Option<String>,
        /// Environment variable holding the token.
        #[serde(default)]
        access_token_env: Option<String>,
    },
}

impl AuthConfig {
    /// Resolve into client auth options, reading secrets from the environment.
    pub fn resolve(&self) -> Result<AuthOptions> {
        self.resolve_with(|name| std::env::var(name).ok())
    }

    fn resolve_with(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<AuthOptions> {
        match self {
            AuthConfig::ClientCredentials {
                client_id,
                client_secret,
                client_secret_env,
            } => {
                let secret = client_secret
                    .clone()
                    .or_else(|| client_secret_env.as_deref().and_then(&lookup))
                    .ok_or_else(|| {
                        Error::Config(format!("No client secret configured for {client_id}"))
                    })?;
                Ok(AuthOptions::ClientCredentials {
                    client_id: client_id.clone(),
                    client_secret: secret,
                })
            }
            AuthConfig::Bearer {
                access_token,
                access_token_env,
            } => {
                let token = access_token
                    .clone()
                    .or_else(|| access_token_env.as_deref().and_then(&lookup))
                    .ok_or_else(|| Error::Config("No access token configured".to_string()))?;
                Ok(AuthOptions::Bearer(BearerTokenOptions::new(token)))
            }
        }
    }
}

impl ClientConfig {
    /// Parse from a YAML string.
    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        serde_yaml::from_str(yaml_str)
            .map_err(|e| Error::Config(format!("Failed to parse client config: {e}")))
    }

    /// Serialize to a YAML string.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self)
            .map_err(|e| Error::Config(format!("Failed to serialize client config: {e}")))
    }

    /// Apply `CORTI_*` environment variable overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|name| std::env::var(name).ok());
    }

    fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|value| !value.is_empty());

        if let Some(environment) = lookup(ENVIRONMENT_ENV) {
            self.environment = Some(EnvironmentSpec::Named(environment));
        }
        if let Some(tenant) = lookup(TENANT_ENV) {
            self.tenant_name = Some(tenant);
        }

        if let Some(id) = lookup(CLIENT_ID_ENV) {
            match &mut self.auth {
                Some(AuthConfig::ClientCredentials { client_id, .. }) => *client_id = id,
                auth => {
                    *auth = Some(AuthConfig::ClientCredentials {
                        client_id: id,
                        client_secret: None,
                        client_secret_env: None,
                    });
                }
            }
        }
        if let Some(secret) = lookup(CLIENT_SECRET_ENV)
            && let Some(AuthConfig::ClientCredentials { client_secret, .. }) = &mut self.auth
        {
            *client_secret = Some(secret);
        }
    }

    /// Turn the configuration into a client builder.
    pub fn into_builder(self) -> Result<ClientBuilder> {
        let mut builder = ClientBuilder::new()
            .encode_headers_as_ws_protocols(self.encode_headers_as_ws_protocols)
            .stream_debug(self.stream.debug);

        if let Some(environment) = self.environment {
            builder = builder.environment(environment);
        }
        if let Some(tenant) = self.tenant_name {
            builder = builder.tenant_name(tenant);
        }
        if let Some(base_url) = self.base_url {
            builder = builder.base_url(base_url);
        }
        if let Some(auth) = &self.auth {
            builder = builder.auth(auth.resolve()?);
        }
        if let Some(timeout) = self.timeout {
            builder = builder.timeout(Duration::from_secs(timeout));
        }
        if let Some(max_retries) = self.stream.max_retries {
            builder = builder.max_retries(max_retries);
        }
        Ok(builder)
    }
}

/// Directory holding the client config.
///
/// Checks `CORTI_CONFIG_DIR` first, then the platform config directory.
pub fn client_config_dir() -> Option<PathBuf> {
    if let Ok(dir) = std::env::var(CONFIG_DIR_ENV)
        && !dir.is_empty()
    {
        return Some(PathBuf::from(dir));
    }
    dirs::config_dir().map(|d| d.join(APP_NAME))
}

/// Default client config path (`~/.config/corti/client.yaml` on Linux).
pub fn client_config_path() -> Option<PathBuf> {
    client_config_dir().map(|d| d.join(CLIENT_CONFIG_FILE))
}

/// Load the client config from the default location with env overrides.
///
/// A missing file yields the default config.
pub fn load_client_config() -> Result<ClientConfig> {
    let mut config = match client_config_path() {
        Some(path) => load_client_config_from(&path)?,
        None => ClientConfig::default(),
    };
    config.apply_env_overrides();
    Ok(config)
}

/// Load the client config from a specific file. A missing file yields the default.
pub fn load_client_config_from(path: &Path) -> Result<ClientConfig> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "no client config file");
        return Ok(ClientConfig::default());
    }
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Failed to read {}: {e}", path.display())))?;
    tracing::debug!(path = %path.display(), "loaded client config");
    ClientConfig::from_yaml(&content)
}

#[cfg(test)]
mod tests {
    use super::*;
    use corti_auth::Environment;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_parse_named_environment() {
        let config = ClientConfig::from_yaml(
            r#"
environment: eu
tenant-name: acme
auth:
  type: client-credentials
  client-id: cid
  client-secret: secret
timeout: 15
stream:
  max-retries: 5
  debug: true
"#,
        )
        .unwrap();

        assert_eq!(config.environment, Some(EnvironmentSpec::Named("eu".into())));
        assert_eq!(config.tenant_name.as_deref(), Some("acme"));
        assert_eq!(config.timeout, Some(15));
        assert_eq!(config.stream.max_retries, Some(5));
        assert!(config.stream.debug);
        assert!(!config.encode_headers_as_ws_protocols);
    }

    #[test]
    fn test_parse_custom_environment() {
        let config = ClientConfig::from_yaml(
            r#"
environment:
  base: https://proxy.local/v2
  wss: wss://proxy.local/ws
  login: https://proxy.local/realms
encode-headers-as-ws-protocols: true
"#,
        )
        .unwrap();

        assert_eq!(
            config.environment,
            Some(EnvironmentSpec::Custom(Environment {
                base: "https://proxy.local/v2".into(),
                wss: "wss://proxy.local/ws".into(),
                login: "https://proxy.local/realms".into(),
            }))
        );
        assert!(config.encode_headers_as_ws_protocols);
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = ClientConfig::from_yaml("auth: [").unwrap_err();
        assert!(err.is_config_error());
    }

    #[test]
    fn test_secret_from_env_var() {
        let auth = AuthConfig::ClientCredentials {
            client_id: "cid".into(),
            client_secret: None,
            client_secret_env: Some("MY_SECRET".into()),
        };
        let options = auth.resolve_with(lookup_from(&[("MY_SECRET", "s3cret")])).unwrap();
        match options {
            AuthOptions::ClientCredentials {
                client_id,
                client_secret,
            } => {
                assert_eq!(client_id, "cid");
                assert_eq!(client_secret, "s3cret");
            }
            other => panic!("unexpected auth {other:?}"),
        }
    }

    #[test]
    fn test_missing_secret_is_config_error() {
        let auth = AuthConfig::ClientCredentials {
            client_id: "cid".into(),
            client_secret: None,
            client_secret_env: Some("UNSET".into()),
        };
        assert!(auth.resolve_with(lookup_from(&[])).unwrap_err().is_config_error());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ClientConfig::from_yaml("environment: eu\ntenant-name: acme\n").unwrap();
        config.apply_overrides_from(lookup_from(&[
            ("CORTI_ENVIRONMENT", "us"),
            ("CORTI_CLIENT_ID", "env-client"),
            ("CORTI_CLIENT_SECRET", "env-secret"),
            ("CORTI_TENANT_NAME", ""),
        ]));

        assert_eq!(config.environment, Some(EnvironmentSpec::Named("us".into())));
        // Empty values do not override.
        assert_eq!(config.tenant_name.as_deref(), Some("acme"));
        assert_eq!(
            config.auth,
            Some(AuthConfig::ClientCredentials {
                client_id: "env-client".into(),
                client_secret: Some("env-secret".into()),
                client_secret_env: None,
            })
        );
    }

    #[test]
    fn test_env_secret_keeps_file_client_id() {
        let mut config = ClientConfig::from_yaml(
            "auth:\n  type: client-credentials\n  client-id: file-client\n",
        )
        .unwrap();
        config.apply_overrides_from(lookup_from(&[("CORTI_CLIENT_SECRET", "env-secret")]));

        assert_eq!(
            config.auth,
            Some(AuthConfig::ClientCredentials {
                client_id: "file-client".into(),
                client_secret: Some("env-secret".into()),
                client_secret_env: None,
            })
        );
    }

    #[test]
    fn test_load_missing_file_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_client_config_from(&dir.path().join("client.yaml")).unwrap();
        assert!(config.environment.is_none());
        assert!(config.auth.is_none());
    }

    #[test]
    fn test_load_from_file_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("client.yaml");
        let config = ClientConfig {
            environment: Some("us".into()),
            tenant_name: Some("acme".into()),
            auth: Some(AuthConfig::Bearer {
                access_token: None,
                access_token_env: Some("CORTI_TOKEN".into()),
            }),
            ..Default::default()
        };
        std::fs::write(&path, config.to_yaml().unwrap()).unwrap();

        let loaded = load_client_config_from(&path).unwrap();
        assert_eq!(loaded.tenant_name.as_deref(), Some("acme"));
        assert_eq!(loaded.auth, config.auth);
    }

    #[test]
    fn test_into_builder_builds_client() {
        let config = ClientConfig::from_yaml(
            r#"
environment: eu
tenant-name: acme
auth:
  type: client-credentials
  client-id: cid
  client-secret: secret
"#,
        )
        .unwrap();
        let client = config.into_builder().unwrap().build().unwrap();
        assert_eq!(client.tenant_name().now().as_deref(), Some("acme"));
    }
}
