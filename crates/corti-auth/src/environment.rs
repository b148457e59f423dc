//! Platform environments (regions) and their endpoint URLs.

use serde::{Deserialize, Serialize};

/// Endpoint URLs for one deployment of the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    /// REST API base, e.g. `https://api.eu.corti.app/v2`.
    pub base: String,
    /// WebSocket base, e.g. `wss://api.eu.corti.app/audio-bridge/v2`.
    pub wss: String,
    /// Login (realm) base, e.g. `https://auth.eu.corti.app/realms`.
    pub login: String,
}

impl Environment {
    /// Expand a region name into its endpoint URLs.
    pub fn region(name: &str) -> Self {
        Self {
            base: format!("https://api.{name}.corti.app/v2"),
            wss: format!("wss://api.{name}.corti.app/audio-bridge/v2"),
            login: format!("https://auth.{name}.corti.app/realms"),
        }
    }

    pub fn eu() -> Self {
        Self::region("eu")
    }

    pub fn us() -> Self {
        Self::region("us")
    }
}

/// An environment given either as a region name or as explicit URLs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnvironmentSpec {
    Named(String),
    Custom(Environment),
}

impl EnvironmentSpec {
    /// Whether explicit URLs were supplied.
    pub fn is_custom(&self) -> bool {
        matches!(self, EnvironmentSpec::Custom(_))
    }

    /// Endpoint URLs for this spec.
    pub fn urls(&self) -> Environment {
        match self {
            EnvironmentSpec::Named(name) => Environment::region(name),
            EnvironmentSpec::Custom(env) => env.clone(),
        }
    }
}

impl Default for EnvironmentSpec {
    fn default() -> Self {
        EnvironmentSpec::Named(String::new())
    }
}

impl From<&str> for EnvironmentSpec {
    fn from(name: &str) -> Self {
        EnvironmentSpec::Named(name.to_string())
    }
}

impl From<String> for EnvironmentSpec {
    fn from(name: String) -> Self {
        EnvironmentSpec::Named(name)
    }
}

impl From<Environment> for EnvironmentSpec {
    fn from(env: Environment) -> Self {
        EnvironmentSpec::Custom(env)
    }
}
