//! Unverified decoding of bearer token claims.
//!
//! Tokens are never validated here. The claims segment is only read for
//! routing hints (environment and tenant from the issuer) and for the expiry
//! instant used by the refresh logic.

use std::sync::LazyLock;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Deserialize;

static ISSUER_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^https://(?:keycloak|auth)\.([^./]+)\.corti\.app/realms/([^/]+)")
        .expect("issuer pattern is valid")
});

/// Claims recovered from an access token whose issuer points at a Corti realm.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedTokenClaims {
    pub environment: Option<String>,
    pub tenant_name: Option<String>,
    pub access_token: String,
    /// Expiry as seconds since the Unix epoch.
    pub expires_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct RawClaims {
    #[serde(default)]
    iss: Option<String>,
    #[serde(default)]
    exp: Option<i64>,
}

fn raw_claims(token: &str) -> Option<RawClaims> {
    let mut parts = token.split('.');
    let (_header, payload, _signature) = (parts.next()?, parts.next()?, parts.next()?);
    if parts.next().is_some() {
        return None;
    }

    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Decode a token's environment and tenant hints.
///
/// Returns `None` when the token is not a three-part token, the claims are
/// not JSON, or the issuer does not match
/// `https://(keycloak|auth).{environment}.corti.app/realms/{tenant}`.
pub fn decode_token(token: &str) -> Option<DecodedTokenClaims> {
    let claims = raw_claims(token)?;
    let issuer = claims.iss?;
    let captures = ISSUER_PATTERN.captures(&issuer)?;

    Some(DecodedTokenClaims {
        environment: captures.get(1).map(|m| m.as_str().to_string()),
        tenant_name: captures.get(2).map(|m| m.as_str().to_string()),
        access_token: token.to_string(),
        expires_at: claims.exp,
    })
}

/// Read the `exp` claim of a token regardless of its issuer.
pub fn token_expiry(token: &str) -> Option<DateTime<Utc>> {
    raw_claims(token)?
        .exp
        .and_then(|exp| DateTime::from_timestamp(exp, 0))
}
