//! Header-to-subprotocol encoding.
//!
//! Proxies that strip custom headers still forward `Sec-WebSocket-Protocol`,
//! so header pairs are flattened into the subprotocol list as
//! `name, percent-encoded value, name, value, ...`.

use corti_auth::Supplier;

use crate::error::Result;

/// Header names the client adds for its own bookkeeping.
pub const SDK_HEADER_NAMES: &[&str] = &[
    "Tenant-Name",
    "X-Fern-Language",
    "X-Fern-SDK-Name",
    "X-Fern-SDK-Version",
    "User-Agent",
    "X-Fern-Runtime",
    "X-Fern-Runtime-Version",
];

/// A header whose value may only be known after an async call.
pub type HeaderEntry = (String, Supplier<Option<String>>);

/// Build a header entry from a known value.
pub fn header(name: impl Into<String>, value: impl Into<String>) -> HeaderEntry {
    (name.into(), Supplier::Immediate(Some(value.into())))
}

fn is_sdk_header(name: &str) -> bool {
    SDK_HEADER_NAMES
        .iter()
        .any(|sdk| sdk.eq_ignore_ascii_case(name))
}

/// Flatten headers into subprotocol tokens, in order.
///
/// Pairs whose value resolves to `None` or an empty string are skipped.
/// With `filter_sdk_names`, the [`SDK_HEADER_NAMES`] are dropped as well.
pub async fn encode(headers: &[HeaderEntry], filter_sdk_names: bool) -> Result<Vec<String>> {
    let mut tokens = Vec::with_capacity(headers.len() * 2);
    for (name, value) in headers {
        if filter_sdk_names && is_sdk_header(name) {
            continue;
        }
        let Some(value) = value.resolve().await? else {
            continue;
        };
        if value.is_empty() {
            continue;
        }
        tokens.push(name.clone());
        tokens.push(urlencoding::encode(&value).into_owned());
    }
    Ok(tokens)
}

/// Client header tokens (filtered) followed by proxy-declared tokens (unfiltered).
pub async fn encode_protocols(
    client_headers: &[HeaderEntry],
    proxy_headers: &[HeaderEntry],
) -> Result<Vec<String>> {
    let mut protocols = encode(client_headers, true).await?;
    protocols.extend(encode(proxy_headers, false).await?);
    Ok(protocols)
}
