//! Client identity extraction.

use axum::http::HeaderMap;
use std::collections::HashSet;
use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// Header carrying the originating client address behind a reverse proxy.
pub const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Key used when neither the header nor the transport address is available.
const UNKNOWN_CLIENT: &str = "unknown";

/// Identifies the caller a request is accounted against.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientKey(String);

/// Which peers may name the client through `X-Forwarded-For`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ForwardedPolicy {
    /// The header is taken verbatim from any peer.
    ///
    /// A caller reaching the gate directly can pick its own identity.
    #[default]
    TrustAll,
    /// The header is never consulted.
    Ignore,
    /// The header is honored only from these peer addresses.
    TrustedProxies(HashSet<IpAddr>),
}

impl ForwardedPolicy {
    fn trusts(&self, peer: Option<IpAddr>) -> bool {
        match self {
            ForwardedPolicy::TrustAll => true,
            ForwardedPolicy::Ignore => false,
            ForwardedPolicy::TrustedProxies(proxies) => {
                peer.is_some_and(|ip| proxies.contains(&ip))
            }
        }
    }
}

impl ClientKey {
    /// Create a key from an identity string.
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Derive the key for a request.
    ///
    /// The first comma-separated entry of `X-Forwarded-For` wins when the
    /// policy trusts the peer. Otherwise the peer's IP address is used.
    /// A blank first entry also falls back to the peer address, so such
    /// callers are not pooled under one empty key.
    pub fn from_request(
        headers: &HeaderMap,
        remote_addr: Option<SocketAddr>,
        policy: &ForwardedPolicy,
    ) -> Self {
        let peer = remote_addr.map(|addr| addr.ip());

        if policy.trusts(peer) {
            if let Some(forwarded) = first_forwarded_for(headers) {
                return Self(forwarded.to_string());
            }
        }

        match peer {
            Some(ip) => Self(ip.to_string()),
            None => Self(UNKNOWN_CLIENT.to_string()),
        }
    }

    /// The identity string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn first_forwarded_for(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(X_FORWARDED_FOR)?.to_str().ok()?;
    let first = value.split(',').next()?.trim();
    (!first.is_empty()).then_some(first)
}

impl fmt::Display for ClientKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientKey {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

impl From<String> for ClientKey {
    fn from(key: String) -> Self {
        Self(key)
    }
}
