//! Requester identity for audit records

use std::convert::Infallible;
use std::net::SocketAddr;

use axum::extract::{ConnectInfo, FromRequestParts};
use axum::http::HeaderMap;
use axum::http::request::Parts;
use sha2::{Digest, Sha256};

/// Who triggered a request
///
/// Resolved from `X-User-ID`, then `X-User`, then a fingerprint of the
/// `Authorization` header, then the peer address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requester(pub String);

impl Requester {
    pub const ANONYMOUS: &'static str = "anonymous";

    fn resolve(headers: &HeaderMap, peer: Option<SocketAddr>) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        if let Some(user) = header("x-user-id").or_else(|| header("x-user")) {
            return Self(user.to_string());
        }
        if let Some(auth) = header("authorization") {
            return Self(fingerprint(auth));
        }
        peer.map_or_else(
            || Self(Self::ANONYMOUS.to_string()),
            |addr| Self(addr.ip().to_string()),
        )
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Stable non-reversible tag for a credential
fn fingerprint(credential: &str) -> String {
    let digest = hex::encode(Sha256::digest(credential.as_bytes()));
    format!("token:{}", &digest[..12])
}

impl<S: Send + Sync> FromRequestParts<S> for Requester {
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let peer = parts
            .extensions
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| *addr);
        Ok(Self::resolve(&parts.headers, peer))
    }
}
