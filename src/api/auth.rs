//! Admin bearer key guard

use std::sync::Arc;

use axum::{
    extract::{Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::Response,
};

use super::ApiState;
use super::error::error_response;

/// Bearer credential from the Authorization header
fn bearer_token(req: &Request) -> Option<&str> {
    req.headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Compare without short-circuiting on the first differing byte
fn keys_match(provided: &str, expected: &str) -> bool {
    provided.len() == expected.len()
        && provided
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Reject requests that do not carry the configured admin key
///
/// Without a configured key every request passes.
pub async fn require_api_key(
    State(state): State<Arc<ApiState>>,
    req: Request,
    next: Next,
) -> Response {
    let Some(admin_key) = state.api_key.as_deref() else {
        return next.run(req).await;
    };

    let path = req.uri().path().to_owned();
    match bearer_token(&req) {
        Some(token) if keys_match(token, admin_key) => next.run(req).await,
        Some(_) => {
            tracing::warn!(%path, "rejected request with wrong admin key");
            error_response(StatusCode::UNAUTHORIZED, "unauthorized", "invalid bearer token")
        }
        None => {
            tracing::debug!(%path, "rejected request without bearer token");
            error_response(StatusCode::UNAUTHORIZED, "unauthorized", "bearer token required")
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::HeaderValue;

    use super::*;

    fn request(authorization: Option<&'static str>) -> Request {
        let mut req = Request::builder().body(Body::empty()).unwrap();
        if let Some(value) = authorization {
            req.headers_mut()
                .insert(header::AUTHORIZATION, HeaderValue::from_static(value));
        }
        req
    }

    #[test]
    fn test_bearer_token() {
        assert_eq!(bearer_token(&request(None)), None);
        assert_eq!(
            bearer_token(&request(Some("Bearer fleet-key"))),
            Some("fleet-key")
        );
        assert_eq!(bearer_token(&request(Some("Basic abc"))), None);
    }

    #[test]
    fn test_keys_match() {
        assert!(keys_match("fleet-key", "fleet-key"));
        assert!(!keys_match("fleet-kez", "fleet-key"));
        assert!(!keys_match("fleet", "fleet-key"));
        assert!(!keys_match("", "fleet-key"));
    }
}
