//! Credential middleware: API keys first, bearer tokens second.
//!
//! The API-key layer is a pass-through for requests without a key header; a
//! present key must validate or the request ends 401 right there. The bearer
//! layer then requires claims: either the key layer attached them already or
//! a valid `Authorization: Bearer` token must. Which credential failed is
//! never disclosed beyond the stable error code.

use axum::extract::Request;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use super::BoxFuture;
use crate::audit::{AuditDecision, AuditEvent};
use crate::auth::ApiKeyError;
use crate::error::ApiError;
use crate::state::AppState;
use crate::types::UnixTimestamp;

const API_KEY_HEADER: &str = "x-api-key";
const RAW_KEY_LEN: usize = 64;

fn is_raw_key_format(candidate: &str) -> bool {
    candidate.len() == RAW_KEY_LEN && candidate.chars().all(|c| c.is_ascii_hexdigit())
}

fn bearer_value(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
}

/// The API key if one was presented: `X-API-Key` preferred, a 64-hex
/// `Authorization: Bearer` value as the alternate form. A bearer value that
/// is not key-shaped is left for the token middleware.
fn presented_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        return Some(value.trim().to_string());
    }
    bearer_value(headers)
        .filter(|candidate| is_raw_key_format(candidate))
        .map(str::to_string)
}

#[derive(Clone)]
pub struct ApiKeyAuthLayer {
    state: AppState,
}

impl ApiKeyAuthLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for ApiKeyAuthLayer {
    type Service = ApiKeyAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        ApiKeyAuthService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct ApiKeyAuthService<S> {
    inner: S,
    state: AppState,
}

impl<S> Service<Request> for ApiKeyAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let state = self.state.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let Some(raw_key) = presented_api_key(req.headers()) else {
                return inner.call(req).await;
            };

            let method = req.method().to_string();
            let path = req.uri().path().to_string();

            if !is_raw_key_format(&raw_key) {
                state.audit.record(
                    AuditEvent::new("api_key_auth", AuditDecision::Deny)
                        .route(method.as_str(), path.as_str())
                        .reason("malformed key"),
                );
                return Ok(ApiError::unauthorized().into_response());
            }

            match state.api_keys.validate(&raw_key, UnixTimestamp::now()).await {
                Ok((record, claims)) => {
                    // Off the response path on purpose; best-effort.
                    state.api_keys.touch_last_used(record.key_hash.clone());
                    state.audit.record(
                        AuditEvent::new("api_key_auth", AuditDecision::Allow)
                            .identity(claims.address.canonical())
                            .route(method.as_str(), path.as_str()),
                    );
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(ApiKeyError::Expired) => {
                    state.audit.record(
                        AuditEvent::new("api_key_auth", AuditDecision::Deny)
                            .route(method.as_str(), path.as_str())
                            .reason("expired"),
                    );
                    Ok(ApiError::expired().into_response())
                }
                Err(ApiKeyError::NotFound) => {
                    state.audit.record(
                        AuditEvent::new("api_key_auth", AuditDecision::Deny)
                            .route(method.as_str(), path.as_str())
                            .reason("unknown key"),
                    );
                    Ok(ApiError::unauthorized().into_response())
                }
                Err(ApiKeyError::Store(e)) => {
                    // Fail closed: a store fault denies access.
                    tracing::error!(error = %e, "api key validation hit a store error");
                    state.audit.record(
                        AuditEvent::new("api_key_auth", AuditDecision::Error)
                            .route(method.as_str(), path.as_str())
                            .reason("store unavailable"),
                    );
                    Ok(ApiError::unauthorized().into_response())
                }
            }
        })
    }
}

#[derive(Clone)]
pub struct BearerAuthLayer {
    state: AppState,
}

impl BearerAuthLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for BearerAuthLayer {
    type Service = BearerAuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        BearerAuthService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct BearerAuthService<S> {
    inner: S,
    state: AppState,
}

impl<S> Service<Request> for BearerAuthService<S>
where
    S: Service<Request, Response = Response, Error = Infallible> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response;
    type Error = Infallible;
    type Future = BoxFuture;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request) -> Self::Future {
        let state = self.state.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            if req.extensions().get::<crate::types::Claims>().is_some() {
                return inner.call(req).await;
            }

            let method = req.method().to_string();
            let path = req.uri().path().to_string();

            let Some(token) = bearer_value(req.headers()).map(str::to_string) else {
                state.audit.record(
                    AuditEvent::new("bearer_auth", AuditDecision::Deny)
                        .route(method.as_str(), path.as_str())
                        .reason("missing credentials"),
                );
                return Ok(ApiError::unauthorized().into_response());
            };

            match state.tokens.verify(&token, UnixTimestamp::now()) {
                Ok(claims) => {
                    req.extensions_mut().insert(claims);
                    inner.call(req).await
                }
                Err(crate::auth::TokenError::Expired) => {
                    state.audit.record(
                        AuditEvent::new("bearer_auth", AuditDecision::Deny)
                            .route(method.as_str(), path.as_str())
                            .reason("expired"),
                    );
                    Ok(ApiError::expired().into_response())
                }
                Err(crate::auth::TokenError::Invalid) => {
                    state.audit.record(
                        AuditEvent::new("bearer_auth", AuditDecision::Deny)
                            .route(method.as_str(), path.as_str())
                            .reason("invalid token"),
                    );
                    Ok(ApiError::unauthorized().into_response())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_key_format_is_64_hex_exactly() {
        assert!(is_raw_key_format(&"a".repeat(64)));
        assert!(is_raw_key_format(&"0123456789abcdefABCDEF".repeat(3)[..64].to_string()));
        assert!(!is_raw_key_format(&"a".repeat(63)));
        assert!(!is_raw_key_format(&"a".repeat(65)));
        assert!(!is_raw_key_format(&"g".repeat(64)));
        assert!(!is_raw_key_format(""));
    }

    #[test]
    fn api_key_extraction_prefers_the_dedicated_header() {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "a".repeat(64).parse().unwrap());
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", "b".repeat(64)).parse().unwrap(),
        );
        assert_eq!(presented_api_key(&headers), Some("a".repeat(64)));
    }

    #[test]
    fn hex_shaped_bearer_is_treated_as_an_api_key() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            format!("Bearer {}", "c".repeat(64)).parse().unwrap(),
        );
        assert_eq!(presented_api_key(&headers), Some("c".repeat(64)));
    }

    #[test]
    fn jwt_shaped_bearer_is_left_for_the_token_middleware() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer eyJhbGciOiJIUzI1NiJ9.payload.signature".parse().unwrap(),
        );
        assert_eq!(presented_api_key(&headers), None);
        assert_eq!(
            bearer_value(&headers),
            Some("eyJhbGciOiJIUzI1NiJ9.payload.signature")
        );
    }

    #[test]
    fn malformed_x_api_key_is_still_reported_as_presented() {
        // A present but malformed X-API-Key must 401, not fall through.
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "not-a-key".parse().unwrap());
        let presented = presented_api_key(&headers).unwrap();
        assert!(!is_raw_key_format(&presented));
    }
}
