//! General rate-limit middleware over the per-identity token buckets.
//!
//! Denials carry `Retry-After` and the `X-RateLimit-*` family; allowed
//! responses get the remaining-budget headers as well. The stricter
//! key-creation bucket is enforced at the top of the creation handler with
//! the same response shape (see [`too_many_requests`]).

use axum::Json;
use axum::extract::Request;
use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use super::{BoxFuture, request_identity};
use crate::audit::{AuditDecision, AuditEvent};
use crate::error::{ApiError, ErrorCode};
use crate::ratelimit::RateDecision;
use crate::state::AppState;
use crate::types::UnixTimestamp;

pub(crate) fn apply_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    headers.insert("x-ratelimit-limit", HeaderValue::from(decision.limit));
    headers.insert(
        "x-ratelimit-remaining",
        HeaderValue::from(decision.remaining),
    );
    headers.insert("x-ratelimit-reset", HeaderValue::from(decision.reset));
}

/// 429 with `Retry-After` computed from the bucket deficit.
pub(crate) fn too_many_requests(decision: &RateDecision) -> Response {
    let body = ApiError::new(ErrorCode::RateLimited, "rate limit exceeded");
    let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    response
        .headers_mut()
        .insert("retry-after", HeaderValue::from(decision.retry_after));
    apply_headers(&mut response, decision);
    response
}

#[derive(Clone)]
pub struct RateLimitLayer {
    state: AppState,
}

impl RateLimitLayer {
    /// The general API-usage bucket class.
    pub fn general(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for RateLimitLayer {
    type Service = RateLimitService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RateLimitService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct RateLimitService<S> {
    inner: S,
    state: AppState,
}

impl<S> Service<Request> for RateLimitService<S>
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

    fn call(&mut self, req: Request) -> Self::Future {
        let state = self.state.clone();
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let identity = request_identity(&req, state.config.trusted_proxy_header.as_deref());
            let decision = state.general_limiter.allow(&identity, UnixTimestamp::now());

            if !decision.allowed {
                state.audit.record(
                    AuditEvent::new("rate_limit", AuditDecision::Deny)
                        .identity(identity.as_str())
                        .route(req.method().as_str(), req.uri().path())
                        .reason(format!(
                            "general bucket empty, retry in {}s",
                            decision.retry_after
                        )),
                );
                return Ok(too_many_requests(&decision));
            }

            let mut response = inner.call(req).await?;
            apply_headers(&mut response, &decision);
            Ok(response)
        })
    }
}
