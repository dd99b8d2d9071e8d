//! The policy gate: final admission decision for authenticated requests.
//!
//! Looks up the most specific policy for `(method, path)` and evaluates it
//! with the request's claims. No matching policy falls back to the
//! configured default. A clean deny is 403; an evaluation fault is
//! fail-closed and, by default, surfaces as 500 to mark it as an
//! availability signal rather than a refusal. Deployments that prefer not
//! to disclose availability can flip it to 403.

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use std::convert::Infallible;
use std::task::{Context, Poll};
use tower::{Layer, Service};

use super::BoxFuture;
use crate::audit::{AuditDecision, AuditEvent};
use crate::error::{ApiError, ErrorCode};
use crate::policy::{PolicyContext, evaluate_policy};
use crate::state::AppState;
use crate::types::Claims;

#[derive(Clone)]
pub struct PolicyGateLayer {
    state: AppState,
}

impl PolicyGateLayer {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

impl<S> Layer<S> for PolicyGateLayer {
    type Service = PolicyGateService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        PolicyGateService {
            inner,
            state: self.state.clone(),
        }
    }
}

#[derive(Clone)]
pub struct PolicyGateService<S> {
    inner: S,
    state: AppState,
}

impl<S> Service<Request> for PolicyGateService<S>
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
            let method = req.method().to_string();
            let path = req.uri().path().to_string();

            let Some(claims) = req.extensions().get::<Claims>().cloned() else {
                // The gate sits behind authentication; reaching it without
                // claims is a pipeline wiring fault, denied fail-closed.
                state.audit.record(
                    AuditEvent::new("policy_gate", AuditDecision::Error)
                        .route(method.as_str(), path.as_str())
                        .reason("no claims on an authenticated route"),
                );
                return Ok(ApiError::unauthorized().into_response());
            };
            let identity = claims.address.canonical();

            let Some(policy) = state.policies.match_policy(&method, &path) else {
                if state.policies.default_allow() {
                    return inner.call(req).await;
                }
                state.audit.record(
                    AuditEvent::new("policy_gate", AuditDecision::Deny)
                        .identity(identity.as_str())
                        .route(method.as_str(), path.as_str())
                        .reason("no policy matched, default deny"),
                );
                return Ok(ApiError::forbidden().into_response());
            };

            let ctx = PolicyContext {
                chain: state.chain.as_deref(),
                cache: &state.cache,
                store: state.store.as_ref(),
                cache_ttl: state.config.cache_ttl,
            };
            let evaluation = evaluate_policy(&policy, &claims, &ctx).await;
            let trace = serde_json::to_value(&evaluation.trace).unwrap_or_default();

            if evaluation.allowed {
                state.audit.record(
                    AuditEvent::new("policy_gate", AuditDecision::Allow)
                        .identity(identity.as_str())
                        .route(method.as_str(), path.as_str())
                        .details(trace),
                );
                return Ok(inner.call(req).await?);
            }

            match evaluation.error {
                None => {
                    state.audit.record(
                        AuditEvent::new("policy_gate", AuditDecision::Deny)
                            .identity(identity.as_str())
                            .route(method.as_str(), path.as_str())
                            .reason("policy denied")
                            .details(trace),
                    );
                    Ok(ApiError::forbidden().into_response())
                }
                Some(error) => {
                    tracing::error!(error = %error, %method, %path, "policy evaluation fault");
                    state.audit.record(
                        AuditEvent::new("policy_gate", AuditDecision::Error)
                            .identity(identity.as_str())
                            .route(method.as_str(), path.as_str())
                            .reason("availability fault during evaluation")
                            .details(trace),
                    );
                    if state.policies.error_as_forbidden() {
                        Ok(ApiError::forbidden().into_response())
                    } else {
                        Ok(ApiError::new(ErrorCode::InternalError, "policy evaluation failed")
                            .into_response())
                    }
                }
            }
        })
    }
}
