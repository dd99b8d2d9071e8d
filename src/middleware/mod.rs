//! The request-admission pipeline.
//!
//! Four tower layers compose, in execution order: API-key authentication
//! (optional, pass-through when no key header is present), bearer-token
//! authentication (required once the pipeline reaches it without claims),
//! per-identity rate limiting, and the policy gate. Each layer either
//! attaches facts to the request (claims) or ends it with a typed denial;
//! every denial and security-relevant success lands in the audit trail.

mod auth;
mod policy_gate;
mod rate_limit;

pub use auth::{ApiKeyAuthLayer, BearerAuthLayer};
pub use policy_gate::PolicyGateLayer;
pub use rate_limit::RateLimitLayer;
pub(crate) use rate_limit::too_many_requests;

use axum::extract::{ConnectInfo, Request};
use axum::response::Response;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::pin::Pin;

use crate::types::Claims;

pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Result<Response, Infallible>> + Send>>;

/// Identity for rate limiting and audit: the authenticated address when
/// claims exist, otherwise the client IP, taken from the configured trusted
/// proxy header if any, else from the socket peer address.
pub(crate) fn request_identity(req: &Request, trusted_proxy_header: Option<&str>) -> String {
    if let Some(claims) = req.extensions().get::<Claims>() {
        return claims.address.canonical();
    }
    if let Some(header_name) = trusted_proxy_header {
        if let Some(value) = req
            .headers()
            .get(header_name)
            .and_then(|value| value.to_str().ok())
        {
            // A proxy chain is comma-separated; the first hop is the client.
            if let Some(first) = value.split(',').next() {
                let first = first.trim();
                if !first.is_empty() {
                    return first.to_string();
                }
            }
        }
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
