//! Gatekeeper: an authentication and authorization gateway for
//! wallet-identified clients.
//!
//! The gateway establishes identity from a Sign-In With Ethereum (EIP-4361)
//! message, issues stateless bearer tokens and long-lived API keys for that
//! identity, and admits or rejects requests to protected routes by
//! evaluating per-route policies whose rules may read on-chain state.
//!
//! # Request admission
//!
//! A protected request passes through four stages, each of which can end it
//! with a typed denial and an audit record:
//!
//! 1. API-key authentication (`X-API-Key`, or a 64-hex bearer value),
//!    optional; a request without a key header passes through untouched.
//! 2. Bearer-token authentication, required if stage 1 attached no claims.
//! 3. Per-identity rate limiting (token buckets, steady rate plus burst).
//! 4. The policy gate: the most specific policy for `(method, path)` is
//!    evaluated with the request's claims; rules can check scopes, allowlist
//!    membership, ERC-20 balances, and ERC-721 ownership through a TTL cache
//!    over JSON-RPC reads with endpoint failover.
//!
//! # Modules
//!
//! - [`config`] — environment configuration and startup validation.
//! - [`types`] — value objects: canonical addresses, timestamps, claims.
//! - [`error`] — the stable error taxonomy and its HTTP mapping.
//! - [`store`] — repository seams over users, API keys, and allowlists.
//! - [`cache`] — TTL cache with single-flight reads.
//! - [`chain`] — JSON-RPC client with fallback endpoints and ERC-20/721
//!   helpers.
//! - [`auth`] — nonce service, SIWE verifier, bearer tokens, API keys.
//! - [`policy`] — rule variants, AND/OR combinator, route registry.
//! - [`ratelimit`] — per-identity token buckets.
//! - [`audit`] — bounded asynchronous audit pipeline.
//! - [`middleware`] — the tower layers composing the admission pipeline.
//! - [`handlers`] — the axum routes.
//! - [`state`] — shared application state and background sweepers.

pub mod audit;
pub mod auth;
pub mod cache;
pub mod chain;
pub mod config;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod policy;
pub mod ratelimit;
pub mod shutdown;
pub mod state;
pub mod store;
pub mod telemetry;
pub mod types;
