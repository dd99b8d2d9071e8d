//! HTTP endpoints of the gateway.
//!
//! Public surface: the SIWE nonce/verify pair and the health probes.
//! Protected surface (behind the full middleware pipeline): API-key CRUD and
//! the sample data endpoint. Wire structs are camelCase; error bodies follow
//! the `{error, code, details?}` shape from [`crate::error`].

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Extension, Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;
use tower::ServiceBuilder;
use tracing::instrument;
use uuid::Uuid;

use crate::audit::{AuditDecision, AuditEvent};
use crate::auth::siwe::SiweError;
use crate::auth::{ApiKeyError, Revoked};
use crate::error::{ApiError, ErrorCode};
use crate::middleware::{
    ApiKeyAuthLayer, BearerAuthLayer, PolicyGateLayer, RateLimitLayer, too_many_requests,
};
use crate::state::AppState;
use crate::store::ApiKeyRecord;
use crate::types::{Claims, UnixTimestamp};

/// How much of a key hash the listing discloses.
const KEY_HASH_PREFIX_LEN: usize = 8;

pub fn routes(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/siwe/nonce", get(get_siwe_nonce))
        .route("/auth/siwe/verify", post(post_siwe_verify))
        .route("/health", get(get_health))
        .route("/health/live", get(get_health_live))
        .route("/health/ready", get(get_health_ready));

    let protected = Router::new()
        .route("/api/keys", post(create_key).get(list_keys))
        .route("/api/keys/{id}", delete(delete_key))
        .route("/api/data", get(get_data))
        .layer(
            // Execution order: api-key auth, bearer auth, rate limit, policy.
            ServiceBuilder::new()
                .layer(ApiKeyAuthLayer::new(state.clone()))
                .layer(BearerAuthLayer::new(state.clone()))
                .layer(RateLimitLayer::general(state.clone()))
                .layer(PolicyGateLayer::new(state.clone())),
        );

    public.merge(protected).with_state(state)
}

// ============================================================================
// SIWE authentication
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NonceResponse {
    nonce: String,
    expires_in: u64,
}

/// `GET /auth/siwe/nonce`: issues a single-use challenge nonce.
#[instrument(skip_all)]
async fn get_siwe_nonce(State(state): State<AppState>) -> Response {
    let nonce = state.nonces.generate(UnixTimestamp::now());
    let body = NonceResponse {
        nonce,
        expires_in: state.nonces.ttl().as_secs(),
    };
    // Challenges must never be served from a cache.
    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(body),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
struct VerifyRequest {
    message: String,
    signature: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VerifyResponse {
    token: String,
    expires_in: u64,
    address: String,
}

/// `POST /auth/siwe/verify`: verifies the signed message, consumes the
/// nonce, and mints a bearer token for the recovered address.
#[instrument(skip_all)]
async fn post_siwe_verify(
    State(state): State<AppState>,
    body: Result<Json<VerifyRequest>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_json(rejection),
    };
    let now = UnixTimestamp::now();

    let address = match state.siwe.verify(&body.message, &body.signature, now) {
        Ok(address) => address,
        Err(error) => {
            let (code, message) = match error {
                SiweError::InvalidMessage(_) => (ErrorCode::InvalidMessage, "invalid SIWE message"),
                SiweError::InvalidNonce => (ErrorCode::InvalidNonce, "invalid nonce"),
                SiweError::SignatureMismatch => {
                    (ErrorCode::SignatureMismatch, "signature mismatch")
                }
            };
            state.audit.record(
                AuditEvent::new("siwe_verify", AuditDecision::Deny).reason(code.as_str()),
            );
            return ApiError::new(code, message).into_response();
        }
    };

    if let Err(e) = state.store.upsert_user(&address, now).await {
        tracing::error!(error = %e, "user upsert failed after siwe verification");
        return ApiError::new(ErrorCode::NetworkError, "store unavailable").into_response();
    }

    let token = match state.tokens.mint(&address, &[], now) {
        Ok(token) => token,
        Err(e) => {
            tracing::error!(error = %e, "token minting failed");
            return ApiError::internal().into_response();
        }
    };

    state.audit.record(
        AuditEvent::new("siwe_verify", AuditDecision::Allow).identity(address.canonical()),
    );
    Json(VerifyResponse {
        token,
        expires_in: state.tokens.expiry().as_secs(),
        address: address.canonical(),
    })
    .into_response()
}

// ============================================================================
// API keys
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyRequest {
    name: String,
    #[serde(default)]
    scopes: Vec<String>,
    expires_in_seconds: Option<u64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateKeyResponse {
    /// The raw key. Present in this response and nowhere else, ever.
    key: String,
    key_hash: String,
    id: Uuid,
    name: String,
    scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<UnixTimestamp>,
    created_at: UnixTimestamp,
}

/// `POST /api/keys`: creates a key for the authenticated identity. The
/// stricter creation bucket applies before any work happens.
#[instrument(skip_all)]
async fn create_key(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    body: Result<Json<CreateKeyRequest>, JsonRejection>,
) -> Response {
    let now = UnixTimestamp::now();
    let identity = claims.address.canonical();

    let decision = state.create_limiter.allow(&identity, now);
    if !decision.allowed {
        state.audit.record(
            AuditEvent::new("rate_limit", AuditDecision::Deny)
                .identity(identity.as_str())
                .route("POST", "/api/keys")
                .reason(format!(
                    "key-creation bucket empty, retry in {}s",
                    decision.retry_after
                )),
        );
        return too_many_requests(&decision);
    }

    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => return invalid_json(rejection),
    };
    if body.name.trim().is_empty() {
        return ApiError::invalid_request("name must not be empty").into_response();
    }

    let user = match state.store.upsert_user(&claims.address, now).await {
        Ok(user) => user,
        Err(e) => {
            tracing::error!(error = %e, "user upsert failed during key creation");
            return ApiError::new(ErrorCode::NetworkError, "store unavailable").into_response();
        }
    };

    let expires_in = body.expires_in_seconds.map(Duration::from_secs);
    match state
        .api_keys
        .create(user.id, body.name.trim(), body.scopes, expires_in, now)
        .await
    {
        Ok((raw_key, record)) => {
            state.audit.record(
                AuditEvent::new("api_key_create", AuditDecision::Allow)
                    .identity(identity.as_str())
                    .reason(format!("key {}", record.id)),
            );
            (
                StatusCode::CREATED,
                Json(CreateKeyResponse {
                    key: raw_key,
                    key_hash: record.key_hash,
                    id: record.id,
                    name: record.name,
                    scopes: record.scopes,
                    expires_at: record.expires_at,
                    created_at: record.created_at,
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!(error = %e, "api key creation failed");
            ApiError::new(ErrorCode::NetworkError, "store unavailable").into_response()
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct KeySummary {
    id: Uuid,
    /// Only a prefix of the hash; enough to correlate, never the whole
    /// digest.
    key_hash: String,
    name: String,
    scopes: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    expires_at: Option<UnixTimestamp>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_used_at: Option<UnixTimestamp>,
    created_at: UnixTimestamp,
}

impl From<ApiKeyRecord> for KeySummary {
    fn from(record: ApiKeyRecord) -> Self {
        let mut key_hash = record.key_hash;
        key_hash.truncate(KEY_HASH_PREFIX_LEN);
        Self {
            id: record.id,
            key_hash,
            name: record.name,
            scopes: record.scopes,
            expires_at: record.expires_at,
            last_used_at: record.last_used_at,
            created_at: record.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct ListKeysResponse {
    keys: Vec<KeySummary>,
}

/// `GET /api/keys`: metadata for the caller's keys, newest first, expired
/// included. No key material.
#[instrument(skip_all)]
async fn list_keys(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Response {
    let user = match state.store.user_by_address(&claims.address).await {
        Ok(Some(user)) => user,
        // An identity that never created anything has no keys.
        Ok(None) => return Json(ListKeysResponse { keys: vec![] }).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed during key listing");
            return ApiError::new(ErrorCode::NetworkError, "store unavailable").into_response();
        }
    };
    match state.api_keys.list(user.id).await {
        Ok(records) => Json(ListKeysResponse {
            keys: records.into_iter().map(KeySummary::from).collect(),
        })
        .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "key listing failed");
            ApiError::new(ErrorCode::NetworkError, "store unavailable").into_response()
        }
    }
}

/// `DELETE /api/keys/{id}`: revokes an owned key. Cross-user attempts and
/// unknown ids both read as 404; a repeated delete of an owned key is a 404
/// as well because the resource is gone, while the underlying service call
/// stays a successful no-op.
#[instrument(skip_all)]
async fn delete_key(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Path(id): Path<String>,
) -> Response {
    let identity = claims.address.canonical();
    let Ok(id) = id.parse::<Uuid>() else {
        return ApiError::not_found().into_response();
    };

    let user = match state.store.user_by_address(&claims.address).await {
        Ok(Some(user)) => user,
        Ok(None) => return ApiError::not_found().into_response(),
        Err(e) => {
            tracing::error!(error = %e, "user lookup failed during key revocation");
            return ApiError::new(ErrorCode::NetworkError, "store unavailable").into_response();
        }
    };

    match state.api_keys.revoke(id, user.id).await {
        Ok(Revoked::Removed) => {
            state.audit.record(
                AuditEvent::new("api_key_revoke", AuditDecision::Allow)
                    .identity(identity.as_str())
                    .reason(format!("key {id}")),
            );
            StatusCode::NO_CONTENT.into_response()
        }
        Ok(Revoked::AlreadyGone) => ApiError::not_found().into_response(),
        Err(ApiKeyError::NotFound) => {
            state.audit.record(
                AuditEvent::new("api_key_revoke", AuditDecision::Deny)
                    .identity(identity.as_str())
                    .reason("not owner or unknown"),
            );
            ApiError::not_found().into_response()
        }
        Err(ApiKeyError::Expired) => ApiError::not_found().into_response(),
        Err(ApiKeyError::Store(e)) => {
            tracing::error!(error = %e, "key revocation failed");
            ApiError::new(ErrorCode::NetworkError, "store unavailable").into_response()
        }
    }
}

// ============================================================================
// Protected sample + health
// ============================================================================

/// `GET /api/data`: the canonical protected endpoint.
#[instrument(skip_all)]
async fn get_data(Extension(claims): Extension<Claims>) -> Response {
    Json(json!({
        "message": "Access granted",
        "address": claims.address.canonical(),
    }))
    .into_response()
}

#[instrument(skip_all)]
async fn get_health() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

/// Liveness is process-only: answering at all is the signal.
#[instrument(skip_all)]
async fn get_health_live() -> Response {
    Json(json!({"status": "ok"})).into_response()
}

/// Readiness aggregates store reachability and, when a chain client is
/// configured, at least one answering chain endpoint.
#[instrument(skip_all)]
async fn get_health_ready(State(state): State<AppState>) -> Response {
    let database_ok = state.store.ping().await.is_ok();
    let chain_status = match &state.chain {
        Some(chain) => {
            if chain.health_check().await {
                "ok"
            } else {
                "unreachable"
            }
        }
        None => "skipped",
    };

    let ready = database_ok && chain_status != "unreachable";
    let body = json!({
        "status": if ready { "ready" } else { "not_ready" },
        "database": if database_ok { "ok" } else { "unreachable" },
        "chain": chain_status,
    });
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(body)).into_response()
}

fn invalid_json(rejection: JsonRejection) -> Response {
    ApiError::invalid_request(rejection.body_text()).into_response()
}
