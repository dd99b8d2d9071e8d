//! Stable error taxonomy and its HTTP mapping.
//!
//! Every component converts its internal errors into one [`ErrorCode`] before
//! the boundary; inner details go to the log, never to the wire. The JSON
//! body shape is `{error, code, details?}`.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::{Display, Formatter};

/// Machine-readable failure codes. The slugs are part of the wire contract
/// and never change; human messages may.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// JSON parse failure, missing required field, bad field type or range.
    InvalidRequest,
    /// SIWE message could not be parsed or a required field is missing.
    InvalidMessage,
    /// Nonce unknown, expired, or already used.
    InvalidNonce,
    /// Signature does not recover the message's address.
    SignatureMismatch,
    /// Missing or invalid bearer token or API key.
    Unauthorized,
    /// Token or API key past its expiry.
    Expired,
    /// Authenticated but denied by policy.
    Forbidden,
    /// Resource does not exist or is not visible to the caller.
    NotFound,
    /// Rate bucket empty; `Retry-After` accompanies the response.
    RateLimited,
    /// Chain or store reachability failure after retry.
    NetworkError,
    /// Programmer error, invariant violation, or policy-evaluation fault.
    InternalError,
}

impl ErrorCode {
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorCode::InvalidRequest | ErrorCode::InvalidMessage => StatusCode::BAD_REQUEST,
            ErrorCode::InvalidNonce
            | ErrorCode::SignatureMismatch
            | ErrorCode::Unauthorized
            | ErrorCode::Expired => StatusCode::UNAUTHORIZED,
            ErrorCode::Forbidden => StatusCode::FORBIDDEN,
            ErrorCode::NotFound => StatusCode::NOT_FOUND,
            ErrorCode::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            ErrorCode::NetworkError => StatusCode::BAD_GATEWAY,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidRequest => "invalid_request",
            ErrorCode::InvalidMessage => "invalid_message",
            ErrorCode::InvalidNonce => "invalid_nonce",
            ErrorCode::SignatureMismatch => "signature_mismatch",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::Expired => "expired",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::NotFound => "not_found",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::NetworkError => "network_error",
            ErrorCode::InternalError => "internal_error",
        }
    }
}

impl Display for ErrorCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The single error type that crosses the HTTP boundary.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    /// Human-readable message. Generic on purpose: no credential echoes, no
    /// configuration values, no stack traces.
    pub error: String,
    pub code: ErrorCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            code,
            details: None,
        }
    }

    pub fn with_details(mut self, details: Value) -> Self {
        self.details = Some(details);
        self
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidRequest, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(ErrorCode::Unauthorized, "missing or invalid credentials")
    }

    pub fn expired() -> Self {
        Self::new(ErrorCode::Expired, "credential expired")
    }

    pub fn forbidden() -> Self {
        Self::new(ErrorCode::Forbidden, "access denied")
    }

    pub fn not_found() -> Self {
        Self::new(ErrorCode::NotFound, "not found")
    }

    pub fn internal() -> Self {
        Self::new(ErrorCode::InternalError, "internal error")
    }
}

impl Display for ApiError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.code, self.error)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.code.status(), Json(self)).into_response()
    }
}
