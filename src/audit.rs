//! Security audit trail.
//!
//! Events flow through a bounded channel to a drain worker that emits them as
//! structured `tracing` records under the `audit` target, keeping the hot
//! path free of logging back-pressure. When the buffer is full the event is
//! written synchronously instead of being dropped: an audit trail that loses
//! denials under load is not an audit trail.
//!
//! Events carry identities, routes, and decisions. Tokens, raw keys, and
//! message bodies never enter an event.

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

const AUDIT_TARGET: &str = "audit";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditDecision {
    Allow,
    Deny,
    Error,
}

impl AuditDecision {
    fn as_str(&self) -> &'static str {
        match self {
            AuditDecision::Allow => "allow",
            AuditDecision::Deny => "deny",
            AuditDecision::Error => "error",
        }
    }
}

/// One security-relevant occurrence.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// What happened, e.g. `siwe_verify`, `api_key_auth`, `policy_gate`.
    pub kind: &'static str,
    pub decision: AuditDecision,
    /// Canonical address or normalized IP, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Stable reason slug or short description. Never secret material.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Structured extras, e.g. the per-rule policy trace.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl AuditEvent {
    pub fn new(kind: &'static str, decision: AuditDecision) -> Self {
        Self {
            kind,
            decision,
            identity: None,
            method: None,
            path: None,
            reason: None,
            details: None,
        }
    }

    pub fn identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = Some(identity.into());
        self
    }

    pub fn route(mut self, method: impl Into<String>, path: impl Into<String>) -> Self {
        self.method = Some(method.into());
        self.path = Some(path.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

fn emit(event: &AuditEvent) {
    tracing::info!(
        target: AUDIT_TARGET,
        kind = event.kind,
        decision = event.decision.as_str(),
        identity = event.identity.as_deref().unwrap_or("-"),
        method = event.method.as_deref().unwrap_or("-"),
        path = event.path.as_deref().unwrap_or("-"),
        reason = event.reason.as_deref().unwrap_or("-"),
        details = %event
            .details
            .as_ref()
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string()),
        "audit"
    );
}

/// Cloneable handle feeding the audit channel.
#[derive(Clone)]
pub struct AuditLog {
    tx: mpsc::Sender<AuditEvent>,
}

impl AuditLog {
    /// Spawns the drain worker and returns the sending handle.
    pub fn spawn(capacity: usize) -> Self {
        let (tx, mut rx) = mpsc::channel::<AuditEvent>(capacity.max(1));
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                emit(&event);
            }
        });
        Self { tx }
    }

    /// A log without a drain worker, for synchronous contexts and tests.
    pub fn disabled() -> Self {
        let (tx, _rx) = mpsc::channel(1);
        Self { tx }
    }

    /// Queues the event; on a full buffer, warns once and emits inline.
    pub fn record(&self, event: AuditEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                tracing::warn!(target: AUDIT_TARGET, "audit buffer full, emitting synchronously");
                emit(&event);
            }
            Err(TrySendError::Closed(event)) => emit(&event),
        }
    }
}
