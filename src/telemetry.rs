//! Tracing initialization.
//!
//! Structured logging goes through `tracing`; the subscriber is installed
//! once at startup with an `EnvFilter` so `RUST_LOG` controls verbosity.
//! Audit events use the dedicated `audit` target (see [`crate::audit`]) and
//! ride the same subscriber.

use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Builder for the process-wide tracing subscriber.
pub struct Telemetry {
    name: &'static str,
    version: &'static str,
}

impl Telemetry {
    pub fn new() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
        }
    }

    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    pub fn with_version(mut self, version: &'static str) -> Self {
        self.version = version;
        self
    }

    /// Installs the global subscriber. Safe to call once; subsequent calls
    /// in the same process (tests) are ignored.
    pub fn register(self) -> Self {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
        let registry = tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer());
        if registry.try_init().is_ok() {
            tracing::info!(service = self.name, version = self.version, "telemetry initialized");
        }
        self
    }

    /// Per-request HTTP tracing for the axum router.
    pub fn http_tracing(
        &self,
    ) -> TraceLayer<tower_http::classify::SharedClassifier<tower_http::classify::ServerErrorsAsFailures>>
    {
        TraceLayer::new_for_http()
    }
}

impl Default for Telemetry {
    fn default() -> Self {
        Self::new()
    }
}
