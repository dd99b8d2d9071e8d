//! Process-wide application state and background sweepers.
//!
//! Everything the handlers and middleware share lives here behind `Arc`s:
//! the store, the nonce table, the cache, the chain client, the policy
//! registry, the rate limiters, and the audit channel. The sweepers run on
//! fixed intervals until the shutdown token cancels them; a missed tick is
//! harmless because every cleanup is idempotent.

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::audit::AuditLog;
use crate::auth::{ApiKeyService, NonceService, SiweVerifier, TokenService};
use crate::cache::TtlCache;
use crate::chain::ChainClient;
use crate::config::Config;
use crate::policy::PolicyRegistry;
use crate::ratelimit::RateLimiter;
use crate::store::{MemoryStore, PgStore, Store};
use crate::types::UnixTimestamp;

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const BUCKET_IDLE_HORIZON: Duration = Duration::from_secs(3600);
const AUDIT_BUFFER: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("failed to connect to the database: {0}")]
    Database(String),
    #[error("failed to construct the chain client: {0}")]
    Chain(String),
    #[error("failed to load the policy document: {0}")]
    Policy(String),
}

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub nonces: Arc<NonceService>,
    pub siwe: Arc<SiweVerifier>,
    pub tokens: Arc<TokenService>,
    pub api_keys: Arc<ApiKeyService>,
    pub cache: Arc<TtlCache>,
    pub chain: Option<Arc<ChainClient>>,
    pub policies: Arc<PolicyRegistry>,
    pub general_limiter: Arc<RateLimiter>,
    pub create_limiter: Arc<RateLimiter>,
    pub audit: AuditLog,
}

impl AppState {
    /// Wires the full state from configuration: picks the store backend,
    /// connects the chain client when an RPC endpoint is configured, and
    /// loads the initial policy set.
    pub async fn try_new(config: Config) -> Result<Self, StateError> {
        let store: Arc<dyn Store> = match &config.database_url {
            Some(url) => {
                let store = PgStore::connect(url, config.db_max_connections)
                    .await
                    .map_err(|e| StateError::Database(e.to_string()))?;
                tracing::info!("connected to postgres store");
                Arc::new(store)
            }
            None => {
                tracing::warn!("DATABASE_URL not set, using the in-memory store");
                Arc::new(MemoryStore::new())
            }
        };

        let chain = match &config.ethereum_rpc {
            Some(primary) => {
                let client = ChainClient::new(
                    primary.clone(),
                    config.ethereum_rpc_fallback.clone(),
                    config.chain_id,
                    config.rpc_timeout,
                )
                .map_err(|e| StateError::Chain(e.to_string()))?;
                tracing::info!(chain_id = config.chain_id, "chain client initialized");
                Some(Arc::new(client))
            }
            None => {
                tracing::warn!("ETHEREUM_RPC not set, on-chain policy rules will fail closed");
                None
            }
        };

        let policies = Arc::new(PolicyRegistry::new(
            config.policy_default_allow,
            config.policy_error_as_forbidden,
        ));
        if let Some(json) = &config.policy_json {
            let count = policies
                .load_document(json)
                .map_err(|e| StateError::Policy(e.to_string()))?;
            tracing::info!(count, "loaded policies from POLICY_JSON");
        } else if let Some(path) = &config.policy_file {
            let count = policies
                .load_file(path)
                .map_err(|e| StateError::Policy(e.to_string()))?;
            tracing::info!(count, path = %path, "loaded policies from file");
        }

        let nonces = Arc::new(NonceService::new(config.nonce_ttl));

        Ok(Self {
            nonces: nonces.clone(),
            siwe: Arc::new(SiweVerifier::new(nonces)),
            tokens: Arc::new(TokenService::new(
                config.jwt_secret.as_bytes(),
                config.jwt_expiry,
            )),
            api_keys: Arc::new(ApiKeyService::new(store.clone())),
            cache: Arc::new(TtlCache::new(config.cache_ttl)),
            chain,
            policies,
            general_limiter: Arc::new(RateLimiter::per_minute(
                config.rate_limit_per_minute,
                config.rate_limit_burst,
            )),
            create_limiter: Arc::new(RateLimiter::per_hour(
                config.key_create_per_hour,
                config.key_create_burst,
            )),
            audit: AuditLog::spawn(AUDIT_BUFFER),
            store,
            config: Arc::new(config),
        })
    }

    /// Starts the periodic sweepers: nonce cleanup, cache cleanup, expired
    /// key removal, and idle rate-bucket eviction. All stop on cancellation.
    pub fn spawn_sweepers(&self, shutdown: CancellationToken) {
        let nonces = self.nonces.clone();
        let cache = self.cache.clone();
        let api_keys = self.api_keys.clone();
        let general = self.general_limiter.clone();
        let create = self.create_limiter.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        tracing::debug!("sweepers stopping");
                        break;
                    }
                    _ = ticker.tick() => {
                        let now = UnixTimestamp::now();
                        let reclaimed = nonces.cleanup(now);
                        let evicted = cache.cleanup();
                        let idle = general.evict_idle(now, BUCKET_IDLE_HORIZON)
                            + create.evict_idle(now, BUCKET_IDLE_HORIZON);
                        match api_keys.revoke_expired(now).await {
                            Ok(swept) if swept > 0 => {
                                tracing::info!(swept, "removed expired api keys");
                            }
                            Ok(_) => {}
                            Err(e) => tracing::warn!(error = %e, "expired key sweep failed"),
                        }
                        if reclaimed > 0 || evicted > 0 || idle > 0 {
                            tracing::debug!(reclaimed, evicted, idle, "sweep pass complete");
                        }
                    }
                }
            }
        });
    }

    /// Test-oriented constructor on the in-memory store with no chain client.
    #[cfg(test)]
    pub async fn for_tests(config: Config) -> Self {
        Self::try_new(config).await.expect("test state builds")
    }
}
