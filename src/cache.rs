//! TTL-bounded in-memory cache with single-flight reads.
//!
//! The cache fronts chain reads, keyed by strings like
//! `erc20_balance:{chain_id}:{token}:{address}`. Values are opaque JSON so
//! every caller shares one map. A per-key flight guard collapses concurrent
//! misses into one underlying fetch, protecting the RPC budget during a miss
//! stampede.

use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

#[derive(Debug, Clone)]
struct CacheEntry {
    value: Value,
    expires_at: Instant,
}

pub struct TtlCache {
    entries: DashMap<String, CacheEntry>,
    flights: DashMap<String, Arc<Mutex<()>>>,
    default_ttl: Duration,
}

impl TtlCache {
    pub fn new(default_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            flights: DashMap::new(),
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub fn set(&self, key: &str, value: Value, ttl: Duration) {
        self.set_at(key, value, ttl, Instant::now());
    }

    /// A hit is an entry whose deadline has not passed. Expired entries are
    /// deleted opportunistically on the way out.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.get_at(key, Instant::now())
    }

    pub fn delete(&self, key: &str) {
        self.entries.remove(key);
    }

    /// Removes every expired entry. Idempotent; returns how many were dropped.
    pub fn cleanup(&self) -> usize {
        self.cleanup_at(Instant::now())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn set_at(&self, key: &str, value: Value, ttl: Duration, now: Instant) {
        self.entries.insert(
            key.to_string(),
            CacheEntry {
                value,
                expires_at: now + ttl,
            },
        );
    }

    fn get_at(&self, key: &str, now: Instant) -> Option<Value> {
        match self.entries.get(key) {
            Some(entry) if now < entry.expires_at => Some(entry.value.clone()),
            Some(_) => {
                drop(self.entries.remove_if(key, |_, entry| now >= entry.expires_at));
                None
            }
            None => None,
        }
    }

    fn cleanup_at(&self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| now < entry.expires_at);
        before - self.entries.len()
    }

    /// Read-through with single-flight collapse: on a miss, at most one
    /// concurrent caller runs `fetch`; the rest wait and read the freshly
    /// cached value. Fetch errors are not cached.
    pub async fn get_or_fetch<F, Fut, E>(&self, key: &str, ttl: Duration, fetch: F) -> Result<Value, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Value, E>>,
    {
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let gate = self
            .flights
            .entry(key.to_string())
            .or_default()
            .value()
            .clone();
        let _flight = gate.lock().await;
        // A winner may have populated the entry while we waited.
        if let Some(value) = self.get(key) {
            return Ok(value);
        }
        let result = fetch().await;
        if let Ok(value) = &result {
            self.set(key, value.clone(), ttl);
        }
        drop(_flight);
        // Our clone plus the map's copy: count 2 means nobody else waits.
        self.flights.remove_if(key, |_, gate| Arc::strong_count(gate) <= 2);
        result
    }
}
