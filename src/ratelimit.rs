//! Per-identity token buckets.
//!
//! Identity is the authenticated address when one exists, otherwise the
//! normalized remote IP. Each bucket refills continuously at the configured
//! steady rate up to a burst-sized capacity; a request takes one token.
//! Denials come back with enough arithmetic for the `Retry-After` and
//! `X-RateLimit-*` headers. Idle buckets are evicted periodically to bound
//! memory.

use dashmap::DashMap;
use std::time::Duration;

use crate::types::UnixTimestamp;

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: UnixTimestamp,
    last_seen: UnixTimestamp,
}

/// One admission decision plus the numbers the HTTP headers need.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateDecision {
    pub allowed: bool,
    /// Bucket capacity, for `X-RateLimit-Limit`.
    pub limit: u64,
    /// Whole tokens left after this decision, for `X-RateLimit-Remaining`.
    pub remaining: u64,
    /// Seconds until one token refills; zero when allowed. `Retry-After`.
    pub retry_after: u64,
    /// Unix second at which the bucket is full again, `X-RateLimit-Reset`.
    pub reset: u64,
}

pub struct RateLimiter {
    buckets: DashMap<String, Bucket>,
    /// Steady refill rate in tokens per second.
    rate_per_second: f64,
    /// Bucket capacity; also the initial fill.
    capacity: f64,
}

impl RateLimiter {
    pub fn new(rate_per_second: f64, burst: f64) -> Self {
        Self {
            buckets: DashMap::new(),
            rate_per_second: rate_per_second.max(f64::MIN_POSITIVE),
            capacity: burst.max(1.0),
        }
    }

    /// Convenience constructor matching the configuration surface.
    pub fn per_minute(rate_per_minute: f64, burst: f64) -> Self {
        Self::new(rate_per_minute / 60.0, burst)
    }

    pub fn per_hour(rate_per_hour: f64, burst: f64) -> Self {
        Self::new(rate_per_hour / 3600.0, burst)
    }

    /// Refill-then-take, atomic per identity.
    pub fn allow(&self, identity: &str, now: UnixTimestamp) -> RateDecision {
        let mut entry = self
            .buckets
            .entry(identity.to_string())
            .or_insert(Bucket {
                tokens: self.capacity,
                last_refill: now,
                last_seen: now,
            });
        let bucket = entry.value_mut();

        let elapsed = now.saturating_sub(bucket.last_refill) as f64;
        bucket.tokens = (bucket.tokens + elapsed * self.rate_per_second).min(self.capacity);
        bucket.last_refill = now;
        bucket.last_seen = now;

        let allowed = bucket.tokens >= 1.0;
        if allowed {
            bucket.tokens -= 1.0;
        }
        let retry_after = if allowed {
            0
        } else {
            ((1.0 - bucket.tokens) / self.rate_per_second).ceil() as u64
        };
        let reset = now.0
            + ((self.capacity - bucket.tokens) / self.rate_per_second).ceil() as u64;

        RateDecision {
            allowed,
            limit: self.capacity as u64,
            remaining: bucket.tokens.floor().max(0.0) as u64,
            retry_after,
            reset,
        }
    }

    /// Drops buckets idle beyond `horizon`. Harmless to run at any cadence;
    /// an evicted identity simply starts over with a full bucket.
    pub fn evict_idle(&self, now: UnixTimestamp, horizon: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now.saturating_sub(bucket.last_seen) < horizon.as_secs());
        before - self.buckets.len()
    }

    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
