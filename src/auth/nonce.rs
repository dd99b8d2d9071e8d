//! One-shot nonces for SIWE challenges.
//!
//! A nonce is valid between issuance and the earlier of consumption or
//! expiry. Consumption is the single atomic step that decides a race: two
//! concurrent verifications may both observe a valid nonce, but only one
//! `consume` succeeds. Callers pass `now` so expiry is testable.

use dashmap::DashMap;
use rand::RngCore;
use std::time::Duration;

use crate::types::UnixTimestamp;

/// 128 bits of randomness; collisions are statistically impossible.
const NONCE_BYTES: usize = 16;

#[derive(Debug, Clone, Copy)]
struct NonceEntry {
    created_at: UnixTimestamp,
    expires_at: UnixTimestamp,
    used: bool,
    used_at: Option<UnixTimestamp>,
}

impl NonceEntry {
    fn live(&self, now: UnixTimestamp) -> bool {
        !self.used && now < self.expires_at
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NonceError {
    #[error("nonce unknown, expired, or already used")]
    Invalid,
}

pub struct NonceService {
    nonces: DashMap<String, NonceEntry>,
    ttl: Duration,
}

impl NonceService {
    pub fn new(ttl: Duration) -> Self {
        Self {
            nonces: DashMap::new(),
            ttl,
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Draws a fresh nonce and records it with the configured TTL.
    pub fn generate(&self, now: UnixTimestamp) -> String {
        let mut bytes = [0u8; NONCE_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let value = hex::encode(bytes);
        self.nonces.insert(
            value.clone(),
            NonceEntry {
                created_at: now,
                expires_at: now + self.ttl.as_secs(),
                used: false,
                used_at: None,
            },
        );
        value
    }

    /// True iff the nonce is present, unexpired, and unused. Reveals nothing
    /// beyond the boolean.
    pub fn verify(&self, nonce: &str, now: UnixTimestamp) -> bool {
        self.nonces
            .get(nonce)
            .map(|entry| entry.live(now))
            .unwrap_or(false)
    }

    /// Atomically marks the nonce used. At most one call per nonce succeeds
    /// across all interleavings; losers get [`NonceError::Invalid`].
    pub fn consume(&self, nonce: &str, now: UnixTimestamp) -> Result<(), NonceError> {
        let mut entry = self.nonces.get_mut(nonce).ok_or(NonceError::Invalid)?;
        if !entry.live(now) {
            return Err(NonceError::Invalid);
        }
        entry.used = true;
        entry.used_at = Some(now);
        Ok(())
    }

    /// Reclaims expired entries. Used nonces stay until their expiry passes
    /// so replayed values keep failing as "used" rather than "unknown".
    pub fn cleanup(&self, now: UnixTimestamp) -> usize {
        let before = self.nonces.len();
        self.nonces.retain(|_, entry| now < entry.expires_at);
        before - self.nonces.len()
    }

    pub fn len(&self) -> usize {
        self.nonces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nonces.is_empty()
    }

    #[cfg(test)]
    fn issued_at(&self, nonce: &str) -> Option<UnixTimestamp> {
        self.nonces.get(nonce).map(|entry| entry.created_at)
    }
}
