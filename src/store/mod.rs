//! Durable records and the repository seams over them.
//!
//! Handlers and services talk to [`Store`] trait objects, never to a concrete
//! database handle, so tests run on [`MemoryStore`] and production on
//! [`PgStore`]. All mutating operations are single atomic writes; the traits
//! assume transactional single-row semantics and unique constraints on
//! `address`, `key_hash`, and `(allowlist_id, address)`.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::{EvmAddress, UnixTimestamp};

/// A wallet-identified account. Created lazily on first successful SIWE
/// verification or first API-key creation; never destroyed by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub address: EvmAddress,
    pub created_at: UnixTimestamp,
    pub updated_at: UnixTimestamp,
}

/// Stored metadata for an API key. `key_hash` is the hex SHA-256 of the raw
/// key; the raw key itself is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub id: Uuid,
    pub user_id: Uuid,
    pub key_hash: String,
    pub name: String,
    pub scopes: Vec<String>,
    pub last_used_at: Option<UnixTimestamp>,
    pub expires_at: Option<UnixTimestamp>,
    pub created_at: UnixTimestamp,
    pub updated_at: UnixTimestamp,
}

impl ApiKeyRecord {
    pub fn is_expired(&self, now: UnixTimestamp) -> bool {
        self.expires_at.is_some_and(|expires_at| expires_at < now)
    }
}

/// A named set of addresses consulted by `in_allowlist` policy rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allowlist {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub created_at: UnixTimestamp,
    pub updated_at: UnixTimestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AllowlistEntry {
    pub allowlist_id: Uuid,
    pub address: EvmAddress,
    pub added_at: UnixTimestamp,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("duplicate record")]
    Duplicate,
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db) = &e {
            if db.is_unique_violation() {
                return StoreError::Duplicate;
            }
        }
        StoreError::Unavailable(e.to_string())
    }
}

#[async_trait]
pub trait UserStore: Send + Sync {
    /// Finds or creates the user for `address`. The address is the primary
    /// identity key; concurrent upserts for the same address converge on a
    /// single row.
    async fn upsert_user(
        &self,
        address: &EvmAddress,
        now: UnixTimestamp,
    ) -> Result<User, StoreError>;

    async fn user_by_address(&self, address: &EvmAddress) -> Result<Option<User>, StoreError>;

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError>;
}

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    async fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError>;

    /// Exact hash lookup; no partial-hash matching.
    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, StoreError>;

    async fn api_key_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord>, StoreError>;

    /// All keys for a user, `created_at` descending, expired keys included.
    async fn api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>, StoreError>;

    async fn touch_api_key(&self, key_hash: &str, now: UnixTimestamp) -> Result<(), StoreError>;

    /// Returns whether a row was actually deleted.
    async fn delete_api_key(&self, id: Uuid) -> Result<bool, StoreError>;

    async fn delete_expired_api_keys(&self, now: UnixTimestamp) -> Result<u64, StoreError>;
}

#[async_trait]
pub trait AllowlistStore: Send + Sync {
    async fn create_allowlist(
        &self,
        name: &str,
        description: &str,
        now: UnixTimestamp,
    ) -> Result<Allowlist, StoreError>;

    /// Idempotent on `(allowlist_id, address)`.
    async fn add_allowlist_entry(
        &self,
        allowlist_id: Uuid,
        address: &EvmAddress,
        now: UnixTimestamp,
    ) -> Result<(), StoreError>;

    /// Case-insensitive membership check by allowlist name.
    async fn allowlist_contains(
        &self,
        name: &str,
        address: &EvmAddress,
    ) -> Result<bool, StoreError>;
}

/// The aggregate seam the rest of the crate depends on.
#[async_trait]
pub trait Store: UserStore + ApiKeyStore + AllowlistStore {
    /// Cheap reachability probe for readiness checks.
    async fn ping(&self) -> Result<(), StoreError>;
}
