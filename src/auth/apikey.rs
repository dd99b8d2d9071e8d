//! Long-lived API keys: generation, hashed storage, validation, revocation.
//!
//! A raw key is 32 bytes of cryptographic randomness, hex-encoded to 64
//! characters. Only its SHA-256 digest is stored; the raw key leaves the
//! service exactly once, in the creation response, and is never logged or
//! echoed in errors. Validation fails closed: any store error denies access.

use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::store::{ApiKeyRecord, Store, StoreError};
use crate::types::{Claims, ClaimsSource, UnixTimestamp};

const RAW_KEY_BYTES: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum ApiKeyError {
    /// No key with that hash, or the referenced id is not visible to the
    /// requester. One variant on purpose: the caller cannot distinguish
    /// "absent" from "someone else's".
    #[error("api key not found")]
    NotFound,
    #[error("api key expired")]
    Expired,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Outcome of a revocation. Both variants mean "the key is no longer valid",
/// which is the observable effect revocation promises.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Revoked {
    Removed,
    AlreadyGone,
}

/// Hex SHA-256 of a raw key. Lookups are exact; no partial-hash matching.
pub fn hash_key(raw_key: &str) -> String {
    hex::encode(Sha256::digest(raw_key.as_bytes()))
}

pub struct ApiKeyService {
    store: Arc<dyn Store>,
}

impl ApiKeyService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Generates a raw key, persists its hash, and returns the raw key.
    /// This is the only time the raw key is ever visible.
    pub async fn create(
        &self,
        user_id: Uuid,
        name: &str,
        scopes: Vec<String>,
        expires_in: Option<Duration>,
        now: UnixTimestamp,
    ) -> Result<(String, ApiKeyRecord), ApiKeyError> {
        let mut bytes = [0u8; RAW_KEY_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let raw_key = hex::encode(bytes);

        let record = ApiKeyRecord {
            id: Uuid::new_v4(),
            user_id,
            key_hash: hash_key(&raw_key),
            name: name.to_string(),
            scopes,
            last_used_at: None,
            expires_at: expires_in.map(|d| now + d.as_secs()),
            created_at: now,
            updated_at: now,
        };
        self.store.insert_api_key(&record).await?;
        Ok((raw_key, record))
    }

    /// Hash lookup plus expiry and owner resolution. Returns the record and
    /// the claims to attach to the request.
    pub async fn validate(
        &self,
        raw_key: &str,
        now: UnixTimestamp,
    ) -> Result<(ApiKeyRecord, Claims), ApiKeyError> {
        let key_hash = hash_key(raw_key);
        let record = self
            .store
            .api_key_by_hash(&key_hash)
            .await?
            .ok_or(ApiKeyError::NotFound)?;
        if record.is_expired(now) {
            return Err(ApiKeyError::Expired);
        }
        let owner = self
            .store
            .user_by_id(record.user_id)
            .await?
            .ok_or(ApiKeyError::NotFound)?;
        let claims = Claims::new(owner.address, record.scopes.clone(), ClaimsSource::ApiKey);
        Ok((record, claims))
    }

    /// Best-effort `last_used_at` bump, spawned off the response path. A
    /// dropped update has no correctness impact.
    pub fn touch_last_used(&self, key_hash: String) {
        let store = self.store.clone();
        tokio::spawn(async move {
            let now = UnixTimestamp::now();
            if let Err(e) = store.touch_api_key(&key_hash, now).await {
                tracing::debug!(error = %e, "failed to update api key last_used_at");
            }
        });
    }

    /// Metadata only, `created_at` descending, expired keys included.
    pub async fn list(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>, ApiKeyError> {
        Ok(self.store.api_keys_by_user(user_id).await?)
    }

    /// Deletes the key iff `requester` owns it. Deleting an absent key is a
    /// successful no-op; a cross-user attempt reads as [`ApiKeyError::NotFound`]
    /// so existence is not disclosed.
    pub async fn revoke(&self, id: Uuid, requester: Uuid) -> Result<Revoked, ApiKeyError> {
        let Some(record) = self.store.api_key_by_id(id).await? else {
            return Ok(Revoked::AlreadyGone);
        };
        if record.user_id != requester {
            return Err(ApiKeyError::NotFound);
        }
        if self.store.delete_api_key(id).await? {
            Ok(Revoked::Removed)
        } else {
            Ok(Revoked::AlreadyGone)
        }
    }

    /// Batch removal of keys past expiry.
    pub async fn revoke_expired(&self, now: UnixTimestamp) -> Result<u64, ApiKeyError> {
        Ok(self.store.delete_expired_api_keys(now).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, UserStore};
    use crate::types::EvmAddress;

    const ADDRESS: &str = "0xd8da6bf26964af9d7eed9e03e53415d37aa96045";

    async fn service_with_user() -> (ApiKeyService, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let address: EvmAddress = ADDRESS.parse().unwrap();
        let user = store.upsert_user(&address, UnixTimestamp(1)).await.unwrap();
        (ApiKeyService::new(store), user.id)
    }

    #[tokio::test]
    async fn create_returns_a_64_hex_raw_key_and_its_hash() {
        let (service, user_id) = service_with_user().await;
        let (raw_key, record) = service
            .create(user_id, "ci", vec!["read".into()], None, UnixTimestamp(10))
            .await
            .unwrap();

        assert_eq!(raw_key.len(), 64);
        assert!(raw_key.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(record.key_hash, hash_key(&raw_key));
        assert_ne!(record.key_hash, raw_key);
        assert_eq!(record.name, "ci");
        assert_eq!(record.expires_at, None);
    }

    #[tokio::test]
    async fn validate_succeeds_for_a_live_key_and_builds_claims() {
        let (service, user_id) = service_with_user().await;
        let (raw_key, record) = service
            .create(user_id, "ci", vec!["read".into()], None, UnixTimestamp(10))
            .await
            .unwrap();

        let (found, claims) = service.validate(&raw_key, UnixTimestamp(20)).await.unwrap();
        assert_eq!(found.id, record.id);
        assert_eq!(claims.address.canonical(), ADDRESS);
        assert_eq!(claims.scopes, vec!["read".to_string()]);
        assert_eq!(claims.source, ClaimsSource::ApiKey);
    }

    #[tokio::test]
    async fn validate_rejects_unknown_and_expired_keys() {
        let (service, user_id) = service_with_user().await;
        assert!(matches!(
            service.validate("0".repeat(64).as_str(), UnixTimestamp(10)).await,
            Err(ApiKeyError::NotFound)
        ));

        let (raw_key, _) = service
            .create(
                user_id,
                "short-lived",
                vec![],
                Some(Duration::from_secs(60)),
                UnixTimestamp(100),
            )
            .await
            .unwrap();
        // expires_at = 160: valid at the boundary, invalid past it
        assert!(service.validate(&raw_key, UnixTimestamp(160)).await.is_ok());
        assert!(matches!(
            service.validate(&raw_key, UnixTimestamp(161)).await,
            Err(ApiKeyError::Expired)
        ));
    }

    #[tokio::test]
    async fn revoke_is_owner_gated_and_idempotent() {
        let (service, owner) = service_with_user().await;
        let stranger = Uuid::new_v4();
        let (raw_key, record) = service
            .create(owner, "ci", vec![], None, UnixTimestamp(10))
            .await
            .unwrap();

        assert!(matches!(
            service.revoke(record.id, stranger).await,
            Err(ApiKeyError::NotFound)
        ));
        assert_eq!(
            service.revoke(record.id, owner).await.unwrap(),
            Revoked::Removed
        );
        // Second revocation: same observable effect, no error.
        assert_eq!(
            service.revoke(record.id, owner).await.unwrap(),
            Revoked::AlreadyGone
        );
        assert!(matches!(
            service.validate(&raw_key, UnixTimestamp(20)).await,
            Err(ApiKeyError::NotFound)
        ));
    }

    #[tokio::test]
    async fn revoke_expired_counts_removed_rows() {
        let (service, user_id) = service_with_user().await;
        service
            .create(
                user_id,
                "stale",
                vec![],
                Some(Duration::from_secs(10)),
                UnixTimestamp(0),
            )
            .await
            .unwrap();
        service
            .create(user_id, "durable", vec![], None, UnixTimestamp(0))
            .await
            .unwrap();

        assert_eq!(service.revoke_expired(UnixTimestamp(100)).await.unwrap(), 1);
        assert_eq!(service.revoke_expired(UnixTimestamp(100)).await.unwrap(), 0);
        assert_eq!(service.list(user_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn listing_never_exposes_raw_key_material() {
        let (service, user_id) = service_with_user().await;
        let (raw_key, _) = service
            .create(user_id, "ci", vec![], None, UnixTimestamp(10))
            .await
            .unwrap();

        let listed = service.list(user_id).await.unwrap();
        let serialized = serde_json::to_string(&listed).unwrap();
        assert!(!serialized.contains(&raw_key));
    }
}
