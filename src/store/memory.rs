//! In-memory store for tests and single-process deployments without a
//! database. Uniqueness constraints mirror the relational schema.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use super::{
    Allowlist, AllowlistStore, ApiKeyRecord, ApiKeyStore, Store, StoreError, User, UserStore,
};
use crate::types::{EvmAddress, UnixTimestamp};

#[derive(Default)]
pub struct MemoryStore {
    users: DashMap<EvmAddress, User>,
    api_keys: DashMap<Uuid, ApiKeyRecord>,
    // key_hash -> key id, mirroring the unique index on key_hash
    key_hashes: DashMap<String, Uuid>,
    allowlists: DashMap<String, Allowlist>,
    allowlist_entries: DashMap<(Uuid, EvmAddress), UnixTimestamp>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn upsert_user(
        &self,
        address: &EvmAddress,
        now: UnixTimestamp,
    ) -> Result<User, StoreError> {
        let user = self
            .users
            .entry(*address)
            .or_insert_with(|| User {
                id: Uuid::new_v4(),
                address: *address,
                created_at: now,
                updated_at: now,
            })
            .clone();
        Ok(user)
    }

    async fn user_by_address(&self, address: &EvmAddress) -> Result<Option<User>, StoreError> {
        Ok(self.users.get(address).map(|u| u.clone()))
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self
            .users
            .iter()
            .find(|entry| entry.value().id == id)
            .map(|entry| entry.value().clone()))
    }
}

#[async_trait]
impl ApiKeyStore for MemoryStore {
    async fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError> {
        if self.key_hashes.contains_key(&record.key_hash) {
            return Err(StoreError::Duplicate);
        }
        self.key_hashes.insert(record.key_hash.clone(), record.id);
        self.api_keys.insert(record.id, record.clone());
        Ok(())
    }

    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        let Some(id) = self.key_hashes.get(key_hash).map(|id| *id) else {
            return Ok(None);
        };
        Ok(self.api_keys.get(&id).map(|k| k.clone()))
    }

    async fn api_key_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord>, StoreError> {
        Ok(self.api_keys.get(&id).map(|k| k.clone()))
    }

    async fn api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let mut keys: Vec<ApiKeyRecord> = self
            .api_keys
            .iter()
            .filter(|entry| entry.value().user_id == user_id)
            .map(|entry| entry.value().clone())
            .collect();
        keys.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(keys)
    }

    async fn touch_api_key(&self, key_hash: &str, now: UnixTimestamp) -> Result<(), StoreError> {
        if let Some(id) = self.key_hashes.get(key_hash).map(|id| *id) {
            if let Some(mut record) = self.api_keys.get_mut(&id) {
                record.last_used_at = Some(now);
                record.updated_at = now;
            }
        }
        Ok(())
    }

    async fn delete_api_key(&self, id: Uuid) -> Result<bool, StoreError> {
        match self.api_keys.remove(&id) {
            Some((_, record)) => {
                self.key_hashes.remove(&record.key_hash);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn delete_expired_api_keys(&self, now: UnixTimestamp) -> Result<u64, StoreError> {
        let expired: Vec<Uuid> = self
            .api_keys
            .iter()
            .filter(|entry| entry.value().is_expired(now))
            .map(|entry| entry.value().id)
            .collect();
        let mut removed = 0;
        for id in expired {
            if self.delete_api_key(id).await? {
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl AllowlistStore for MemoryStore {
    async fn create_allowlist(
        &self,
        name: &str,
        description: &str,
        now: UnixTimestamp,
    ) -> Result<Allowlist, StoreError> {
        if self.allowlists.contains_key(name) {
            return Err(StoreError::Duplicate);
        }
        let list = Allowlist {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        };
        self.allowlists.insert(name.to_string(), list.clone());
        Ok(list)
    }

    async fn add_allowlist_entry(
        &self,
        allowlist_id: Uuid,
        address: &EvmAddress,
        now: UnixTimestamp,
    ) -> Result<(), StoreError> {
        self.allowlist_entries
            .entry((allowlist_id, *address))
            .or_insert(now);
        Ok(())
    }

    async fn allowlist_contains(
        &self,
        name: &str,
        address: &EvmAddress,
    ) -> Result<bool, StoreError> {
        let Some(list) = self.allowlists.get(name) else {
            return Ok(false);
        };
        Ok(self.allowlist_entries.contains_key(&(list.id, *address)))
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }
}
