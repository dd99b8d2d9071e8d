//! Postgres-backed store.
//!
//! Queries are plain runtime `sqlx::query` calls bound by position, so the
//! crate builds without a live database. Expected schema (managed by external
//! migrations):
//!
//! ```sql
//! CREATE TABLE users (
//!     id          UUID PRIMARY KEY,
//!     address     TEXT NOT NULL UNIQUE,
//!     created_at  BIGINT NOT NULL,
//!     updated_at  BIGINT NOT NULL
//! );
//! CREATE TABLE api_keys (
//!     id           UUID PRIMARY KEY,
//!     user_id      UUID NOT NULL REFERENCES users(id) ON DELETE CASCADE,
//!     key_hash     TEXT NOT NULL UNIQUE,
//!     name         TEXT NOT NULL,
//!     scopes       TEXT[] NOT NULL,
//!     last_used_at BIGINT,
//!     expires_at   BIGINT,
//!     created_at   BIGINT NOT NULL,
//!     updated_at   BIGINT NOT NULL
//! );
//! CREATE TABLE allowlists (
//!     id          UUID PRIMARY KEY,
//!     name        TEXT NOT NULL UNIQUE,
//!     description TEXT NOT NULL,
//!     created_at  BIGINT NOT NULL,
//!     updated_at  BIGINT NOT NULL
//! );
//! CREATE TABLE allowlist_entries (
//!     allowlist_id UUID NOT NULL REFERENCES allowlists(id) ON DELETE CASCADE,
//!     address      TEXT NOT NULL,
//!     added_at     BIGINT NOT NULL,
//!     UNIQUE (allowlist_id, address)
//! );
//! ```
//!
//! Addresses are stored in canonical lowercase form, so equality in SQL is
//! case-insensitive by construction.

use async_trait::async_trait;
use sqlx::Row;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use uuid::Uuid;

use super::{
    Allowlist, AllowlistStore, ApiKeyRecord, ApiKeyStore, Store, StoreError, User, UserStore,
};
use crate::types::{EvmAddress, UnixTimestamp};

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn timestamp(row: &PgRow, column: &str) -> Result<UnixTimestamp, StoreError> {
    let raw: i64 = row
        .try_get(column)
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    Ok(UnixTimestamp(raw.max(0) as u64))
}

fn optional_timestamp(row: &PgRow, column: &str) -> Result<Option<UnixTimestamp>, StoreError> {
    let raw: Option<i64> = row
        .try_get(column)
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    Ok(raw.map(|v| UnixTimestamp(v.max(0) as u64)))
}

fn user_from_row(row: &PgRow) -> Result<User, StoreError> {
    let address: String = row
        .try_get("address")
        .map_err(|e| StoreError::Unavailable(e.to_string()))?;
    Ok(User {
        id: row
            .try_get("id")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        address: address
            .parse()
            .map_err(|e: String| StoreError::Unavailable(e))?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

fn api_key_from_row(row: &PgRow) -> Result<ApiKeyRecord, StoreError> {
    Ok(ApiKeyRecord {
        id: row
            .try_get("id")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        user_id: row
            .try_get("user_id")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        key_hash: row
            .try_get("key_hash")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        name: row
            .try_get("name")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        scopes: row
            .try_get("scopes")
            .map_err(|e| StoreError::Unavailable(e.to_string()))?,
        last_used_at: optional_timestamp(row, "last_used_at")?,
        expires_at: optional_timestamp(row, "expires_at")?,
        created_at: timestamp(row, "created_at")?,
        updated_at: timestamp(row, "updated_at")?,
    })
}

#[async_trait]
impl UserStore for PgStore {
    async fn upsert_user(
        &self,
        address: &EvmAddress,
        now: UnixTimestamp,
    ) -> Result<User, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, address, created_at, updated_at)
            VALUES ($1, $2, $3, $3)
            ON CONFLICT (address) DO UPDATE SET updated_at = users.updated_at
            RETURNING id, address, created_at, updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(address.canonical())
        .bind(now.0 as i64)
        .fetch_one(&self.pool)
        .await?;
        user_from_row(&row)
    }

    async fn user_by_address(&self, address: &EvmAddress) -> Result<Option<User>, StoreError> {
        let row = sqlx::query(
            "SELECT id, address, created_at, updated_at FROM users WHERE address = $1",
        )
        .bind(address.canonical())
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn user_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        let row =
            sqlx::query("SELECT id, address, created_at, updated_at FROM users WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.as_ref().map(user_from_row).transpose()
    }
}

const API_KEY_COLUMNS: &str =
    "id, user_id, key_hash, name, scopes, last_used_at, expires_at, created_at, updated_at";

#[async_trait]
impl ApiKeyStore for PgStore {
    async fn insert_api_key(&self, record: &ApiKeyRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO api_keys
                (id, user_id, key_hash, name, scopes, last_used_at, expires_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(record.id)
        .bind(record.user_id)
        .bind(&record.key_hash)
        .bind(&record.name)
        .bind(&record.scopes)
        .bind(record.last_used_at.map(|t| t.0 as i64))
        .bind(record.expires_at.map(|t| t.0 as i64))
        .bind(record.created_at.0 as i64)
        .bind(record.updated_at.0 as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn api_key_by_hash(&self, key_hash: &str) -> Result<Option<ApiKeyRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE key_hash = $1"
        ))
        .bind(key_hash)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(api_key_from_row).transpose()
    }

    async fn api_key_by_id(&self, id: Uuid) -> Result<Option<ApiKeyRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(api_key_from_row).transpose()
    }

    async fn api_keys_by_user(&self, user_id: Uuid) -> Result<Vec<ApiKeyRecord>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {API_KEY_COLUMNS} FROM api_keys WHERE user_id = $1 ORDER BY created_at DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(api_key_from_row).collect()
    }

    async fn touch_api_key(&self, key_hash: &str, now: UnixTimestamp) -> Result<(), StoreError> {
        sqlx::query("UPDATE api_keys SET last_used_at = $1, updated_at = $1 WHERE key_hash = $2")
            .bind(now.0 as i64)
            .bind(key_hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_api_key(&self, id: Uuid) -> Result<bool, StoreError> {
        let result = sqlx::query("DELETE FROM api_keys WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_expired_api_keys(&self, now: UnixTimestamp) -> Result<u64, StoreError> {
        let result =
            sqlx::query("DELETE FROM api_keys WHERE expires_at IS NOT NULL AND expires_at < $1")
                .bind(now.0 as i64)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl AllowlistStore for PgStore {
    async fn create_allowlist(
        &self,
        name: &str,
        description: &str,
        now: UnixTimestamp,
    ) -> Result<Allowlist, StoreError> {
        let id = Uuid::new_v4();
        sqlx::query(
            r#"
            INSERT INTO allowlists (id, name, description, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $4)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(description)
        .bind(now.0 as i64)
        .execute(&self.pool)
        .await?;
        Ok(Allowlist {
            id,
            name: name.to_string(),
            description: description.to_string(),
            created_at: now,
            updated_at: now,
        })
    }

    async fn add_allowlist_entry(
        &self,
        allowlist_id: Uuid,
        address: &EvmAddress,
        now: UnixTimestamp,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO allowlist_entries (allowlist_id, address, added_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (allowlist_id, address) DO NOTHING
            "#,
        )
        .bind(allowlist_id)
        .bind(address.canonical())
        .bind(now.0 as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn allowlist_contains(
        &self,
        name: &str,
        address: &EvmAddress,
    ) -> Result<bool, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT 1 AS present
            FROM allowlist_entries e
            JOIN allowlists l ON l.id = e.allowlist_id
            WHERE l.name = $1 AND e.address = $2
            "#,
        )
        .bind(name)
        .bind(address.canonical())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
