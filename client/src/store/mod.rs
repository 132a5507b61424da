//! Local Store: named collections of JSON records in SQLite.
//!
//! Every collection is keyed by the record's `id` field (numbers and strings
//! are both accepted; numbers are stored in their decimal form). Each call
//! touches one record at a time and either fully applies or fails; there is
//! no multi-record atomicity.

mod pool;
mod upgrade;

pub use pool::*;
pub use upgrade::{run_upgrades, stored_version};

use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use worthy_engine::{clock, Layout, SchemaVersion, Timestamp};

/// Storage failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown collection: {0}")]
    UnknownCollection(String),

    #[error("Record in '{0}' has no usable id")]
    MissingKey(String),

    #[error("Engine error: {0}")]
    Engine(#[from] worthy_engine::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to the on-device store. Cheap to clone.
#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: Pool,
    collections: Arc<HashSet<String>>,
    version: SchemaVersion,
    sequence: Arc<Mutex<()>>,
}

impl LocalStore {
    /// Open the store at `database_url` with the current layout.
    pub async fn open(database_url: &str) -> Result<Self> {
        let pool = create_pool(database_url).await?;
        Self::open_with_layout(pool, &Layout::current()).await
    }

    /// A fresh in-memory store, mostly for tests.
    pub async fn in_memory() -> Result<Self> {
        Self::open("sqlite::memory:").await
    }

    /// Open an existing pool, upgrading it to `layout`.
    pub async fn open_with_layout(pool: Pool, layout: &Layout) -> Result<Self> {
        let previous = run_upgrades(&pool, layout).await?;

        let names: Vec<(String,)> = sqlx::query_as("SELECT name FROM collections")
            .fetch_all(&pool)
            .await?;

        tracing::info!(
            from = previous,
            to = layout.version(),
            collections = names.len(),
            "Opened local store"
        );

        Ok(Self {
            pool,
            collections: Arc::new(names.into_iter().map(|(n,)| n).collect()),
            version: layout.version(),
            sequence: Arc::default(),
        })
    }

    /// Layout version the store was opened at.
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn has_collection(&self, name: &str) -> bool {
        self.collections.contains(name)
    }

    /// Names of every collection, sorted.
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.collections.iter().cloned().collect();
        names.sort();
        names
    }

    /// Exclusive access for a read-then-write that must not interleave with
    /// another one on this store, from any clone.
    pub async fn sequenced(&self) -> MutexGuard<'_, ()> {
        self.sequence.lock().await
    }

    fn check(&self, collection: &str) -> Result<()> {
        if self.has_collection(collection) {
            Ok(())
        } else {
            Err(StoreError::UnknownCollection(collection.to_string()))
        }
    }

    /// Insert or replace a record, returning its key.
    pub async fn put(&self, collection: &str, record: &Value) -> Result<String> {
        self.check(collection)?;
        let key = key_of(record).ok_or_else(|| StoreError::MissingKey(collection.to_string()))?;
        let value = serde_json::to_string(record)?;

        sqlx::query(
            r#"
            INSERT INTO entries (collection, key, value) VALUES (?, ?, ?)
            ON CONFLICT (collection, key) DO UPDATE SET value = excluded.value
            "#,
        )
        .bind(collection)
        .bind(&key)
        .bind(value)
        .execute(&self.pool)
        .await?;

        Ok(key)
    }

    /// Write several records. Each succeeds or fails on its own.
    pub async fn put_many(&self, collection: &str, records: &[Value]) -> Vec<Result<String>> {
        let mut results = Vec::with_capacity(records.len());
        for record in records {
            results.push(self.put(collection, record).await);
        }
        results
    }

    /// Read one record.
    pub async fn get(&self, collection: &str, key: &str) -> Result<Option<Value>> {
        self.check(collection)?;
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM entries WHERE collection = ? AND key = ?")
                .bind(collection)
                .bind(key)
                .fetch_optional(&self.pool)
                .await?;

        row.map(|(raw,)| serde_json::from_str(&raw).map_err(StoreError::from))
            .transpose()
    }

    /// Read every record of a collection in insertion order.
    pub async fn get_all(&self, collection: &str) -> Result<Vec<Value>> {
        self.check(collection)?;
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT value FROM entries WHERE collection = ? ORDER BY rowid")
                .bind(collection)
                .fetch_all(&self.pool)
                .await?;

        rows.into_iter()
            .map(|(raw,)| serde_json::from_str(&raw).map_err(StoreError::from))
            .collect()
    }

    /// Delete one record. Returns whether it existed.
    pub async fn remove(&self, collection: &str, key: &str) -> Result<bool> {
        self.check(collection)?;
        let result = sqlx::query("DELETE FROM entries WHERE collection = ? AND key = ?")
            .bind(collection)
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every record of a collection.
    pub async fn clear(&self, collection: &str) -> Result<u64> {
        self.check(collection)?;
        let result = sqlx::query("DELETE FROM entries WHERE collection = ?")
            .bind(collection)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count(&self, collection: &str) -> Result<u64> {
        self.check(collection)?;
        let (count,): (i64,) = sqlx::query_as("SELECT COUNT(*) FROM entries WHERE collection = ?")
            .bind(collection)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as u64)
    }

    /// Bytes taken by the serialized records of a collection.
    pub async fn size_of(&self, collection: &str) -> Result<u64> {
        self.check(collection)?;
        let (size,): (i64,) = sqlx::query_as(
            "SELECT COALESCE(SUM(LENGTH(CAST(value AS BLOB))), 0) FROM entries WHERE collection = ?",
        )
        .bind(collection)
        .fetch_one(&self.pool)
        .await?;
        Ok(size as u64)
    }

    /// Remove records whose ISO date `field` is older than `cutoff`.
    /// Records without a readable date are kept.
    pub async fn purge_older_than(
        &self,
        collection: &str,
        field: &str,
        cutoff: Timestamp,
    ) -> Result<u64> {
        let mut removed = 0;
        for record in self.get_all(collection).await? {
            let stale = record
                .get(field)
                .and_then(Value::as_str)
                .and_then(clock::parse_iso)
                .is_some_and(|ts| ts < cutoff);
            if !stale {
                continue;
            }
            if let Some(key) = key_of(&record) {
                if self.remove(collection, &key).await? {
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            tracing::debug!(collection, field, removed, "Purged old records");
        }
        Ok(removed)
    }

    /// Typed [`LocalStore::put`].
    pub async fn put_as<T: Serialize>(&self, collection: &str, record: &T) -> Result<String> {
        let value = serde_json::to_value(record)?;
        self.put(collection, &value).await
    }

    /// Typed [`LocalStore::get`].
    pub async fn get_as<T: DeserializeOwned>(&self, collection: &str, key: &str) -> Result<Option<T>> {
        match self.get(collection, key).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    /// Typed [`LocalStore::get_all`].
    pub async fn get_all_as<T: DeserializeOwned>(&self, collection: &str) -> Result<Vec<T>> {
        self.get_all(collection)
            .await?
            .into_iter()
            .map(|v| serde_json::from_value(v).map_err(StoreError::from))
            .collect()
    }
}

/// Key of a record: its `id` as a string.
pub fn key_of(record: &Value) -> Option<String> {
    match record.get("id")? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
