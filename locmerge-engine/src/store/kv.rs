//! Persistent key-value layer
//!
//! A keyspace is one SQLite file with a single `kv_entries` table. Keys are
//! strings or integers, values are JSON. "Not found" is `Ok(None)`, never an
//! error. Every write (single or batch) is one transaction, so a crash leaves
//! either all or none of it.

use crate::utils::{begin_monitored, retry_on_lock, MonitoredTransaction};
use locmerge_common::db::init::{init_keyspace, init_memory_keyspace};
use locmerge_common::Result;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sqlx::{SqliteConnection, SqlitePool};
use std::fmt;
use std::path::Path;
use tracing::debug;

/// Key of a keyspace entry
///
/// Integer keys are stored as `#<n>`. String keys starting with `#` get a
/// second `#`, so the two kinds never share a stored key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum KvKey {
    Str(String),
    Int(i64),
}

impl KvKey {
    fn storage_key(&self) -> String {
        match self {
            KvKey::Str(s) if s.starts_with('#') => format!("#{}", s),
            KvKey::Str(s) => s.clone(),
            KvKey::Int(n) => format!("#{}", n),
        }
    }
}

/// String key of a stored key; `None` for integer keys
fn string_key(stored: String) -> Option<String> {
    if stored.starts_with("##") {
        Some(stored[1..].to_string())
    } else if stored.starts_with('#') {
        None
    } else {
        Some(stored)
    }
}

impl fmt::Display for KvKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.storage_key())
    }
}

impl From<&str> for KvKey {
    fn from(s: &str) -> Self {
        KvKey::Str(s.to_string())
    }
}

impl From<String> for KvKey {
    fn from(s: String) -> Self {
        KvKey::Str(s)
    }
}

impl From<i64> for KvKey {
    fn from(n: i64) -> Self {
        KvKey::Int(n)
    }
}

/// One write of an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KvWrite {
    Put { key: String, value: String },
    Delete { key: String },
}

impl KvWrite {
    /// Serialize `value` into a put
    pub fn put<T: Serialize + ?Sized>(key: impl Into<KvKey>, value: &T) -> Result<Self> {
        Ok(KvWrite::Put {
            key: key.into().storage_key(),
            value: serde_json::to_string(value)?,
        })
    }

    pub fn delete(key: impl Into<KvKey>) -> Self {
        KvWrite::Delete {
            key: key.into().storage_key(),
        }
    }
}

/// Handle on one keyspace
#[derive(Clone)]
pub struct KvStore {
    pool: SqlitePool,
    name: &'static str,
    max_lock_wait_ms: u64,
}

impl KvStore {
    /// Open (creating if needed) the keyspace file at `path`
    pub async fn open(path: &Path, name: &'static str, max_lock_wait_ms: u64) -> Result<Self> {
        let pool = init_keyspace(path, name).await?;
        Ok(Self::from_pool(pool, name, max_lock_wait_ms))
    }

    /// Open a private in-memory keyspace
    pub async fn open_in_memory(name: &'static str, max_lock_wait_ms: u64) -> Result<Self> {
        let pool = init_memory_keyspace(name).await?;
        Ok(Self::from_pool(pool, name, max_lock_wait_ms))
    }

    pub fn from_pool(pool: SqlitePool, name: &'static str, max_lock_wait_ms: u64) -> Self {
        Self {
            pool,
            name,
            max_lock_wait_ms,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Read and decode one value; `Ok(None)` when the key is absent
    pub async fn get<T: DeserializeOwned>(&self, key: impl Into<KvKey>) -> Result<Option<T>> {
        let key = key.into().storage_key();
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_entries WHERE key = ?")
            .bind(&key)
            .fetch_optional(&self.pool)
            .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    /// Insert or replace one value
    pub async fn put<T: Serialize + ?Sized>(&self, key: impl Into<KvKey>, value: &T) -> Result<()> {
        let key = key.into().storage_key();
        let value = serde_json::to_string(value)?;

        let pool = &self.pool;
        let (key_ref, value_ref) = (key.as_str(), value.as_str());
        retry_on_lock("kv_put", self.max_lock_wait_ms, move || async move {
            let mut conn = pool.acquire().await?;
            upsert(&mut conn, key_ref, value_ref).await
        })
        .await?;

        debug!(keyspace = self.name, key = %key, "Stored entry");
        Ok(())
    }

    /// Remove one key; returns whether it existed
    pub async fn delete(&self, key: impl Into<KvKey>) -> Result<bool> {
        let key = key.into().storage_key();

        let pool = &self.pool;
        let key_ref = key.as_str();
        let removed = retry_on_lock("kv_delete", self.max_lock_wait_ms, move || async move {
            let mut conn = pool.acquire().await?;
            delete_key(&mut conn, key_ref).await
        })
        .await?;

        debug!(keyspace = self.name, key = %key, removed, "Deleted entry");
        Ok(removed)
    }

    /// All entries whose string key starts with `prefix`, ordered by key
    ///
    /// Integer keys are never matched.
    pub async fn scan_prefix<T: DeserializeOwned>(&self, prefix: &str) -> Result<Vec<(String, T)>> {
        let stored_prefix = KvKey::from(prefix).storage_key();
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT key, value FROM kv_entries \
             WHERE substr(key, 1, ?) = ? AND key NOT GLOB '#[^#]*' ORDER BY key",
        )
        .bind(stored_prefix.chars().count() as i64)
        .bind(&stored_prefix)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .filter_map(|(key, raw)| string_key(key).map(|key| (key, raw)))
            .map(|(key, raw)| Ok((key, serde_json::from_str(&raw)?)))
            .collect()
    }

    /// Number of entries whose string key starts with `prefix`
    pub async fn count_prefix(&self, prefix: &str) -> Result<u64> {
        let stored_prefix = KvKey::from(prefix).storage_key();
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM kv_entries WHERE substr(key, 1, ?) = ? AND key NOT GLOB '#[^#]*'",
        )
        .bind(stored_prefix.chars().count() as i64)
        .bind(&stored_prefix)
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }

    /// Apply a batch of writes in one transaction
    pub async fn apply(&self, caller: &'static str, writes: &[KvWrite]) -> Result<()> {
        if writes.is_empty() {
            return Ok(());
        }

        let pool = &self.pool;
        retry_on_lock(caller, self.max_lock_wait_ms, move || async move {
            let mut tx = begin_monitored(pool, caller).await?;
            for write in writes {
                let conn: &mut SqliteConnection = tx.inner_mut()?;
                match write {
                    KvWrite::Put { key, value } => upsert(conn, key, value).await?,
                    KvWrite::Delete { key } => {
                        delete_key(conn, key).await?;
                    }
                }
            }
            tx.commit().await
        })
        .await?;

        debug!(keyspace = self.name, caller, writes = writes.len(), "Applied write batch");
        Ok(())
    }

    /// Remove every entry of the keyspace
    pub async fn clear(&self) -> Result<u64> {
        let pool = &self.pool;
        let removed = retry_on_lock("kv_clear", self.max_lock_wait_ms, move || async move {
            let result = sqlx::query("DELETE FROM kv_entries").execute(pool).await?;
            Ok(result.rows_affected())
        })
        .await?;

        debug!(keyspace = self.name, removed, "Cleared keyspace");
        Ok(removed)
    }

    /// Start a read-write transaction; dropping it uncommitted rolls back
    pub async fn begin(&self, caller: &'static str) -> Result<KvTransaction<'_>> {
        let tx = begin_monitored(&self.pool, caller).await?;
        Ok(KvTransaction { tx })
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Multi-key read-modify-write inside one keyspace transaction
pub struct KvTransaction<'c> {
    tx: MonitoredTransaction<'c>,
}

impl<'c> KvTransaction<'c> {
    pub async fn get<T: DeserializeOwned>(&mut self, key: impl Into<KvKey>) -> Result<Option<T>> {
        let key = key.into().storage_key();
        let conn: &mut SqliteConnection = self.tx.inner_mut()?;
        let raw: Option<String> = sqlx::query_scalar("SELECT value FROM kv_entries WHERE key = ?")
            .bind(&key)
            .fetch_optional(&mut *conn)
            .await?;

        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn put<T: Serialize + ?Sized>(&mut self, key: impl Into<KvKey>, value: &T) -> Result<()> {
        let key = key.into().storage_key();
        let value = serde_json::to_string(value)?;
        upsert(self.tx.inner_mut()?, &key, &value).await
    }

    pub async fn delete(&mut self, key: impl Into<KvKey>) -> Result<bool> {
        let key = key.into().storage_key();
        delete_key(self.tx.inner_mut()?, &key).await
    }

    pub async fn commit(self) -> Result<()> {
        self.tx.commit().await
    }
}

async fn upsert(conn: &mut SqliteConnection, key: &str, value: &str) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO kv_entries (key, value) VALUES (?, ?)
        ON CONFLICT(key) DO UPDATE SET
            value = excluded.value,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(key)
    .bind(value)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

async fn delete_key(conn: &mut SqliteConnection, key: &str) -> Result<bool> {
    let result = sqlx::query("DELETE FROM kv_entries WHERE key = ?")
        .bind(key)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected() > 0)
}
