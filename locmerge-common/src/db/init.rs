//! Keyspace initialization
//!
//! Each keyspace is one SQLite file holding a single `kv_entries` table.
//! The file is created on first use; opening an existing file is idempotent.
//! WAL journaling makes every committed transaction durable across a
//! process crash, which resumable passes rely on.

use crate::{Error, Result};
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::{debug, info};

/// Open (creating if needed) the keyspace file at `db_path`
///
/// `name` is recorded in the file on creation; reopening the file under a
/// different name fails, so the two keyspaces cannot be swapped by mistake.
pub async fn init_keyspace(db_path: &Path, name: &str) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(4)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new {} keyspace: {}", name, db_path.display());
    } else {
        info!("Opened existing {} keyspace: {}", name, db_path.display());
    }

    // WAL: a committed transaction survives a crash of this process
    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;

    sqlx::query("PRAGMA busy_timeout = 250")
        .execute(&pool)
        .await?;

    create_kv_table(&pool).await?;
    create_keyspace_meta_table(&pool).await?;
    claim_keyspace_name(&pool, name).await?;

    Ok(pool)
}

/// Open a private in-memory keyspace (tests and throwaway passes)
///
/// The pool is pinned to one connection that never expires, since every
/// SQLite memory connection is its own database.
pub async fn init_memory_keyspace(name: &str) -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .min_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect("sqlite::memory:")
        .await?;

    create_kv_table(&pool).await?;
    create_keyspace_meta_table(&pool).await?;
    claim_keyspace_name(&pool, name).await?;

    debug!("Initialized in-memory {} keyspace", name);

    Ok(pool)
}

pub async fn create_kv_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS kv_entries (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn create_keyspace_meta_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS keyspace_meta (
            name TEXT NOT NULL,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

async fn claim_keyspace_name(pool: &SqlitePool, name: &str) -> Result<()> {
    let existing: Option<String> = sqlx::query_scalar("SELECT name FROM keyspace_meta LIMIT 1")
        .fetch_optional(pool)
        .await?;

    match existing {
        Some(existing) if existing == name => Ok(()),
        Some(existing) => Err(Error::Config(format!(
            "Keyspace file belongs to '{}', expected '{}'",
            existing, name
        ))),
        None => {
            sqlx::query("INSERT INTO keyspace_meta (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await?;
            Ok(())
        }
    }
}
