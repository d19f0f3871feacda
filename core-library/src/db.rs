//! # Database Connection Pool
//!
//! One SQLite database holds the canonical items, their client mappings, the
//! per-user tables and the job run tracker.
//!
//! - File databases run in WAL mode so run-status polling never waits on a
//!   long reconcile batch
//! - Foreign keys are enforced; client mappings and external ids are deleted
//!   with their item
//! - Migrations are embedded from `migrations/` and applied on open
//!
//! ```rust,ignore
//! use core_library::db::{create_pool, DatabaseConfig};
//!
//! let pool = create_pool(DatabaseConfig::new("/var/lib/mediahub/sync.db")).await?;
//! ```
//!
//! Tests use [`create_test_pool`], a single-connection in-memory database.
//! Never hold a transaction on it while issuing a query through the pool.

use crate::{LibraryError, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Sqlite};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info, warn};

const IN_MEMORY_URL: &str = "sqlite::memory:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    /// `sqlite:<path>` or `sqlite::memory:`
    pub database_url: String,
    pub max_connections: u32,
    /// Wait for a free pooled connection
    pub acquire_timeout: Duration,
    /// Wait for SQLite's write lock; job progress writes can collide with a
    /// reconcile batch
    pub busy_timeout: Duration,
}

impl DatabaseConfig {
    /// A file database, created if missing. The path `:memory:` selects an
    /// in-memory database.
    pub fn new(database_path: impl Into<PathBuf>) -> Self {
        let path = database_path.into();
        if path.as_os_str() == ":memory:" {
            return Self::in_memory();
        }

        Self {
            database_url: format!("sqlite:{}", path.display()),
            max_connections: 5,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
        }
    }

    /// The in-memory database lives as long as its only connection, so the
    /// pool is capped at one.
    pub fn in_memory() -> Self {
        Self {
            database_url: IN_MEMORY_URL.to_string(),
            max_connections: 1,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(10),
        }
    }

    pub fn is_in_memory(&self) -> bool {
        self.database_url == IN_MEMORY_URL
    }

    pub fn max_connections(mut self, max: u32) -> Self {
        if !self.is_in_memory() {
            self.max_connections = max.max(1);
        }
        self
    }

    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Open the pool, apply migrations and verify the connection.
///
/// # Errors
///
/// [`LibraryError::Database`] if the database cannot be opened,
/// [`LibraryError::Migration`] if a migration fails.
pub async fn create_pool(config: DatabaseConfig) -> Result<Pool<Sqlite>> {
    info!(
        database_url = %config.database_url,
        max_connections = config.max_connections,
        "Opening database"
    );

    let mut options = SqliteConnectOptions::from_str(&config.database_url)
        .map_err(LibraryError::Database)?
        .foreign_keys(true)
        .create_if_missing(true)
        .busy_timeout(config.busy_timeout);
    if !config.is_in_memory() {
        options = options
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
    }

    let pool = SqlitePoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .connect_with(options)
        .await
        .map_err(|e| {
            warn!(error = %e, "Failed to open database");
            LibraryError::Database(e)
        })?;

    run_migrations(&pool).await?;
    let version = schema_version(&pool).await?;
    info!(schema_version = version, "Database ready");

    Ok(pool)
}

/// In-memory pool with migrations applied.
pub async fn create_test_pool() -> Result<Pool<Sqlite>> {
    create_pool(DatabaseConfig::in_memory()).await
}

async fn run_migrations(pool: &Pool<Sqlite>) -> Result<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| {
            warn!(error = %e, "Migration failed");
            LibraryError::Migration(e.to_string())
        })?;
    debug!("Migrations applied");
    Ok(())
}

/// Highest applied migration version; doubles as the connection check.
pub async fn schema_version(pool: &Pool<Sqlite>) -> Result<i64> {
    let (version,): (Option<i64>,) =
        sqlx::query_as("SELECT MAX(version) FROM _sqlx_migrations WHERE success = 1")
            .fetch_one(pool)
            .await?;
    Ok(version.unwrap_or(0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_and_memory_configs() {
        let file = DatabaseConfig::new("/tmp/sync.db").max_connections(8);
        assert_eq!(file.database_url, "sqlite:/tmp/sync.db");
        assert_eq!(file.max_connections, 8);
        assert!(!file.is_in_memory());

        let memory = DatabaseConfig::new(":memory:").max_connections(8);
        assert!(memory.is_in_memory());
        assert_eq!(memory.max_connections, 1);
    }

    #[tokio::test]
    async fn test_test_pool_is_migrated() {
        let pool = create_test_pool().await.unwrap();
        assert_eq!(schema_version(&pool).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_foreign_keys_enabled() {
        let pool = create_test_pool().await.unwrap();
        let (enabled,): (i32,) = sqlx::query_as("PRAGMA foreign_keys")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(enabled, 1);
    }

    #[tokio::test]
    async fn test_migrations_create_tables() {
        let pool = create_test_pool().await.unwrap();

        for table in [
            "media_items",
            "media_item_clients",
            "media_item_external_ids",
            "users",
            "user_clients",
            "list_sync_settings",
            "user_media_item_data",
            "job_schedules",
            "job_runs",
        ] {
            let (count,): (i32,) =
                sqlx::query_as("SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?")
                    .bind(table)
                    .fetch_one(&pool)
                    .await
                    .unwrap();
            assert_eq!(count, 1, "{} table should exist", table);
        }
    }
}
