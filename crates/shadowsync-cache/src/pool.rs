//! SQLite connection management
//!
//! One database file backs every sync on the machine. Each sync keeps its
//! records in its own table, created lazily when the store opens (see
//! [`SqliteNodeStore::open`](crate::SqliteNodeStore::open)), so the pool
//! carries no schema and runs no migrations; it only hands out connections
//! tuned for the engine's access pattern of a single writer plus occasional
//! readers.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};

use crate::CacheError;

/// Write-contention grace period before a statement gives up
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Readers tolerated alongside the engine's writer on a file-backed pool
const MAX_FILE_CONNECTIONS: u32 = 4;

/// Connection pool over the shared cache database
///
/// The in-memory flavor is capped at one connection: SQLite scopes
/// `:memory:` data to the connection that created it, so a second
/// connection would see an unrelated empty database.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (or creates) the cache database at `db_path`, creating missing
    /// parent directories first.
    ///
    /// # Errors
    /// Returns `CacheError::ConnectionFailed` when the directory or the
    /// database itself cannot be opened.
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "cannot create cache directory {}: {e}",
                    parent.display()
                ))
            })?;
        }

        // WAL keeps cache reloads from blocking flush transactions when a
        // second process has the file open.
        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(MAX_FILE_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!(
                    "cannot open cache database {}: {e}",
                    db_path.display()
                ))
            })?;

        tracing::info!(path = %db_path.display(), "cache database opened");
        Ok(Self { pool })
    }

    /// Opens a private in-memory database; used by tests
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("cannot open in-memory database: {e}"))
            })?;

        Ok(Self { pool })
    }

    /// Handle to the underlying pool, for opening per-sync stores
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
