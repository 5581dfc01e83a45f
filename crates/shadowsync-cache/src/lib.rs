//! Shadowsync Cache - Local state persistence
//!
//! SQLite-backed storage for the engine's shadow tree, so a restart can
//! rebuild the tree without re-fingerprinting the whole subtree.
//!
//! ## Architecture
//!
//! This crate implements the `NodeStore` and `RecordSealer` ports from
//! `shadowsync-core` using SQLite as the storage backend. It is a driven
//! (secondary) adapter in the hexagonal architecture.
//!
//! Each sync owns one table whose name encodes the identifying triple
//! `(root fsid, remote root handle, user identity)`; relocating the root or
//! switching users therefore spawns a distinct cache instead of corrupting
//! the old one.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - connection pool (WAL mode, busy timeout)
//! - [`SqliteNodeStore`] - `NodeStore` implementation over one cache table
//! - [`KeyedSealer`] - integrity-tagged `RecordSealer` implementation
//! - [`CacheError`] - error types for cache operations

pub mod pool;
pub mod sealer;
pub mod store;

pub use pool::DatabasePool;
pub use sealer::KeyedSealer;
pub use store::{table_name, SqliteNodeStore};

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("query failed: {0}")]
    QueryFailed(String),

    /// The cache table could not be created
    #[error("table setup failed: {0}")]
    TableSetupFailed(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}
