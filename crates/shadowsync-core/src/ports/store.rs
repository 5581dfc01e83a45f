//! State-cache store port (driven/secondary port)
//!
//! A `NodeStore` is a durable table of `(dbid -> sealed bytes)` records, one
//! per persisted shadow node. The engine batches its mutations in memory
//! (insert/delete queues) and hands them to the store in a single atomic
//! [`apply`](NodeStore::apply); the store must commit all of a batch or none
//! of it.

use async_trait::async_trait;

/// Durable record table backing the state cache
#[async_trait]
pub trait NodeStore: Send {
    /// Loads every record in the table as `(dbid, sealed bytes)`
    async fn load_all(&mut self) -> anyhow::Result<Vec<(u32, Vec<u8>)>>;

    /// Applies deletions and upserts in one transaction
    ///
    /// `puts` entries carry pre-assigned dbids; records listed earlier must
    /// be durable before later ones in the same batch, so a parent's record
    /// is always committed before a child record that references its dbid.
    async fn apply(&mut self, deletes: &[u32], puts: &[(u32, Vec<u8>)]) -> anyhow::Result<()>;
}
