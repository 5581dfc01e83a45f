//! SQLite implementation of the NodeStore port
//!
//! One cache table holds the sealed records of one sync. The table name is
//! derived from the tuple `(root fsid, remote root handle, user identity)`
//! so that relocating the root or switching users spawns a distinct cache.
//! Records are opaque sealed bytes keyed by `dbid`; this adapter never looks
//! inside them.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use sqlx::{Row, SqlitePool};

use shadowsync_core::ports::NodeStore;

use crate::CacheError;

/// Derives the cache table name for one sync
///
/// The identifying tuple is packed little-endian and base64url-encoded,
/// then prefixed so the result is a valid (quoted) SQLite identifier.
#[must_use]
pub fn table_name(root_fsid: u64, remote_root: u64, user_identity: u64) -> String {
    let mut raw = [0u8; 24];
    raw[..8].copy_from_slice(&root_fsid.to_le_bytes());
    raw[8..16].copy_from_slice(&remote_root.to_le_bytes());
    raw[16..].copy_from_slice(&user_identity.to_le_bytes());
    format!("sc_{}", URL_SAFE_NO_PAD.encode(raw))
}

/// SQLite-backed node record table
///
/// All statements interpolate the (validated, quoted) table name because
/// SQLite cannot bind identifiers; record ids and contents are always bound.
pub struct SqliteNodeStore {
    pool: SqlitePool,
    table: String,
}

impl SqliteNodeStore {
    /// Opens (creating if necessary) the cache table named `table`
    ///
    /// # Errors
    /// Returns `CacheError::TableSetupFailed` if the table cannot be created.
    pub async fn open(pool: SqlitePool, table: String) -> Result<Self, CacheError> {
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" \
             (id INTEGER PRIMARY KEY, content BLOB NOT NULL)"
        );
        sqlx::query(&ddl)
            .execute(&pool)
            .await
            .map_err(|e| CacheError::TableSetupFailed(format!("{table}: {e}")))?;

        tracing::debug!(table = %table, "cache table ready");

        Ok(Self { pool, table })
    }

    /// Drops the cache table, discarding all records
    pub async fn wipe(&mut self) -> Result<(), CacheError> {
        let ddl = format!("DROP TABLE IF EXISTS \"{}\"", self.table);
        sqlx::query(&ddl).execute(&self.pool).await?;
        tracing::info!(table = %self.table, "cache table dropped");
        Ok(())
    }

    /// Name of the backing table
    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl NodeStore for SqliteNodeStore {
    async fn load_all(&mut self) -> anyhow::Result<Vec<(u32, Vec<u8>)>> {
        let sql = format!("SELECT id, content FROM \"{}\" ORDER BY id", self.table);
        let rows = sqlx::query(&sql).fetch_all(&self.pool).await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: i64 = row.get("id");
            let content: Vec<u8> = row.get("content");
            records.push((id as u32, content));
        }

        tracing::debug!(table = %self.table, records = records.len(), "cache loaded");
        Ok(records)
    }

    async fn apply(&mut self, deletes: &[u32], puts: &[(u32, Vec<u8>)]) -> anyhow::Result<()> {
        if deletes.is_empty() && puts.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;

        let del_sql = format!("DELETE FROM \"{}\" WHERE id = ?", self.table);
        for dbid in deletes {
            sqlx::query(&del_sql)
                .bind(i64::from(*dbid))
                .execute(&mut *tx)
                .await?;
        }

        let put_sql = format!(
            "INSERT OR REPLACE INTO \"{}\" (id, content) VALUES (?, ?)",
            self.table
        );
        for (dbid, content) in puts {
            sqlx::query(&put_sql)
                .bind(i64::from(*dbid))
                .bind(content.as_slice())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        tracing::trace!(
            table = %self.table,
            deletes = deletes.len(),
            puts = puts.len(),
            "cache batch applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name_deterministic() {
        let a = table_name(1, 2, 3);
        let b = table_name(1, 2, 3);
        assert_eq!(a, b);
        assert!(a.starts_with("sc_"));
    }

    #[test]
    fn test_table_name_distinguishes_tuple_members() {
        let base = table_name(1, 2, 3);
        assert_ne!(base, table_name(9, 2, 3));
        assert_ne!(base, table_name(1, 9, 3));
        assert_ne!(base, table_name(1, 2, 9));
    }

    #[test]
    fn test_table_name_has_no_padding() {
        assert!(!table_name(u64::MAX, u64::MAX, u64::MAX).contains('='));
    }
}
