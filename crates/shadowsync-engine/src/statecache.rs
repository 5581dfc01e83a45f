//! State cache bookkeeping
//!
//! The engine records shadow tree mutations in two in-memory sets - nodes to
//! persist and dbids to delete - and pushes them to the durable store in
//! batches. A node is never in both sets: queueing an insert cancels a
//! pending delete of the same record and vice versa.
//!
//! ## Flush
//!
//! `flush` runs all deletions plus as many insertions as can reference a
//! durable parent, in one atomic store transaction. Insertions are resolved
//! by repeated passes over the pending set: a node is ready once its parent
//! is the root or already carries a non-zero dbid, which guarantees every
//! child record embeds a valid parent dbid. When a pass makes no progress
//! the leftovers stay queued for the next flush and a durability warning is
//! logged.

use std::collections::HashSet;

use tracing::{debug, warn};

use shadowsync_core::domain::{EngineError, NodeId, SyncState};
use shadowsync_core::ports::{NodeStore, RecordSealer};

use crate::arena::NodeArena;

/// During the initial scan, flushing starts once this many inserts queued up
const INSERT_HIGH_WATER: usize = 100;

/// In-memory insert/delete sets over a durable record store
pub struct StateCache {
    store: Option<Box<dyn NodeStore>>,
    insert_q: HashSet<NodeId>,
    delete_q: HashSet<u32>,
    next_dbid: u32,
    canceled: bool,
}

impl StateCache {
    pub fn new(store: Option<Box<dyn NodeStore>>) -> Self {
        Self {
            store,
            insert_q: HashSet::new(),
            delete_q: HashSet::new(),
            next_dbid: 1,
            canceled: false,
        }
    }

    /// Whether a durable store is attached
    pub fn has_store(&self) -> bool {
        self.store.is_some()
    }

    /// All cache mutation becomes a no-op once the engine is canceled
    pub fn set_canceled(&mut self) {
        self.canceled = true;
    }

    /// Queues a node for persistence
    pub fn add(&mut self, id: NodeId, dbid: u32) {
        if self.canceled {
            return;
        }
        if dbid != 0 {
            self.delete_q.remove(&dbid);
        }
        self.insert_q.insert(id);
    }

    /// Queues a node's record for deletion
    pub fn del(&mut self, id: NodeId, dbid: u32) {
        if self.canceled {
            return;
        }
        self.insert_q.remove(&id);
        if dbid != 0 {
            self.delete_q.insert(dbid);
        }
    }

    /// Queues a raw dbid for deletion (undecodable records on reload)
    pub fn discard(&mut self, dbid: u32) {
        if self.canceled || dbid == 0 {
            return;
        }
        self.delete_q.insert(dbid);
    }

    /// Ensures future dbid allocations stay above every reloaded id
    pub fn seed_next_dbid(&mut self, floor: u32) {
        self.next_dbid = self.next_dbid.max(floor);
    }

    /// Number of nodes queued for persistence
    pub fn pending_inserts(&self) -> usize {
        self.insert_q.len()
    }

    /// Number of records queued for deletion
    pub fn pending_deletes(&self) -> usize {
        self.delete_q.len()
    }

    /// Loads every sealed record from the store, if one is attached
    pub async fn load(&mut self) -> Option<Vec<(u32, Vec<u8>)>> {
        let store = self.store.as_mut()?;
        match store.load_all().await {
            Ok(records) => Some(records),
            Err(e) => {
                warn!(error = %e, "state cache load failed; starting empty");
                None
            }
        }
    }

    /// Pushes queued mutations to the store
    ///
    /// Runs only when the engine is `Active` with queued work, or still in
    /// `InitialScan` with more than [`INSERT_HIGH_WATER`] queued inserts.
    /// On store failure both queues are kept for the next flush, leaving the
    /// table unchanged.
    ///
    /// # Errors
    /// [`EngineError::CachePartial`] when the committed batch could not
    /// include every queued node; the leftovers stay queued and are retried
    /// on the next flush.
    pub async fn flush(
        &mut self,
        arena: &mut NodeArena,
        root: NodeId,
        state: SyncState,
        sealer: &dyn RecordSealer,
    ) -> Result<(), EngineError> {
        if self.canceled || self.store.is_none() {
            return Ok(());
        }
        let queued = !self.insert_q.is_empty() || !self.delete_q.is_empty();
        let due = (state == SyncState::Active && queued)
            || (state == SyncState::InitialScan && self.insert_q.len() > INSERT_HIGH_WATER);
        if !due {
            return Ok(());
        }

        debug!(
            additions = self.insert_q.len(),
            deletions = self.delete_q.len(),
            "saving shadow node cache"
        );

        let deletes: Vec<u32> = self.delete_q.iter().copied().collect();

        // Multi-pass fixpoint: each pass persists every node whose parent
        // is durable, making its children eligible for the next pass.
        let mut pending: Vec<NodeId> = self
            .insert_q
            .iter()
            .copied()
            .filter(|id| arena.contains(*id))
            .collect();
        let mut puts: Vec<(u32, Vec<u8>)> = Vec::new();

        loop {
            let mut progressed = false;
            let mut i = 0;
            while i < pending.len() {
                let id = pending[i];
                let Some(parent) = arena.node(id).parent else {
                    // The root itself is never queued.
                    pending.swap_remove(i);
                    continue;
                };
                let parent_dbid = if parent == root {
                    0
                } else {
                    match arena.get(parent).map(|p| p.dbid) {
                        Some(dbid) if dbid != 0 => dbid,
                        _ => {
                            i += 1;
                            continue;
                        }
                    }
                };

                let node = arena.node_mut(id);
                if node.dbid == 0 {
                    node.dbid = self.next_dbid;
                    self.next_dbid += 1;
                }
                node.parent_dbid = parent_dbid;
                let dbid = node.dbid;
                match node.to_record(parent_dbid).encode() {
                    Ok(plain) => puts.push((dbid, sealer.seal(dbid, &plain))),
                    Err(e) => warn!(dbid, error = %e, "failed to encode node record"),
                }

                pending.swap_remove(i);
                progressed = true;
            }
            if !progressed {
                break;
            }
        }

        let store = self.store.as_mut().expect("store presence checked above");
        match store.apply(&deletes, &puts).await {
            Ok(()) => {
                self.delete_q.clear();
                self.insert_q = pending.iter().copied().collect();
                if pending.is_empty() {
                    Ok(())
                } else {
                    Err(EngineError::CachePartial {
                        pending: pending.len(),
                    })
                }
            }
            Err(e) => {
                warn!(error = %e, "state cache flush failed; keeping queues");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait_shim::MemStore;
    use shadowsync_core::domain::{NodeKind, NodeRecord};
    use shadowsync_core::ports::sealer::PlainSealer;

    use crate::node::ShadowNode;

    use std::sync::{Arc, Mutex};

    /// Minimal in-memory NodeStore for flush tests
    mod async_trait_shim {
        use super::*;
        use async_trait::async_trait;
        use shadowsync_core::ports::NodeStore;

        pub struct MemStore {
            pub records: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
            pub fail: Arc<Mutex<bool>>,
        }

        #[async_trait]
        impl NodeStore for MemStore {
            async fn load_all(&mut self) -> anyhow::Result<Vec<(u32, Vec<u8>)>> {
                Ok(self.records.lock().unwrap().clone())
            }

            async fn apply(
                &mut self,
                deletes: &[u32],
                puts: &[(u32, Vec<u8>)],
            ) -> anyhow::Result<()> {
                if *self.fail.lock().unwrap() {
                    anyhow::bail!("injected store failure");
                }
                let mut records = self.records.lock().unwrap();
                records.retain(|(id, _)| !deletes.contains(id));
                for (id, content) in puts {
                    records.retain(|(rid, _)| rid != id);
                    records.push((*id, content.clone()));
                }
                Ok(())
            }
        }
    }

    struct Fixture {
        cache: StateCache,
        arena: NodeArena,
        root: NodeId,
        records: Arc<Mutex<Vec<(u32, Vec<u8>)>>>,
        fail: Arc<Mutex<bool>>,
    }

    fn fixture() -> Fixture {
        let records = Arc::new(Mutex::new(Vec::new()));
        let fail = Arc::new(Mutex::new(false));
        let store = MemStore {
            records: records.clone(),
            fail: fail.clone(),
        };
        let mut arena = NodeArena::new();
        let root = arena.insert(ShadowNode::new(NodeKind::Folder, b"/r".to_vec()));
        Fixture {
            cache: StateCache::new(Some(Box::new(store))),
            arena,
            root,
            records,
            fail,
        }
    }

    fn child(arena: &mut NodeArena, parent: NodeId, kind: NodeKind, name: &[u8]) -> NodeId {
        let mut node = ShadowNode::new(kind, name.to_vec());
        node.parent = Some(parent);
        let id = arena.insert(node);
        let name = name.to_vec();
        arena.node_mut(parent).children.insert(name, id);
        id
    }

    #[tokio::test]
    async fn test_flush_orders_parent_before_child() {
        let mut fx = fixture();
        let folder = child(&mut fx.arena, fx.root, NodeKind::Folder, b"sub");
        let file = child(&mut fx.arena, folder, NodeKind::File, b"b.txt");

        // Queue the child first to force the fixpoint to reorder.
        fx.cache.add(file, 0);
        fx.cache.add(folder, 0);

        fx.cache
            .flush(&mut fx.arena, fx.root, SyncState::Active, &PlainSealer)
            .await
            .unwrap();

        let records = fx.records.lock().unwrap().clone();
        assert_eq!(records.len(), 2);
        let folder_dbid = fx.arena.node(folder).dbid;
        assert_ne!(folder_dbid, 0);

        let child_rec = NodeRecord::decode(&records[1].1).unwrap();
        assert_eq!(child_rec.parent_dbid, folder_dbid);
        let parent_rec = NodeRecord::decode(&records[0].1).unwrap();
        assert_eq!(parent_rec.parent_dbid, 0);
    }

    #[tokio::test]
    async fn test_flush_leaves_unreachable_nodes_queued() {
        let mut fx = fixture();
        let orphan_parent = child(&mut fx.arena, fx.root, NodeKind::Folder, b"sub");
        let orphan = child(&mut fx.arena, orphan_parent, NodeKind::File, b"c.txt");

        // Parent is never queued and has no dbid: the child cannot be
        // persisted without breaking the parent-before-child rule.
        fx.cache.add(orphan, 0);

        let result = fx
            .cache
            .flush(&mut fx.arena, fx.root, SyncState::Active, &PlainSealer)
            .await;

        assert_eq!(result, Err(EngineError::CachePartial { pending: 1 }));
        assert!(fx.records.lock().unwrap().is_empty());
        assert_eq!(fx.cache.pending_inserts(), 1);
    }

    #[tokio::test]
    async fn test_add_cancels_pending_delete() {
        let mut fx = fixture();
        let file = child(&mut fx.arena, fx.root, NodeKind::File, b"a.txt");
        fx.arena.node_mut(file).dbid = 9;

        fx.cache.del(file, 9);
        assert_eq!(fx.cache.pending_deletes(), 1);

        fx.cache.add(file, 9);
        assert_eq!(fx.cache.pending_deletes(), 0);
        assert_eq!(fx.cache.pending_inserts(), 1);
    }

    #[tokio::test]
    async fn test_del_removes_pending_insert() {
        let mut fx = fixture();
        let file = child(&mut fx.arena, fx.root, NodeKind::File, b"a.txt");

        fx.cache.add(file, 0);
        fx.cache.del(file, 0);

        // Never persisted: nothing to delete, nothing to insert.
        assert_eq!(fx.cache.pending_inserts(), 0);
        assert_eq!(fx.cache.pending_deletes(), 0);
    }

    #[tokio::test]
    async fn test_initial_scan_respects_high_water_mark() {
        let mut fx = fixture();
        let file = child(&mut fx.arena, fx.root, NodeKind::File, b"a.txt");
        fx.cache.add(file, 0);

        fx.cache
            .flush(&mut fx.arena, fx.root, SyncState::InitialScan, &PlainSealer)
            .await
            .unwrap();

        // Below the high-water mark nothing is written during initial scan.
        assert!(fx.records.lock().unwrap().is_empty());
        assert_eq!(fx.cache.pending_inserts(), 1);
    }

    #[tokio::test]
    async fn test_failed_flush_keeps_queues() {
        let mut fx = fixture();
        let file = child(&mut fx.arena, fx.root, NodeKind::File, b"a.txt");
        fx.cache.add(file, 0);
        *fx.fail.lock().unwrap() = true;

        fx.cache
            .flush(&mut fx.arena, fx.root, SyncState::Active, &PlainSealer)
            .await
            .unwrap();

        assert!(fx.records.lock().unwrap().is_empty());
        assert_eq!(fx.cache.pending_inserts(), 1);
    }

    #[tokio::test]
    async fn test_canceled_cache_ignores_mutations() {
        let mut fx = fixture();
        let file = child(&mut fx.arena, fx.root, NodeKind::File, b"a.txt");

        fx.cache.set_canceled();
        fx.cache.add(file, 0);
        fx.cache.del(file, 3);
        fx.cache
            .flush(&mut fx.arena, fx.root, SyncState::Active, &PlainSealer)
            .await
            .unwrap();

        assert_eq!(fx.cache.pending_inserts(), 0);
        assert_eq!(fx.cache.pending_deletes(), 0);
        assert!(fx.records.lock().unwrap().is_empty());
    }
}
