//! One node of the shadow tree
//!
//! A [`ShadowNode`] represents one file or directory the engine believes
//! exists locally. Nodes form a single-rooted tree through `parent` /
//! `children` links; a secondary `shadow_children` map holds pending names
//! of nodes whose remote counterpart has already moved while the local
//! rename has not been observed yet. Name lookups consult both maps.
//!
//! Nodes are plain data plus a few self-contained operations; everything
//! that touches more than one node (reparenting, destruction, the fsid
//! index) lives on the engine, which owns the arena.

use std::collections::HashMap;

use shadowsync_core::domain::fingerprint::SIZE_INVALID;
use shadowsync_core::domain::{
    FileFingerprint, NodeId, NodeKind, NodeRecord, RemoteHandle, TransferSlot,
};
use shadowsync_core::ports::fs::{FileHandle, FileInfo};

/// Quiet period stamped on a node after a content change, in deciseconds.
/// The upper layer delays uploads of the node until this has elapsed.
pub const NAGLE_DELAY_DS: u64 = 50;

/// One file or directory in the shadow tree
pub struct ShadowNode {
    /// File or folder
    pub kind: NodeKind,
    /// Last path component in local encoding; the root node carries its
    /// full root path here
    pub local_name: Vec<u8>,
    /// Owning node; `None` only for the root
    pub parent: Option<NodeId>,
    /// Primary child mapping, keyed by local name
    pub children: HashMap<Vec<u8>, NodeId>,
    /// Pending-rename child mapping; see module docs
    pub shadow_children: HashMap<Vec<u8>, NodeId>,
    /// Handle of the remote counterpart, once bound
    pub remote: Option<RemoteHandle>,
    /// Filesystem-issued identity, when available
    pub fsid: Option<u64>,
    /// `(size, mtime, sparse digest)`; folders keep this invalid
    pub fp: FileFingerprint,
    /// Stamp of the last scan pass that observed this node
    pub scan_seq: u64,
    /// Consecutive observations during which this node was absent
    pub not_seen: u8,
    /// Sticky flag set once the engine decided the node is gone
    pub deleted: bool,
    /// Persistent cache id; 0 until first persisted
    pub dbid: u32,
    /// Parent's cache id, meaningful only during cache reload
    pub parent_dbid: u32,
    /// In-flight transfer owned by the upper layer, if any
    pub transfer: Option<TransferSlot>,
    /// Decisecond stamp until which uploads of this node should wait
    pub nagle_ds: u64,
}

impl ShadowNode {
    /// Creates a detached node; the engine links it into the tree
    pub fn new(kind: NodeKind, local_name: Vec<u8>) -> Self {
        Self {
            kind,
            local_name,
            parent: None,
            children: HashMap::new(),
            shadow_children: HashMap::new(),
            remote: None,
            fsid: None,
            fp: FileFingerprint::invalid(),
            scan_seq: 0,
            not_seen: 0,
            deleted: false,
            dbid: 0,
            parent_dbid: 0,
            transfer: None,
            nagle_ds: 0,
        }
    }

    /// File size in bytes; [`SIZE_INVALID`] while the fingerprint is stale
    #[must_use]
    pub fn size(&self) -> i64 {
        self.fp.size
    }

    /// Looks up a child by local name, primary map first, then pending
    /// renames
    #[must_use]
    pub fn child_by_name(&self, name: &[u8]) -> Option<NodeId> {
        self.children
            .get(name)
            .or_else(|| self.shadow_children.get(name))
            .copied()
    }

    /// Updates the not-seen counter; marking a node as present also clears
    /// the sticky deleted flag
    pub fn set_not_seen(&mut self, n: u8) {
        if n == 0 {
            self.deleted = false;
        }
        self.not_seen = n;
    }

    /// Stamps the Nagle-style quiet period relative to `now_ds`
    pub fn bump_nagle(&mut self, now_ds: u64) {
        self.nagle_ds = now_ds + NAGLE_DELAY_DS;
    }

    /// Recomputes the fingerprint against a fresh stat, reading content only
    /// when `(size, mtime)` moved or the previous fingerprint was invalid.
    /// Returns whether the fingerprint changed.
    pub fn gen_fingerprint(&mut self, info: &FileInfo, handle: &mut dyn FileHandle) -> bool {
        if self.fp.is_valid() && self.fp.size == info.size && self.fp.mtime == info.mtime {
            return false;
        }

        match FileFingerprint::generate(info.size, info.mtime, |offset, buf| {
            handle.read_at(offset, buf)
        }) {
            Some(fp) => {
                let changed = fp != self.fp;
                self.fp = fp;
                changed
            }
            None => {
                // Content became unreadable mid-fingerprint; force a
                // re-evaluation on the next observation.
                let changed = self.fp.size != SIZE_INVALID;
                self.fp = FileFingerprint::invalid();
                changed
            }
        }
    }

    /// Produces the persisted form of this node
    #[must_use]
    pub fn to_record(&self, parent_dbid: u32) -> NodeRecord {
        NodeRecord {
            kind: self.kind,
            local_name: self.local_name.clone(),
            size: self.fp.size,
            mtime: self.fp.mtime,
            fsid: self.fsid,
            digest: (self.kind == NodeKind::File && self.fp.is_valid()).then_some(self.fp.digest),
            parent_dbid,
            remote: self.remote,
        }
    }

    /// Rebuilds a detached node from its persisted form
    #[must_use]
    pub fn from_record(record: NodeRecord) -> Self {
        let mut node = Self::new(record.kind, record.local_name);
        node.fp = FileFingerprint {
            size: record.size,
            mtime: record.mtime,
            digest: record.digest.unwrap_or([0u8; 32]),
        };
        node.fsid = record.fsid;
        node.parent_dbid = record.parent_dbid;
        node.remote = record.remote;
        node
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct MemHandle {
        info: FileInfo,
        data: Vec<u8>,
    }

    impl FileHandle for MemHandle {
        fn info(&self) -> FileInfo {
            self.info
        }

        fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
            let start = (offset as usize).min(self.data.len());
            let n = buf.len().min(self.data.len() - start);
            buf[..n].copy_from_slice(&self.data[start..start + n]);
            Ok(n)
        }
    }

    fn handle(data: &[u8], mtime: i64) -> MemHandle {
        MemHandle {
            info: FileInfo {
                kind: NodeKind::File,
                size: data.len() as i64,
                mtime,
                fsid: 1,
                fsid_valid: true,
            },
            data: data.to_vec(),
        }
    }

    #[test]
    fn test_gen_fingerprint_initial() {
        let mut node = ShadowNode::new(NodeKind::File, b"a.txt".to_vec());
        let mut h = handle(b"content", 100);
        assert!(node.gen_fingerprint(&h.info(), &mut h));
        assert_eq!(node.size(), 7);
        assert_eq!(node.fp.mtime, 100);
    }

    #[test]
    fn test_gen_fingerprint_unchanged_skips_read() {
        let mut node = ShadowNode::new(NodeKind::File, b"a.txt".to_vec());
        let mut h = handle(b"content", 100);
        node.gen_fingerprint(&h.info(), &mut h);

        // Same size and mtime: no change reported, content not re-read.
        let mut h2 = handle(b"CONTENT", 100);
        assert!(!node.gen_fingerprint(&h2.info(), &mut h2));
    }

    #[test]
    fn test_gen_fingerprint_detects_mtime_change() {
        let mut node = ShadowNode::new(NodeKind::File, b"a.txt".to_vec());
        let mut h = handle(b"content", 100);
        node.gen_fingerprint(&h.info(), &mut h);

        let mut h2 = handle(b"content", 200);
        assert!(node.gen_fingerprint(&h2.info(), &mut h2));
        assert_eq!(node.fp.mtime, 200);
    }

    #[test]
    fn test_set_not_seen_zero_clears_deleted() {
        let mut node = ShadowNode::new(NodeKind::File, b"a".to_vec());
        node.deleted = true;
        node.not_seen = 1;
        node.set_not_seen(0);
        assert!(!node.deleted);
        assert_eq!(node.not_seen, 0);

        node.set_not_seen(1);
        assert_eq!(node.not_seen, 1);
    }

    #[test]
    fn test_record_roundtrip_preserves_identity() {
        let mut node = ShadowNode::new(NodeKind::File, b"a.txt".to_vec());
        let mut h = handle(b"payload", 123);
        node.gen_fingerprint(&h.info(), &mut h);
        node.fsid = Some(77);
        node.remote = Some(RemoteHandle(5));

        let rebuilt = ShadowNode::from_record(node.to_record(9));
        assert_eq!(rebuilt.kind, node.kind);
        assert_eq!(rebuilt.local_name, node.local_name);
        assert_eq!(rebuilt.fp, node.fp);
        assert_eq!(rebuilt.fsid, node.fsid);
        assert_eq!(rebuilt.remote, node.remote);
        assert_eq!(rebuilt.parent_dbid, 9);
    }

    #[test]
    fn test_folder_record_has_no_digest() {
        let node = ShadowNode::new(NodeKind::Folder, b"dir".to_vec());
        assert!(node.to_record(0).digest.is_none());
    }

    #[test]
    fn test_child_lookup_consults_both_maps() {
        let mut node = ShadowNode::new(NodeKind::Folder, b"dir".to_vec());
        let a = NodeId::from_parts(1, 0);
        let b = NodeId::from_parts(2, 0);
        node.children.insert(b"kept".to_vec(), a);
        node.shadow_children.insert(b"pending".to_vec(), b);

        assert_eq!(node.child_by_name(b"kept"), Some(a));
        assert_eq!(node.child_by_name(b"pending"), Some(b));
        assert_eq!(node.child_by_name(b"absent"), None);
    }
}
