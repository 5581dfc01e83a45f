//! Reconciliation engine
//!
//! [`SyncEngine`] owns one shadow tree and drives it from path observations.
//! The central operation is [`check_path`](SyncEngine::check_path): given a
//! path, it stats the target, walks the shadow tree, and classifies the
//! observation as new / changed / moved / missing, mutating the tree and
//! emitting the matching callback.
//!
//! Reconciliation is fully synchronous; the engine suspends only between
//! queue-drain iterations, when the state cache flushes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, trace, warn};

use shadowsync_core::config::SyncConfig;
use shadowsync_core::domain::{EngineError, NodeId, NodeKind, NodeRecord, RemoteHandle, SyncState};
use shadowsync_core::ports::fs::FsAdapter;
use shadowsync_core::ports::{NodeStore, RecordSealer, SyncEvents};

use crate::arena::NodeArena;
use crate::debris::{DebrisOutcome, DebrisVault};
use crate::node::ShadowNode;
use crate::notifier::{DirNotifier, NotifyQueue};
use crate::statecache::StateCache;

/// Events younger than this many deciseconds are postponed, letting
/// partially written files settle before they are fingerprinted
const SETTLE_DS: u64 = 3;

/// Cache-reload recursion depth cap; deeper subtrees are dropped and
/// rediscovered by scan
const RELOAD_MAX_DEPTH: u32 = 100;

/// Outcome of one `check_path` invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The observation resolved to this (created, updated or moved) node
    Found(NodeId),
    /// Nothing to do: filtered, transient, invalid, or an unchanged folder
    Missing,
    /// The destination's parent has no remote counterpart yet; the caller
    /// must re-drive the observation later
    ParentMissing,
}

/// Result of draining one notify queue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueVerdict {
    /// The queue is empty
    Drained,
    /// The queue head is parked on a missing parent
    Deferred,
    /// Control was yielded after processing a file node
    Yielded,
    /// The queue head is too fresh; retry after this long
    Wait(Duration),
}

/// Result of one cooperative drain step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    /// Both queues are empty and the cache has been flushed
    Idle,
    /// Work remains; `wait` is the debounce hint, `deferred` reports a
    /// queue head parked on a missing parent
    Busy {
        wait: Option<Duration>,
        deferred: bool,
    },
}

/// Result of resolving a local path against the shadow tree
#[derive(Debug)]
pub(crate) struct Resolution {
    /// Fully matched node, if the whole path resolved
    pub matched: Option<NodeId>,
    /// Deepest matched ancestor
    pub parent: Option<NodeId>,
    /// Path remainder below the deepest match, in local encoding
    pub residual: Vec<u8>,
}

/// The local-side synchronization engine for one mirrored subtree
pub struct SyncEngine {
    config: SyncConfig,
    fs: Box<dyn FsAdapter>,
    events: Arc<dyn SyncEvents>,
    sealer: Arc<dyn RecordSealer>,
    arena: NodeArena,
    /// Process-wide fsid index; single-threaded mutation by this engine.
    /// A multi-sync container hoists this into shared ownership.
    fsids: HashMap<u64, NodeId>,
    cache: StateCache,
    notifier: DirNotifier,
    debris: DebrisVault,
    state: SyncState,
    root: NodeId,
    /// Volume fingerprint of the sync root; gates fsid-identity decisions
    fsfp: u64,
    fullscan: bool,
    scan_seq: u64,
    local_bytes: i64,
    node_counts: [u64; 2],
    /// Set by the upper layer while it creates remote nodes; makes the
    /// drain loop yield eagerly
    remote_adding: bool,
    last_error: Option<EngineError>,
}

impl SyncEngine {
    /// Creates an engine over `config`
    ///
    /// The store, when given, is the durable table this sync persists into;
    /// open it under the table identifier derived from the root fsid. The
    /// engine starts in `InitialScan` with a full scan pending.
    pub fn new(
        config: SyncConfig,
        fs: Box<dyn FsAdapter>,
        events: Arc<dyn SyncEvents>,
        store: Option<Box<dyn NodeStore>>,
        sealer: Arc<dyn RecordSealer>,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        let root_local = fs.path_to_local(&config.root_path.display().to_string());
        let debris_local = fs.path_to_local(&config.debris_path().display().to_string());
        let fsfp = config
            .fs_fingerprint_override
            .unwrap_or_else(|| fs.fs_fingerprint(&root_local));

        let mut arena = NodeArena::new();
        let mut root_node = ShadowNode::new(NodeKind::Folder, root_local);
        root_node.remote = Some(config.remote_root);
        let root = arena.insert(root_node);

        info!(
            tag = config.tag,
            root = %config.root_path.display(),
            fsfp,
            "sync engine created"
        );

        let engine = Self {
            fs,
            events,
            sealer,
            arena,
            fsids: HashMap::new(),
            cache: StateCache::new(store),
            notifier: DirNotifier::new(),
            debris: DebrisVault::new(debris_local),
            state: SyncState::InitialScan,
            root,
            fsfp,
            fullscan: true,
            scan_seq: 0,
            local_bytes: 0,
            node_counts: [0, 1],
            remote_adding: false,
            last_error: None,
            config,
        };
        engine.events.on_state_change(SyncState::InitialScan);
        Ok(engine)
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn state(&self) -> SyncState {
        self.state
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Volume fingerprint captured (or overridden) at construction
    pub fn volume_fingerprint(&self) -> u64 {
        self.fsfp
    }

    /// Bytes of file content observed under the root
    pub fn local_bytes(&self) -> i64 {
        self.local_bytes
    }

    /// Live node count of the given kind, including the root folder
    pub fn node_count(&self, kind: NodeKind) -> u64 {
        self.node_counts[kind.index()]
    }

    /// Most recent engine error; fatal kinds accompany the `Failed` state,
    /// `CachePartial` and `DebrisExhausted` are recorded without stopping
    /// the engine
    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    pub fn node(&self, id: NodeId) -> Option<&ShadowNode> {
        self.arena.get(id)
    }

    /// Resolves an absolute local path to its shadow node, if fully matched
    pub fn node_by_local_path(&self, local_path: &[u8]) -> Option<NodeId> {
        self.node_by_path(None, local_path).matched
    }

    /// Current index holder of `fsid`, if it is still live
    pub fn fsid_holder(&self, fsid: u64) -> Option<NodeId> {
        self.fsids
            .get(&fsid)
            .copied()
            .filter(|id| self.arena.contains(*id))
    }

    /// Reconstructs a node's full path by walking to the root
    pub fn local_path_of(&self, id: NodeId) -> Vec<u8> {
        let sep = self.fs.local_separator();
        let mut parts: Vec<&[u8]> = Vec::new();
        let mut cur = Some(id);
        while let Some(c) = cur {
            let node = self.arena.node(c);
            parts.push(&node.local_name);
            cur = node.parent;
        }
        let mut path = Vec::new();
        for (i, part) in parts.iter().rev().enumerate() {
            if i > 0 {
                path.extend_from_slice(sep);
            }
            path.extend_from_slice(part);
        }
        path
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Verifies the root, reloads the state cache and queues the first scan
    ///
    /// # Errors
    /// [`EngineError::RootIsFile`] when the root resolves to a regular file,
    /// [`EngineError::InvalidPath`] when it cannot be opened at all.
    pub async fn start(&mut self) -> Result<(), EngineError> {
        let root_local = self.arena.node(self.root).local_name.clone();
        match self.fs.open_file(&root_local, true, false) {
            Ok(handle) => {
                let info = handle.info();
                if info.kind == NodeKind::File {
                    let err =
                        EngineError::RootIsFile(self.config.root_path.display().to_string());
                    self.last_error = Some(err.clone());
                    self.change_state(SyncState::Failed);
                    return Err(err);
                }
                if info.fsid_valid {
                    self.arena.node_mut(self.root).fsid = Some(info.fsid);
                }
            }
            Err(_) => {
                return Err(EngineError::InvalidPath(format!(
                    "cannot open sync root {}",
                    self.config.root_path.display()
                )));
            }
        }

        self.read_state_cache().await;
        self.scan(&root_local);
        Ok(())
    }

    /// Transitions to `Canceled`; cache operations and callbacks stop
    pub fn cancel(&mut self) {
        self.change_state(SyncState::Canceled);
        self.cache.set_canceled();
    }

    fn change_state(&mut self, new_state: SyncState) {
        if new_state == self.state || self.state == SyncState::Canceled {
            return;
        }
        self.events.on_state_change(new_state);
        self.state = new_state;
        self.fullscan = false;
    }

    // ------------------------------------------------------------------
    // Upper-layer entry points
    // ------------------------------------------------------------------

    /// Binds a node to its remote counterpart
    ///
    /// Children parked on `ParentMissing` become processable once their
    /// parent is bound.
    pub fn bind_remote(&mut self, id: NodeId, remote: RemoteHandle) {
        if let Some(node) = self.arena.get_mut(id) {
            node.remote = Some(remote);
            if id != self.root {
                self.cache_add(id);
            }
        }
    }

    /// Records a remote-side rename that has not been applied locally yet:
    /// the node stays under its local name but also resolves under
    /// `pending_name` until the local rename is observed.
    pub fn stage_pending_rename(&mut self, id: NodeId, pending_name: Vec<u8>) {
        let Some(parent) = self.arena.get(id).and_then(|n| n.parent) else {
            return;
        };
        self.arena
            .node_mut(parent)
            .shadow_children
            .insert(pending_name, id);
    }

    /// Feeds an OS watcher path into the DirEvents queue (debounced)
    pub fn observe_path(&mut self, path: &std::path::Path) {
        let local = self.fs.path_to_local(&path.display().to_string());
        if local == self.arena.node(self.root).local_name {
            return;
        }
        self.notifier
            .notify(NotifyQueue::DirEvents, None, local, false);
    }

    /// Signals that the upper layer is creating remote nodes; the drain
    /// loop yields eagerly while this is set
    pub fn set_remote_adding(&mut self, adding: bool) {
        self.remote_adding = adding;
    }

    /// Quarantines a local file or folder into the debris tree.
    /// This is the only way the engine removes anything from disk.
    ///
    /// Returns `false` both for transient failures (retry the operation
    /// later) and for bucket exhaustion; the latter is additionally
    /// recorded as [`EngineError::DebrisExhausted`] for the caller to
    /// surface.
    pub fn move_to_local_debris(&mut self, path: &[u8]) -> bool {
        match self.debris.move_to_debris(&*self.fs, path) {
            DebrisOutcome::Moved => true,
            DebrisOutcome::TransientError => false,
            DebrisOutcome::Exhausted => {
                let err = EngineError::DebrisExhausted(self.fs.local_to_path(path));
                warn!(error = %err, "debris relocation failed");
                self.last_error = Some(err);
                false
            }
        }
    }

    // ------------------------------------------------------------------
    // Path resolution
    // ------------------------------------------------------------------

    /// Walks the shadow tree along `local_path`
    ///
    /// With `start == None` the path must be absolute, i.e. begin with the
    /// root's local name followed by a separator. Otherwise the path is
    /// relative to `start`. Returns the deepest match and the unmatched
    /// remainder.
    pub(crate) fn node_by_path(&self, start: Option<NodeId>, local_path: &[u8]) -> Resolution {
        let sep = self.fs.local_separator();
        let mut cursor = 0usize;

        let mut l = match start {
            Some(s) => s,
            None => {
                let root_name = &self.arena.node(self.root).local_name;
                let prefix_len = root_name.len() + sep.len();
                if local_path.len() < prefix_len
                    || &local_path[..root_name.len()] != root_name.as_slice()
                    || &local_path[root_name.len()..prefix_len] != sep
                {
                    return Resolution {
                        matched: None,
                        parent: None,
                        residual: Vec::new(),
                    };
                }
                cursor = prefix_len;
                self.root
            }
        };

        let mut parent = None;
        loop {
            // Scan for the component end, checking only separator-aligned
            // offsets (separators may be multi-byte).
            let mut pos = cursor;
            loop {
                if pos > local_path.len() {
                    warn!(
                        path = %self.fs.local_to_path(local_path),
                        "misaligned path remainder in resolution"
                    );
                    return Resolution {
                        matched: None,
                        parent,
                        residual: Vec::new(),
                    };
                }
                if pos == local_path.len() || &local_path[pos..(pos + sep.len()).min(local_path.len())] == sep
                {
                    break;
                }
                pos += sep.len();
            }

            parent = Some(l);
            let component = &local_path[cursor..pos];
            match self.arena.node(l).child_by_name(component) {
                Some(child) => {
                    l = child;
                    if pos == local_path.len() {
                        return Resolution {
                            matched: Some(l),
                            parent,
                            residual: Vec::new(),
                        };
                    }
                    cursor = pos + sep.len();
                }
                None => {
                    return Resolution {
                        matched: None,
                        parent,
                        residual: local_path[cursor..].to_vec(),
                    };
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Reconciliation
    // ------------------------------------------------------------------

    /// Classifies one path observation and applies it to the shadow tree
    ///
    /// `local_path` is relative to `origin`, or absolute when `origin` is
    /// `None`. With `absolute_last`, the path is absolute, `origin` is the
    /// destination's parent and `absolute_last` its final component; this
    /// shortcut is used by the remote-side coordinator after it has already
    /// resolved the parent.
    #[instrument(skip_all, fields(tag = self.config.tag))]
    pub fn check_path(
        &mut self,
        origin: Option<NodeId>,
        local_path: &[u8],
        absolute_last: Option<&[u8]>,
    ) -> CheckOutcome {
        if self.state.is_terminal() {
            return CheckOutcome::Missing;
        }
        if origin.is_some_and(|o| !self.arena.contains(o)) {
            debug!("dropping observation with stale origin");
            return CheckOutcome::Missing;
        }

        let sep = self.fs.local_separator().to_vec();
        let mut is_root = false;
        let mut matched: Option<NodeId>;
        let parent: Option<NodeId>;
        let tmppath: Vec<u8>;
        let residual: Vec<u8>;

        if let Some(last) = absolute_last {
            // Shortcut: the caller resolved the parent already.
            parent = origin;
            matched = None;
            tmppath = local_path.to_vec();
            residual = last.to_vec();
        } else {
            tmppath = match origin {
                Some(o) if !local_path.is_empty() => {
                    let mut p = self.local_path_of(o);
                    p.extend_from_slice(&sep);
                    p.extend_from_slice(local_path);
                    p
                }
                Some(o) => self.local_path_of(o),
                None => local_path.to_vec(),
            };

            if origin == Some(self.root) && local_path.is_empty() {
                // Re-check of the root itself.
                matched = Some(self.root);
                parent = None;
                residual = Vec::new();
            } else {
                let resolution = self.node_by_path(origin, local_path);
                matched = resolution.matched;
                parent = resolution.parent;
                residual = resolution.residual;
            }

            // A separator-aligned separator inside the residual means the
            // observation skipped over a component the tree has not seen
            // yet: scan the deepest known prefix first and retry later.
            // Misaligned hits are false positives inside multi-byte
            // characters and are skipped.
            let mut idx = 0;
            while let Some(found) = find_subslice(&residual[idx..], &sep) {
                let pos = idx + found;
                if pos % sep.len() == 0 {
                    warn!(
                        path = %self.fs.local_to_path(&tmppath),
                        "parent not detected yet; scanning prefix"
                    );
                    let prefix_len = local_path.len() - residual.len() + pos;
                    self.notifier.notify(
                        NotifyQueue::DirEvents,
                        origin,
                        local_path[..prefix_len].to_vec(),
                        true,
                    );
                    return CheckOutcome::Missing;
                }
                trace!("skipping misaligned separator candidate");
                idx = pos + 1;
            }

            if matched.is_none() && residual.is_empty() {
                warn!(path = %self.fs.local_to_path(&tmppath), "invalid path");
                return CheckOutcome::Missing;
            }

            is_root = matched == Some(self.root) && residual.is_empty();
        }

        // Ignore filter and debris exclusion.
        let name = self.fs.local_to_display(&residual);
        if !self.events.is_syncable(&name, &tmppath) {
            debug!(path = %self.fs.local_to_path(&tmppath), "excluded path");
            return CheckOutcome::Missing;
        }
        if self.is_under_debris(&tmppath) {
            return CheckOutcome::Missing;
        }

        trace!(path = %self.fs.local_to_path(&tmppath), "scanning");

        // Postpone moves into parents that have no remote counterpart yet.
        if let Some(p) = parent {
            match self.arena.get(p) {
                Some(node) if p != self.root && node.remote.is_none() => {
                    debug!(path = %self.fs.local_to_path(&tmppath), "parent not ready");
                    return CheckOutcome::ParentMissing;
                }
                Some(_) => {}
                None => {
                    debug!("dropping observation with stale parent");
                    return CheckOutcome::Missing;
                }
            }
        }

        // Stat the target.
        let mut handle = match self.fs.open_file(&tmppath, false, false) {
            Ok(handle) => handle,
            Err(failure) => {
                warn!(
                    path = %self.fs.local_to_path(&tmppath),
                    retry = failure.retry,
                    "error opening file"
                );
                if failure.retry {
                    // Transient: request a re-check.
                    self.notifier
                        .notify(NotifyQueue::Retry, origin, local_path.to_vec(), false);
                } else if let Some(m) = matched {
                    self.arena.node_mut(m).transfer = None;
                    // In fullscan mode missing nodes are reaped in bulk by
                    // delete_missing; incremental mode deletes after two
                    // consecutive misses.
                    if !self.fullscan {
                        if self.arena.node(m).not_seen >= 1 {
                            self.destroy_subtree(m);
                        } else {
                            self.arena.node_mut(m).set_not_seen(1);
                            self.notifier.notify(
                                NotifyQueue::Retry,
                                origin,
                                local_path.to_vec(),
                                false,
                            );
                        }
                    }
                }
                return CheckOutcome::Missing;
            }
        };
        let info = handle.info();
        let disp_path = self.fs.local_to_path(&tmppath);

        // Fullscan fast path: a name/fsid/(size, mtime) match against the
        // cached state skips re-fingerprinting entirely.
        if self.fullscan {
            let last = self.fs.last_path_component(&tmppath);
            let fname = &tmppath[last..];
            let fast_parent = parent.unwrap_or(self.root);
            if let Some(cl) = self.arena.node(fast_parent).child_by_name(fname) {
                if info.fsid_valid && self.arena.node(cl).fsid == Some(info.fsid) {
                    matched = Some(cl);
                    self.arena.node_mut(cl).set_not_seen(0);

                    let node = self.arena.node(cl);
                    let qualifies = node.kind != NodeKind::File
                        || (node.fp.size == info.size && node.fp.mtime == info.mtime);
                    if qualifies {
                        self.arena.node_mut(cl).scan_seq = self.scan_seq;
                        if info.kind == NodeKind::Folder {
                            self.scan(&tmppath);
                        } else {
                            self.local_bytes += info.size;
                        }
                        return CheckOutcome::Found(cl);
                    }
                }
            }
        }

        let mut new_node = false;

        if !is_root {
            if let Some(m) = matched {
                if self.arena.node(m).kind == info.kind {
                    self.arena.node_mut(m).set_not_seen(0);

                    if info.kind == NodeKind::File {
                        if info.fsid_valid && self.arena.node(m).fsid != Some(info.fsid) {
                            // The fsid changed: the file was overwritten.
                            match self.live_fsid_holder(info.fsid) {
                                Some(holder) if holder != m => {
                                    let h = self.arena.node(holder);
                                    if h.fp.mtime != info.mtime || h.fp.size != info.size {
                                        // Spurious fsid match: a deletion /
                                        // creation cycle reused the inode.
                                        // Only trust the collision within
                                        // the same volume.
                                        debug!(fsid = info.fsid, "stale fsid holder dropped");
                                        self.destroy_subtree(holder);
                                    } else {
                                        // Overwrite-by-move: transfer the
                                        // holder's identity onto this path.
                                        debug!(path = %disp_path, "file move/overwrite detected");
                                        self.destroy_subtree(m);
                                        // Pending remote deletions are
                                        // committed upstream before the
                                        // move is replayed remotely.
                                        self.emit_local_move(holder, &disp_path);
                                        self.set_name_parent(
                                            holder,
                                            parent.unwrap_or(self.root),
                                            &tmppath,
                                        );
                                        self.arena.node_mut(holder).set_not_seen(0);
                                        self.cache_add(holder);
                                        return CheckOutcome::Found(holder);
                                    }
                                }
                                Some(_) => {}
                                None => {
                                    // Overwritten by an unknown file: force
                                    // change detection below.
                                    self.arena.node_mut(m).fp.mtime = -1;
                                }
                            }
                        }

                        let node = self.arena.node(m);
                        if info.mtime != node.fp.mtime || info.size != node.fp.size {
                            if info.fsid_valid && node.fsid != Some(info.fsid) {
                                self.set_fsid(m, info.fsid);
                            }

                            let old_size = self.arena.node(m).fp.size.max(0);
                            let changed =
                                self.arena.node_mut(m).gen_fingerprint(&info, handle.as_mut());
                            let node = self.arena.node_mut(m);
                            if changed && node.fp.size >= 0 {
                                self.local_bytes += node.fp.size - old_size;
                            }

                            self.emit_local_file_change(m, &disp_path);
                            // A rewritten file invalidates any in-flight
                            // transfer and restarts the quiet period.
                            self.arena.node_mut(m).transfer = None;
                            let now_ds = self.notifier.now_ds();
                            let node = self.arena.node_mut(m);
                            node.bump_nagle(now_ds);
                            node.deleted = false;

                            self.cache_add(m);
                            return CheckOutcome::Found(m);
                        }
                    } else {
                        // Overwritten folders are tolerated; the content
                        // scan picks up child deviations.
                        if info.fsid_valid {
                            self.set_fsid(m, info.fsid);
                        }
                    }
                } else {
                    debug!(path = %disp_path, "node type changed: recreate");
                    self.destroy_subtree(m);
                    matched = None;
                }
            }

            if matched.is_none() {
                // Rename or move of an existing node?
                let move_in = info
                    .fsid_valid
                    .then(|| self.live_fsid_holder(info.fsid))
                    .flatten()
                    .filter(|&holder| {
                        let h = self.arena.node(holder);
                        // All indexed nodes belong to this engine and hence
                        // this volume; a multi-sync container additionally
                        // compares volume fingerprints here.
                        h.kind == info.kind
                            && (h.kind != NodeKind::File
                                || (h.fp.mtime == info.mtime && h.fp.size == info.size))
                    });

                if let Some(holder) = move_in {
                    debug!(path = %disp_path, kind = %info.kind, "move detected by fsid");
                    self.emit_local_move(holder, &disp_path);
                    self.set_name_parent(holder, parent.unwrap_or(self.root), &tmppath);
                    // In-flight uploads keep their slots; their paths are
                    // refreshed by the transfer layer.
                    self.cache_add(holder);
                    self.arena.node_mut(holder).set_not_seen(0);

                    if self.fullscan && info.kind == NodeKind::Folder {
                        // Re-check the moved folder's contents against the
                        // cached state.
                        self.scan(&tmppath);
                    }
                    return CheckOutcome::Found(holder);
                }

                let p = parent.unwrap_or(self.root);
                debug!(
                    path = %disp_path,
                    parent = %self.fs.local_to_display(&self.arena.node(p).local_name),
                    "new shadow node"
                );
                let id = self.alloc_node(info.kind, p, &tmppath);
                if info.fsid_valid {
                    self.set_fsid(id, info.fsid);
                }
                matched = Some(id);
                new_node = true;
            }
        }

        // Finalize.
        let Some(l) = matched else {
            return CheckOutcome::Missing;
        };

        if is_root && info.kind == NodeKind::File {
            error!("the sync root resolved to a file");
            self.last_error = Some(EngineError::RootIsFile(
                self.config.root_path.display().to_string(),
            ));
            self.change_state(SyncState::Failed);
            return CheckOutcome::Missing;
        }

        if self.arena.node(l).kind == NodeKind::Folder {
            if new_node {
                self.scan(&tmppath);
                self.emit_local_folder_addition(l, &disp_path);
                if !is_root {
                    self.cache_add(l);
                }
                CheckOutcome::Found(l)
            } else {
                // Child changes of an existing folder arrive as their own
                // observations.
                CheckOutcome::Missing
            }
        } else {
            let old_size = self.arena.node(l).fp.size;
            if old_size > 0 {
                self.local_bytes -= old_size;
            }
            let changed = self.arena.node_mut(l).gen_fingerprint(&info, handle.as_mut());
            if changed {
                let now_ds = self.notifier.now_ds();
                let node = self.arena.node_mut(l);
                node.bump_nagle(now_ds);
                node.deleted = false;
            }
            if self.arena.node(l).fp.size > 0 {
                self.local_bytes += self.arena.node(l).fp.size;
            }

            if new_node {
                self.emit_local_file_addition(l, &disp_path);
            } else if changed {
                self.emit_local_file_change(l, &disp_path);
            }
            if new_node || changed {
                self.cache_add(l);
            }
            CheckOutcome::Found(l)
        }
    }

    /// Scans one directory level, queueing an observation per syncable entry
    ///
    /// Recursion happens implicitly: `check_path` on a new folder calls
    /// `scan` again, which queues that folder's children.
    pub fn scan(&mut self, local_path: &[u8]) -> bool {
        if self.is_under_debris(local_path) {
            return false;
        }

        let entries: Vec<Vec<u8>> = {
            let mut dir = match self.fs.open_dir(local_path) {
                Ok(dir) => dir,
                Err(e) => {
                    warn!(
                        path = %self.fs.local_to_path(local_path),
                        error = %e,
                        "failed to open directory for scan"
                    );
                    return false;
                }
            };
            let mut out = Vec::new();
            while let Some(name) = dir.next(self.config.follow_symlinks) {
                out.push(name);
            }
            out
        };

        let sep = self.fs.local_separator().to_vec();
        for name in entries {
            let display = self.fs.local_to_display(&name);

            let mut child_path = local_path.to_vec();
            child_path.extend_from_slice(&sep);
            child_path.extend_from_slice(&name);

            if !self.events.is_syncable(&display, &child_path) {
                continue;
            }
            if self.is_under_debris(&child_path) {
                continue;
            }

            self.notifier
                .notify(NotifyQueue::DirEvents, None, child_path, true);
        }
        true
    }

    /// Drains one notify queue cooperatively
    ///
    /// Yields after any processed file node (fingerprinting is the costly
    /// step) and while the upper layer reports remote add activity.
    pub fn proc_scan_q(&mut self, queue: NotifyQueue) -> QueueVerdict {
        if self.state.is_terminal() {
            while self.notifier.pop(queue).is_some() {}
            return QueueVerdict::Drained;
        }

        let ds_min = self.notifier.now_ds().saturating_sub(SETTLE_DS);
        let mut budget = self.notifier.len(queue);

        while budget > 0 {
            budget -= 1;

            let (origin, path, timestamp, stale_origin) = {
                let front = self.notifier.front(queue).expect("budget tracks queue length");
                let stale = front
                    .origin
                    .is_some_and(|id| !self.arena.contains(id));
                (front.origin, front.path.clone(), front.timestamp_ds, stale)
            };

            if timestamp > ds_min {
                trace!("scan postponed; modification too recent");
                return QueueVerdict::Wait(Duration::from_millis((timestamp - ds_min) * 100));
            }

            if stale_origin {
                debug!(path = %self.fs.local_to_path(&path), "notification skipped");
                self.notifier.pop(queue);
                continue;
            }

            let outcome = self.check_path(origin, &path, None);
            if outcome == CheckOutcome::ParentMissing {
                trace!("scan deferred");
                return QueueVerdict::Deferred;
            }
            self.notifier.pop(queue);

            let processed_file = matches!(
                outcome,
                CheckOutcome::Found(id)
                    if self.arena.get(id).is_some_and(|n| n.kind == NodeKind::File)
            );
            if processed_file || self.remote_adding {
                return QueueVerdict::Yielded;
            }
        }

        QueueVerdict::Drained
    }

    /// One cooperative drain step over both queues
    ///
    /// When both queues empty out, a pending fullscan is finalized with
    /// [`delete_missing`](Self::delete_missing), the state cache is flushed
    /// and an `InitialScan` engine goes `Active`.
    pub async fn drain_once(&mut self) -> EngineStatus {
        let mut wait: Option<Duration> = None;
        let mut deferred = false;

        for queue in [NotifyQueue::DirEvents, NotifyQueue::Retry] {
            match self.proc_scan_q(queue) {
                QueueVerdict::Drained => {}
                QueueVerdict::Deferred => deferred = true,
                QueueVerdict::Yielded => {
                    return EngineStatus::Busy {
                        wait: None,
                        deferred: false,
                    }
                }
                QueueVerdict::Wait(d) => {
                    wait = Some(wait.map_or(d, |w| w.min(d)));
                }
            }
        }

        if self.notifier.idle() && !self.state.is_terminal() {
            if self.fullscan {
                self.delete_missing(self.root);
                self.fullscan = false;
            }
            if self.state == SyncState::InitialScan {
                self.change_state(SyncState::Active);
            }
            self.flush_cache().await;
            return EngineStatus::Idle;
        }

        EngineStatus::Busy { wait, deferred }
    }

    /// Destroys every node whose scan stamp lags the current fullscan pass
    /// by more than one. Invoked when a fullscan's queues drain; incremental
    /// mode uses the per-node not-seen counter instead.
    pub fn delete_missing(&mut self, subtree: NodeId) {
        let children: Vec<NodeId> = match self.arena.get(subtree) {
            Some(node) => node.children.values().copied().collect(),
            None => return,
        };
        for child in children {
            let Some(node) = self.arena.get(child) else {
                continue;
            };
            if self.scan_seq.saturating_sub(node.scan_seq) > 1 {
                self.destroy_subtree(child);
            } else {
                self.delete_missing(child);
            }
        }
    }

    /// Flushes the state cache (internally gated on state and queue sizes)
    ///
    /// A partial flush is not fatal: the leftovers stay queued, and the
    /// condition is recorded as [`EngineError::CachePartial`].
    pub async fn flush_cache(&mut self) {
        if let Err(err) = self
            .cache
            .flush(&mut self.arena, self.root, self.state, &*self.sealer)
            .await
        {
            warn!(error = %err, "shadow node caching did not complete");
            self.last_error = Some(err);
        }
    }

    // ------------------------------------------------------------------
    // Cache reload
    // ------------------------------------------------------------------

    /// Rebuilds the shadow tree from the durable cache
    ///
    /// Records are unsealed and bucketed by parent dbid, then attached
    /// recursively starting from the root's children. Undecodable records
    /// and subtrees deeper than [`RELOAD_MAX_DEPTH`] are discarded; the
    /// following fullscan rediscovers them from disk.
    pub async fn read_state_cache(&mut self) {
        if self.state != SyncState::InitialScan || !self.cache.has_store() {
            return;
        }
        let Some(records) = self.cache.load().await else {
            return;
        };

        let mut buckets: HashMap<u32, Vec<NodeId>> = HashMap::new();
        let mut max_dbid = 0u32;
        for (dbid, sealed) in records {
            max_dbid = max_dbid.max(dbid);
            let Some(plain) = self.sealer.unseal(dbid, &sealed) else {
                warn!(dbid, "discarding unverifiable cache record");
                self.cache.discard(dbid);
                continue;
            };
            match NodeRecord::decode(&plain) {
                Ok(record) => {
                    let parent_dbid = record.parent_dbid;
                    let mut node = ShadowNode::from_record(record);
                    node.dbid = dbid;
                    node.scan_seq = self.scan_seq;
                    let id = self.arena.insert(node);
                    buckets.entry(parent_dbid).or_default().push(id);
                }
                Err(e) => {
                    warn!(dbid, error = %e, "discarding undecodable cache record");
                    self.cache.discard(dbid);
                }
            }
        }
        self.cache.seed_next_dbid(max_dbid + 1);

        let mut path = self.arena.node(self.root).local_name.clone();
        self.attach_cached_children(self.root, 0, &mut buckets, &mut path, RELOAD_MAX_DEPTH);

        // Orphans and depth-truncated subtrees: drop them; scan will
        // rediscover whatever still exists on disk.
        let leftovers: Vec<NodeId> = buckets.values().flatten().copied().collect();
        for id in leftovers {
            let dbid = self.arena.node(id).dbid;
            self.cache.discard(dbid);
            self.arena.remove(id);
        }

        info!(
            nodes = self.arena.len() - 1,
            "shadow tree reloaded from state cache"
        );

        // One full pass over the tree identifies entries deleted while the
        // engine was not running.
        self.fullscan = true;
        self.scan_seq += 1;
    }

    fn attach_cached_children(
        &mut self,
        parent: NodeId,
        parent_dbid: u32,
        buckets: &mut HashMap<u32, Vec<NodeId>>,
        path: &mut Vec<u8>,
        depth: u32,
    ) {
        let Some(ids) = buckets.remove(&parent_dbid) else {
            return;
        };
        if depth == 0 {
            buckets.insert(parent_dbid, ids);
            return;
        }

        let sep = self.fs.local_separator().to_vec();
        let base_len = path.len();
        for id in ids {
            let (name, kind, fsid, dbid) = {
                let node = self.arena.node(id);
                (
                    node.local_name.clone(),
                    node.kind,
                    node.fsid,
                    node.dbid,
                )
            };

            path.truncate(base_len);
            path.extend_from_slice(&sep);
            path.extend_from_slice(&name);

            self.arena.node_mut(id).parent = Some(parent);
            self.arena.node_mut(parent).children.insert(name, id);
            self.node_counts[kind.index()] += 1;
            if let Some(f) = fsid {
                self.fsids.insert(f, id);
            }

            self.attach_cached_children(id, dbid, buckets, path, depth - 1);
        }
        path.truncate(base_len);
    }

    // ------------------------------------------------------------------
    // Tree surgery
    // ------------------------------------------------------------------

    /// Allocates a fresh node under `parent` for `full_path`'s last
    /// component
    fn alloc_node(&mut self, kind: NodeKind, parent: NodeId, full_path: &[u8]) -> NodeId {
        let last = self.fs.last_path_component(full_path);
        let name = full_path[last..].to_vec();

        let mut node = ShadowNode::new(kind, name.clone());
        node.parent = Some(parent);
        node.scan_seq = self.scan_seq;
        let id = self.arena.insert(node);
        self.arena.node_mut(parent).children.insert(name, id);
        self.node_counts[kind.index()] += 1;
        id
    }

    /// Renames/reparents `id` to `full_path` under `new_parent`
    ///
    /// A node whose current local name is empty is treated as a fresh
    /// insert; otherwise the old parent-map entries (primary and pending)
    /// are dropped first.
    fn set_name_parent(&mut self, id: NodeId, new_parent: NodeId, full_path: &[u8]) {
        let last = self.fs.last_path_component(full_path);
        let name = full_path[last..].to_vec();

        let old_parent = self.arena.node(id).parent;
        let old_name = self.arena.node(id).local_name.clone();
        if !old_name.is_empty() {
            if let Some(op) = old_parent.filter(|op| self.arena.contains(*op)) {
                let op_node = self.arena.node_mut(op);
                if op_node.children.get(&old_name) == Some(&id) {
                    op_node.children.remove(&old_name);
                }
                op_node.shadow_children.retain(|_, v| *v != id);
            }
        }

        let node = self.arena.node_mut(id);
        node.local_name = name.clone();
        node.parent = Some(new_parent);
        self.arena.node_mut(new_parent).children.insert(name, id);
    }

    /// Registers `fsid` for `id`, evicting any prior index holder
    fn set_fsid(&mut self, id: NodeId, fsid: u64) {
        let old = self.arena.node(id).fsid;
        if old == Some(fsid) && self.fsids.get(&fsid) == Some(&id) {
            return;
        }
        if let Some(old_fsid) = old {
            if self.fsids.get(&old_fsid) == Some(&id) {
                self.fsids.remove(&old_fsid);
            }
        }
        self.arena.node_mut(id).fsid = Some(fsid);
        self.fsids.insert(fsid, id);
    }

    /// Resolves the current index holder of `fsid`, dropping stale entries
    fn live_fsid_holder(&mut self, fsid: u64) -> Option<NodeId> {
        match self.fsids.get(&fsid) {
            Some(&id) if self.arena.contains(id) => Some(id),
            Some(_) => {
                self.fsids.remove(&fsid);
                None
            }
            None => None,
        }
    }

    /// Destroys `id` and its subtree: parent-map entries, fsid index
    /// entries and cached records included
    fn destroy_subtree(&mut self, id: NodeId) {
        let Some(node) = self.arena.get(id) else {
            return;
        };
        let children: Vec<NodeId> = node
            .children
            .values()
            .chain(node.shadow_children.values())
            .copied()
            .collect();
        for child in children {
            self.destroy_subtree(child);
        }

        let node = self.arena.node(id);
        let (parent, name, fsid, dbid, kind) = (
            node.parent,
            node.local_name.clone(),
            node.fsid,
            node.dbid,
            node.kind,
        );

        if let Some(p) = parent.filter(|p| self.arena.contains(*p)) {
            let p_node = self.arena.node_mut(p);
            if p_node.children.get(&name) == Some(&id) {
                p_node.children.remove(&name);
            }
            p_node.shadow_children.retain(|_, v| *v != id);
        }
        if let Some(f) = fsid {
            if self.fsids.get(&f) == Some(&id) {
                self.fsids.remove(&f);
            }
        }
        self.cache.del(id, dbid);
        self.node_counts[kind.index()] = self.node_counts[kind.index()].saturating_sub(1);
        self.arena.remove(id);
        trace!(node = %id, "shadow node destroyed");
    }

    fn cache_add(&mut self, id: NodeId) {
        let dbid = self.arena.node(id).dbid;
        self.cache.add(id, dbid);
    }

    /// Bit-exact debris prefix test with separator boundary
    fn is_under_debris(&self, path: &[u8]) -> bool {
        let debris = self.debris.local_path();
        let sep = self.fs.local_separator();
        path.len() >= debris.len()
            && &path[..debris.len()] == debris
            && (path.len() == debris.len() || &path[debris.len()..debris.len() + sep.len()] == sep)
    }

    // ------------------------------------------------------------------
    // Callback emission (inhibited once canceled)
    // ------------------------------------------------------------------

    fn emit_local_folder_addition(&self, id: NodeId, display: &str) {
        if self.state != SyncState::Canceled {
            self.events.on_local_folder_addition(id, display);
        }
    }

    fn emit_local_file_addition(&self, id: NodeId, display: &str) {
        if self.state != SyncState::Canceled {
            self.events.on_local_file_addition(id, display);
        }
    }

    fn emit_local_file_change(&self, id: NodeId, display: &str) {
        if self.state != SyncState::Canceled {
            self.events.on_local_file_change(id, display);
        }
    }

    fn emit_local_move(&self, id: NodeId, display: &str) {
        if self.state != SyncState::Canceled {
            self.events.on_local_move(id, display);
        }
    }
}

impl Drop for SyncEngine {
    fn drop(&mut self) {
        // Tearing down a live engine risks the upper layer interpreting the
        // vanishing tree as a mass deletion.
        if !std::thread::panicking() {
            debug_assert!(
                self.state.is_terminal(),
                "sync engine dropped while {}",
                self.state
            );
        }
    }
}

/// First occurrence of `needle` in `haystack`
fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_subslice() {
        assert_eq!(find_subslice(b"a/b/c", b"/"), Some(1));
        assert_eq!(find_subslice(b"abc", b"/"), None);
        assert_eq!(find_subslice(b"ab", b"abc"), None);
        assert_eq!(find_subslice(b"xx::y", b"::"), Some(2));
    }
}
