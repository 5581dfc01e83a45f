//! Upward callback port (driving/primary port)
//!
//! The engine reports classified local changes to the remote-side
//! coordinator through this trait, and asks it which names to sync at all.
//! For any given path the callbacks are observed in the order the engine
//! classifies them; the engine never re-orders emissions for one path.
//!
//! ## Threading
//!
//! All callbacks are invoked synchronously from the engine's own thread.
//! Implementations must not call back into the engine re-entrantly.

use crate::domain::{NodeId, SyncState};

/// Observer of engine state and classified local changes
pub trait SyncEvents: Send + Sync {
    /// The engine changed lifecycle state
    fn on_state_change(&self, state: SyncState);

    /// A new local folder entered the shadow tree
    fn on_local_folder_addition(&self, node: NodeId, display_path: &str);

    /// A new local file entered the shadow tree
    fn on_local_file_addition(&self, node: NodeId, display_path: &str);

    /// An existing local file's `(size, mtime)` changed
    fn on_local_file_change(&self, node: NodeId, display_path: &str);

    /// A node moved or was renamed within the sync; identity was transferred
    /// to the destination path rather than emitting delete + create
    fn on_local_move(&self, node: NodeId, display_path: &str);

    /// Downward query: should this entry be synced at all?
    ///
    /// `name` is the display form of the entry name; `local_path` is the
    /// full path in local encoding. Rejected entries are invisible to the
    /// engine: never scanned, never shadowed, never reported.
    fn is_syncable(&self, name: &str, local_path: &[u8]) -> bool {
        let _ = (name, local_path);
        true
    }
}
