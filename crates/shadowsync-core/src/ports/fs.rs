//! Local filesystem port (driven/secondary port)
//!
//! The engine addresses the filesystem exclusively in the platform's *local
//! path encoding*, carried as raw byte strings (`&[u8]`). On Unix this is
//! the UTF-8 byte form of the path; platforms with multi-byte separators are
//! supported by the separator-width helpers below. Display strings are
//! derived only at the callback boundary.
//!
//! ## Design Notes
//!
//! - Calls are synchronous and may block; the engine budgets its work by
//!   yielding between processed file nodes, never mid-call.
//! - `open_file` distinguishes transient failures (`retry`) from hard ones;
//!   transient failures re-queue the observation, hard ones feed the
//!   not-seen deletion protocol.
//! - Every handle returned from this port is released before the engine's
//!   reconciliation call returns, on every exit path.

use crate::domain::NodeKind;

/// Stat result of an opened file or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    /// File or folder
    pub kind: NodeKind,
    /// Size in bytes (0 for folders)
    pub size: i64,
    /// Modification time in seconds since the epoch
    pub mtime: i64,
    /// Filesystem-issued 64-bit identity (inode or file id)
    pub fsid: u64,
    /// Whether `fsid` is meaningful on this platform/volume
    pub fsid_valid: bool,
}

/// Failure to open a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFailure {
    /// The failure is transient; the engine reschedules the observation
    /// instead of treating the target as missing
    pub retry: bool,
}

/// Outcome of a rename attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenameOutcome {
    /// The rename succeeded
    Renamed,
    /// A transient condition (locking, resource exhaustion) prevented it
    TransientError,
    /// The target already exists and `replace` was false
    TargetExists,
    /// Any other failure
    Failed,
}

/// Outcome of a mkdir attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MkdirOutcome {
    /// The directory was created
    Created,
    /// The target already existed
    AlreadyExists,
    /// The directory could not be created
    Failed,
}

impl MkdirOutcome {
    /// Whether a directory exists at the target after the call
    #[must_use]
    pub const fn have_dir(self) -> bool {
        matches!(self, MkdirOutcome::Created | MkdirOutcome::AlreadyExists)
    }
}

/// Iterator over the entries of an open directory
pub trait DirHandle {
    /// Returns the next entry name in local encoding, or `None` at the end.
    ///
    /// `.` and `..` are never returned. Symbolic links are skipped unless
    /// `follow_symlinks` is set.
    fn next(&mut self, follow_symlinks: bool) -> Option<Vec<u8>>;
}

/// An open file carrying its stat snapshot
pub trait FileHandle: std::fmt::Debug {
    /// Stat snapshot taken when the handle was opened
    fn info(&self) -> FileInfo;

    /// Reads up to `buf.len()` bytes at `offset`
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize>;
}

/// Port trait for local filesystem operations
pub trait FsAdapter: Send {
    /// Opens a directory for iteration
    fn open_dir(&self, path: &[u8]) -> anyhow::Result<Box<dyn DirHandle>>;

    /// Opens a file or directory, taking a stat snapshot
    ///
    /// With `stat_only`, implementations may avoid opening a descriptor for
    /// reading. `write` requests write access (used by the transfer layer,
    /// never by reconciliation).
    fn open_file(
        &self,
        path: &[u8],
        stat_only: bool,
        write: bool,
    ) -> Result<Box<dyn FileHandle>, OpenFailure>;

    /// Renames `from` to `to`; `replace` allows clobbering an existing target
    fn rename(&self, from: &[u8], to: &[u8], replace: bool) -> RenameOutcome;

    /// Creates a directory, optionally with all missing ancestors
    fn mkdir(&self, path: &[u8], recursive: bool) -> MkdirOutcome;

    /// Path separator in local encoding (possibly multi-byte)
    fn local_separator(&self) -> &[u8];

    /// Byte index where the last path component starts
    fn last_path_component(&self, path: &[u8]) -> usize;

    /// Converts a display path to local encoding
    fn path_to_local(&self, path: &str) -> Vec<u8>;

    /// Converts a local-encoding path to a display string
    fn local_to_path(&self, local: &[u8]) -> String;

    /// Converts a local-encoding name to a display name
    fn local_to_display(&self, local: &[u8]) -> String;

    /// Fingerprint of the filesystem volume holding `root`
    ///
    /// Two nodes whose fsids collide belong to the same file only when their
    /// volumes report the same fingerprint. Returns 0 when the volume cannot
    /// be identified.
    fn fs_fingerprint(&self, root: &[u8]) -> u64;
}
