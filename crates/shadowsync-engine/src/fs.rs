//! Standard-library filesystem adapter
//!
//! Implements the `FsAdapter` port with `std::fs`. Local encoding on Unix is
//! the raw byte form of the path; the fsid is the inode number and the
//! volume fingerprint is the device id of the sync root.
//!
//! ## Transient errors
//!
//! Failures that tend to resolve on their own (locked files, descriptor
//! exhaustion, interrupts) are reported as retryable so the engine
//! reschedules the observation instead of treating the target as missing.

use std::fs::{File, Metadata};
use std::io::ErrorKind;
use std::path::PathBuf;

use anyhow::Context;
use tracing::debug;

use shadowsync_core::domain::NodeKind;
use shadowsync_core::ports::fs::{
    DirHandle, FileHandle, FileInfo, FsAdapter, MkdirOutcome, OpenFailure, RenameOutcome,
};

#[cfg(unix)]
use std::os::unix::ffi::OsStrExt;
#[cfg(unix)]
use std::os::unix::fs::{FileExt, MetadataExt};

/// Raw OS error codes treated as transient: EBUSY, ETXTBSY, ENFILE, EMFILE
const TRANSIENT_OS_ERRORS: [i32; 4] = [16, 26, 23, 24];

fn is_transient(err: &std::io::Error) -> bool {
    if matches!(
        err.kind(),
        ErrorKind::WouldBlock | ErrorKind::Interrupted | ErrorKind::TimedOut
    ) {
        return true;
    }
    err.raw_os_error()
        .is_some_and(|code| TRANSIENT_OS_ERRORS.contains(&code))
}

fn to_path(local: &[u8]) -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from(std::ffi::OsStr::from_bytes(local))
    }
    #[cfg(not(unix))]
    {
        PathBuf::from(String::from_utf8_lossy(local).into_owned())
    }
}

fn info_of(md: &Metadata) -> FileInfo {
    let kind = if md.is_dir() {
        NodeKind::Folder
    } else {
        NodeKind::File
    };
    #[cfg(unix)]
    let (fsid, fsid_valid, mtime) = (md.ino(), true, md.mtime());
    #[cfg(not(unix))]
    let (fsid, fsid_valid, mtime) = (
        0u64,
        false,
        md.modified()
            .ok()
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_secs() as i64),
    );
    FileInfo {
        kind,
        size: if kind == NodeKind::File {
            md.len() as i64
        } else {
            0
        },
        mtime,
        fsid,
        fsid_valid,
    }
}

struct StdDirHandle {
    entries: std::fs::ReadDir,
}

impl DirHandle for StdDirHandle {
    fn next(&mut self, follow_symlinks: bool) -> Option<Vec<u8>> {
        loop {
            let entry = match self.entries.next()? {
                Ok(e) => e,
                Err(_) => continue,
            };
            if !follow_symlinks {
                if let Ok(ft) = entry.file_type() {
                    if ft.is_symlink() {
                        continue;
                    }
                }
            }
            #[cfg(unix)]
            return Some(entry.file_name().as_bytes().to_vec());
            #[cfg(not(unix))]
            return Some(entry.file_name().to_string_lossy().into_owned().into_bytes());
        }
    }
}

#[derive(Debug)]
struct StdFileHandle {
    info: FileInfo,
    file: Option<File>,
}

impl FileHandle for StdFileHandle {
    fn info(&self) -> FileInfo {
        self.info
    }

    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> std::io::Result<usize> {
        let Some(file) = self.file.as_ref() else {
            return Err(std::io::Error::from(ErrorKind::Unsupported));
        };
        #[cfg(unix)]
        {
            file.read_at(buf, offset)
        }
        #[cfg(not(unix))]
        {
            use std::io::{Read, Seek, SeekFrom};
            let mut f = file;
            f.seek(SeekFrom::Start(offset))?;
            f.read(buf)
        }
    }
}

/// `std::fs`-backed filesystem adapter
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFsAdapter;

impl StdFsAdapter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl FsAdapter for StdFsAdapter {
    fn open_dir(&self, path: &[u8]) -> anyhow::Result<Box<dyn DirHandle>> {
        let p = to_path(path);
        let entries = std::fs::read_dir(&p)
            .with_context(|| format!("failed to open directory {}", p.display()))?;
        Ok(Box::new(StdDirHandle { entries }))
    }

    fn open_file(
        &self,
        path: &[u8],
        stat_only: bool,
        write: bool,
    ) -> Result<Box<dyn FileHandle>, OpenFailure> {
        let p = to_path(path);
        let md = std::fs::metadata(&p).map_err(|e| OpenFailure {
            retry: is_transient(&e),
        })?;

        if !md.is_dir() && !md.is_file() {
            // Sockets, fifos and the like are not syncable objects.
            debug!(path = %p.display(), "refusing to open special file");
            return Err(OpenFailure { retry: false });
        }

        let info = info_of(&md);
        let file = if !stat_only && info.kind == NodeKind::File {
            let open = File::options().read(true).write(write).open(&p);
            match open {
                Ok(f) => Some(f),
                Err(e) => {
                    return Err(OpenFailure {
                        retry: is_transient(&e),
                    })
                }
            }
        } else {
            None
        };

        Ok(Box::new(StdFileHandle { info, file }))
    }

    fn rename(&self, from: &[u8], to: &[u8], replace: bool) -> RenameOutcome {
        let from_p = to_path(from);
        let to_p = to_path(to);

        if !replace && std::fs::symlink_metadata(&to_p).is_ok() {
            return RenameOutcome::TargetExists;
        }

        match std::fs::rename(&from_p, &to_p) {
            Ok(()) => RenameOutcome::Renamed,
            Err(e) if is_transient(&e) => RenameOutcome::TransientError,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => RenameOutcome::TargetExists,
            Err(e) => {
                debug!(
                    from = %from_p.display(),
                    to = %to_p.display(),
                    error = %e,
                    "rename failed"
                );
                RenameOutcome::Failed
            }
        }
    }

    fn mkdir(&self, path: &[u8], recursive: bool) -> MkdirOutcome {
        let p = to_path(path);
        let result = if recursive {
            // create_dir_all reports success for pre-existing directories;
            // distinguish that case for the caller.
            if p.is_dir() {
                return MkdirOutcome::AlreadyExists;
            }
            std::fs::create_dir_all(&p)
        } else {
            std::fs::create_dir(&p)
        };
        match result {
            Ok(()) => MkdirOutcome::Created,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => MkdirOutcome::AlreadyExists,
            Err(e) => {
                debug!(path = %p.display(), error = %e, "mkdir failed");
                MkdirOutcome::Failed
            }
        }
    }

    fn local_separator(&self) -> &[u8] {
        b"/"
    }

    fn last_path_component(&self, path: &[u8]) -> usize {
        let sep = self.local_separator();
        path.windows(sep.len())
            .rposition(|w| w == sep)
            .map_or(0, |pos| pos + sep.len())
    }

    fn path_to_local(&self, path: &str) -> Vec<u8> {
        path.as_bytes().to_vec()
    }

    fn local_to_path(&self, local: &[u8]) -> String {
        String::from_utf8_lossy(local).into_owned()
    }

    fn local_to_display(&self, local: &[u8]) -> String {
        String::from_utf8_lossy(local).into_owned()
    }

    fn fs_fingerprint(&self, root: &[u8]) -> u64 {
        #[cfg(unix)]
        {
            std::fs::metadata(to_path(root)).map_or(0, |md| md.dev())
        }
        #[cfg(not(unix))]
        {
            let _ = root;
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use tempfile::TempDir;

    fn local(p: &Path) -> Vec<u8> {
        StdFsAdapter.path_to_local(&p.display().to_string())
    }

    #[test]
    fn test_open_file_stats_regular_file() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("a.txt");
        std::fs::write(&p, b"hello").unwrap();

        let fs = StdFsAdapter::new();
        let handle = fs.open_file(&local(&p), false, false).unwrap();
        let info = handle.info();
        assert_eq!(info.kind, NodeKind::File);
        assert_eq!(info.size, 5);
        assert!(info.fsid_valid);
    }

    #[test]
    fn test_open_file_stats_directory() {
        let dir = TempDir::new().unwrap();
        let fs = StdFsAdapter::new();
        let handle = fs.open_file(&local(dir.path()), true, false).unwrap();
        assert_eq!(handle.info().kind, NodeKind::Folder);
        assert_eq!(handle.info().size, 0);
    }

    #[test]
    fn test_open_missing_file_is_hard_failure() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("absent");
        let fs = StdFsAdapter::new();
        let err = fs.open_file(&local(&p), false, false).unwrap_err();
        assert!(!err.retry);
    }

    #[test]
    fn test_read_at() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("a.txt");
        std::fs::write(&p, b"0123456789").unwrap();

        let fs = StdFsAdapter::new();
        let mut handle = fs.open_file(&local(&p), false, false).unwrap();
        let mut buf = [0u8; 4];
        let n = handle.read_at(3, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"3456");
    }

    #[test]
    fn test_dir_iteration_skips_symlinks() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("real.txt"), b"x").unwrap();
        #[cfg(unix)]
        std::os::unix::fs::symlink(dir.path().join("real.txt"), dir.path().join("link.txt"))
            .unwrap();

        let fs = StdFsAdapter::new();
        let mut names = Vec::new();
        let mut handle = fs.open_dir(&local(dir.path())).unwrap();
        while let Some(name) = handle.next(false) {
            names.push(name);
        }
        assert_eq!(names, vec![b"real.txt".to_vec()]);
    }

    #[test]
    fn test_rename_respects_replace_flag() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a");
        let b = dir.path().join("b");
        std::fs::write(&a, b"a").unwrap();
        std::fs::write(&b, b"b").unwrap();

        let fs = StdFsAdapter::new();
        assert_eq!(
            fs.rename(&local(&a), &local(&b), false),
            RenameOutcome::TargetExists
        );
        assert_eq!(
            fs.rename(&local(&a), &local(&b), true),
            RenameOutcome::Renamed
        );
        assert_eq!(std::fs::read(&b).unwrap(), b"a");
    }

    #[test]
    fn test_mkdir_outcomes() {
        let dir = TempDir::new().unwrap();
        let p = dir.path().join("x/y");
        let fs = StdFsAdapter::new();

        assert_eq!(fs.mkdir(&local(&p), false), MkdirOutcome::Failed);
        assert_eq!(fs.mkdir(&local(&p), true), MkdirOutcome::Created);
        assert_eq!(fs.mkdir(&local(&p), true), MkdirOutcome::AlreadyExists);
        assert_eq!(fs.mkdir(&local(&p), false), MkdirOutcome::AlreadyExists);
    }

    #[test]
    fn test_last_path_component() {
        let fs = StdFsAdapter::new();
        assert_eq!(fs.last_path_component(b"/r/sub/a.txt"), 7);
        assert_eq!(fs.last_path_component(b"name"), 0);
    }

    #[test]
    fn test_fs_fingerprint_stable() {
        let dir = TempDir::new().unwrap();
        let fs = StdFsAdapter::new();
        let a = fs.fs_fingerprint(&local(dir.path()));
        let b = fs.fs_fingerprint(&local(dir.path()));
        assert_ne!(a, 0);
        assert_eq!(a, b);
    }
}
