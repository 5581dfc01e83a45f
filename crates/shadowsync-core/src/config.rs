//! Sync configuration
//!
//! One [`SyncConfig`] describes one mirrored subtree. A process hosting
//! several syncs builds one config per root; the `tag` distinguishes them in
//! logs and callbacks.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::{EngineError, RemoteHandle};

/// Default name of the quarantine directory inside the sync root
pub const DEFAULT_DEBRIS_NAME: &str = ".debris";

/// Where locally deleted items are quarantined
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DebrisLocation {
    /// A directory with this name inside the sync root
    Name(String),
    /// An explicit directory, possibly outside the root
    Explicit(PathBuf),
}

impl Default for DebrisLocation {
    fn default() -> Self {
        DebrisLocation::Name(DEFAULT_DEBRIS_NAME.to_string())
    }
}

/// Configuration of a single sync
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    /// Local root directory to mirror
    pub root_path: PathBuf,
    /// Handle of the remote tree root this sync mirrors against
    pub remote_root: RemoteHandle,
    /// Identity of the user the remote tree belongs to; part of the
    /// state-cache table identifier so switching users spawns a new cache
    pub user_identity: u64,
    /// Quarantine directory for reversible local deletions
    #[serde(default)]
    pub debris: DebrisLocation,
    /// Overrides the probed filesystem volume fingerprint (testing and
    /// network mounts that misreport device ids)
    #[serde(default)]
    pub fs_fingerprint_override: Option<u64>,
    /// Whether the remote root is an incoming share
    #[serde(default)]
    pub in_share: bool,
    /// Whether directory iteration follows symbolic links
    #[serde(default)]
    pub follow_symlinks: bool,
    /// Caller-chosen tag identifying this sync in logs
    #[serde(default)]
    pub tag: u32,
}

impl SyncConfig {
    /// Builds a config with defaults for everything but the identifying triple
    pub fn new(root_path: impl Into<PathBuf>, remote_root: RemoteHandle, user_identity: u64) -> Self {
        Self {
            root_path: root_path.into(),
            remote_root,
            user_identity,
            debris: DebrisLocation::default(),
            fs_fingerprint_override: None,
            in_share: false,
            follow_symlinks: false,
            tag: 0,
        }
    }

    /// Validates the configuration
    ///
    /// # Errors
    /// Returns [`EngineError::InvalidPath`] when the root is not absolute.
    pub fn validate(&self) -> Result<(), EngineError> {
        if !self.root_path.is_absolute() {
            return Err(EngineError::InvalidPath(format!(
                "sync root must be absolute: {}",
                self.root_path.display()
            )));
        }
        if let DebrisLocation::Explicit(p) = &self.debris {
            if !p.is_absolute() {
                return Err(EngineError::InvalidPath(format!(
                    "explicit debris path must be absolute: {}",
                    p.display()
                )));
            }
        }
        Ok(())
    }

    /// Resolves the debris directory to an absolute path
    #[must_use]
    pub fn debris_path(&self) -> PathBuf {
        match &self.debris {
            DebrisLocation::Name(name) => self.root_path.join(name),
            DebrisLocation::Explicit(p) => p.clone(),
        }
    }

    /// Root path as a `Path`
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = SyncConfig::new("/home/user/Sync", RemoteHandle(1), 99);
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.debris_path(), PathBuf::from("/home/user/Sync/.debris"));
        assert!(!cfg.follow_symlinks);
        assert!(!cfg.in_share);
    }

    #[test]
    fn test_relative_root_rejected() {
        let cfg = SyncConfig::new("relative/root", RemoteHandle(1), 0);
        assert!(matches!(cfg.validate(), Err(EngineError::InvalidPath(_))));
    }

    #[test]
    fn test_explicit_debris() {
        let mut cfg = SyncConfig::new("/r", RemoteHandle(1), 0);
        cfg.debris = DebrisLocation::Explicit(PathBuf::from("/var/debris"));
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.debris_path(), PathBuf::from("/var/debris"));
    }

    #[test]
    fn test_relative_explicit_debris_rejected() {
        let mut cfg = SyncConfig::new("/r", RemoteHandle(1), 0);
        cfg.debris = DebrisLocation::Explicit(PathBuf::from("not/absolute"));
        assert!(cfg.validate().is_err());
    }
}
