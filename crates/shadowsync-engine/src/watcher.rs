//! OS watcher bridge
//!
//! Wraps the `notify` crate to monitor the sync root, reducing raw OS events
//! to the paths they touched. The engine does not interpret event kinds: a
//! path observation re-enters reconciliation, which classifies the outcome
//! from the filesystem itself. Rename events contribute both their old and
//! new paths so the vacated source is re-checked too.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

/// Watches the sync root and emits touched paths
///
/// On Linux this uses inotify. Paths arrive through an mpsc channel; the
/// engine drains it with `try_recv` between reconciliation steps and feeds
/// each path into its `DirEvents` queue.
pub struct RootWatcher {
    watcher: RecommendedWatcher,
}

impl RootWatcher {
    /// Creates the watcher and the channel its paths arrive on
    pub fn new() -> Result<(Self, mpsc::Receiver<PathBuf>)> {
        let (tx, rx) = mpsc::channel::<PathBuf>(1024);

        let watcher = RecommendedWatcher::new(
            move |res: std::result::Result<notify::Event, notify::Error>| match res {
                Ok(event) => {
                    if !relevant(&event.kind) {
                        return;
                    }
                    for path in event.paths {
                        if let Err(e) = tx.blocking_send(path) {
                            warn!(error = %e, "failed to forward watch path (receiver dropped)");
                            return;
                        }
                    }
                }
                Err(err) => {
                    error!(error = %err, "filesystem watcher error");
                }
            },
            notify::Config::default(),
        )
        .context("failed to create filesystem watcher")?;

        Ok((Self { watcher }, rx))
    }

    /// Starts watching `root` recursively
    pub fn watch(&mut self, root: &Path) -> Result<()> {
        info!(root = %root.display(), "starting recursive watch");
        self.watcher
            .watch(root, RecursiveMode::Recursive)
            .with_context(|| format!("failed to watch {}", root.display()))
    }

    /// Stops watching `root`
    pub fn unwatch(&mut self, root: &Path) -> Result<()> {
        info!(root = %root.display(), "stopping watch");
        self.watcher
            .unwatch(root)
            .with_context(|| format!("failed to unwatch {}", root.display()))
    }
}

/// Event kinds that can change what reconciliation would observe.
/// Access events never do.
fn relevant(kind: &EventKind) -> bool {
    matches!(
        kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, ModifyKind, RemoveKind};

    #[test]
    fn test_relevant_kinds() {
        assert!(relevant(&EventKind::Create(CreateKind::File)));
        assert!(relevant(&EventKind::Modify(ModifyKind::Any)));
        assert!(relevant(&EventKind::Remove(RemoveKind::File)));
        assert!(!relevant(&EventKind::Access(AccessKind::Read)));
    }
}
