//! Local debris quarantine
//!
//! The engine never unlinks local files. Deletions are expressed by moving
//! the target into a date-bucketed quarantine directory under the sync root
//! (or an explicit debris location); actual removal is left to an external
//! retention policy over the debris tree.
//!
//! Layout: `<debris>/<YYYY-MM-DD>[/<HH.MM.SS.nn>]/<basename>`. The day
//! bucket name is stable across runs; when a rename collides inside it, per
//! second-suffixed buckets disambiguate, numbered `00` through `99`.

use chrono::{DateTime, Datelike, Local, Timelike};
use tracing::{debug, warn};

use shadowsync_core::ports::fs::{FsAdapter, RenameOutcome};

/// Total bucket attempts per relocation: the plain day bucket is tried
/// three times around directory creation, then one hundred suffixed buckets.
const MAX_ATTEMPTS: u32 = 103;

/// Result of a debris relocation attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebrisOutcome {
    /// The target now lives in a debris bucket
    Moved,
    /// A transient filesystem condition interrupted the move; the whole
    /// operation may be retried later
    TransientError,
    /// No bucket could take the target; the caller surfaces this
    Exhausted,
}

/// Date-bucketed quarantine directory for reversible deletions
pub struct DebrisVault {
    /// Debris root in local encoding
    local_debris: Vec<u8>,
}

impl DebrisVault {
    pub fn new(local_debris: Vec<u8>) -> Self {
        Self { local_debris }
    }

    /// Debris root in local encoding
    pub fn local_path(&self) -> &[u8] {
        &self.local_debris
    }

    /// Relocates `path` into today's debris bucket
    pub fn move_to_debris(&self, fs: &dyn FsAdapter, path: &[u8]) -> DebrisOutcome {
        self.move_to_debris_at(fs, path, Local::now())
    }

    /// Clock-injected form of [`move_to_debris`](Self::move_to_debris)
    pub fn move_to_debris_at(
        &self,
        fs: &dyn FsAdapter,
        path: &[u8],
        now: DateTime<Local>,
    ) -> DebrisOutcome {
        let sep = fs.local_separator().to_vec();
        let base_name = &path[fs.last_path_component(path)..];
        let day = format!(
            "{:04}-{:02}-{:02}",
            now.year(),
            now.month(),
            now.day()
        );

        for attempt in 0..MAX_ATTEMPTS {
            // The base directory is created lazily on the second attempt,
            // and re-asserted over the last four in case it vanished
            // mid-loop.
            if attempt == 1 || attempt > MAX_ATTEMPTS - 5 {
                fs.mkdir(&self.local_debris, true);
            }

            let bucket = if attempt < 3 {
                day.clone()
            } else {
                format!(
                    "{day} {:02}.{:02}.{:02}.{:02}",
                    now.hour(),
                    now.minute(),
                    now.second(),
                    attempt - 3
                )
            };

            let mut bucket_path = self.local_debris.clone();
            bucket_path.extend_from_slice(&sep);
            bucket_path.extend_from_slice(&fs.path_to_local(&bucket));

            // The very first attempt probes for a bucket surviving from an
            // earlier run without creating anything.
            let have_dir = attempt > 0 && fs.mkdir(&bucket_path, true).have_dir();

            let mut target = bucket_path;
            target.extend_from_slice(&sep);
            target.extend_from_slice(base_name);

            match fs.rename(path, &target, false) {
                RenameOutcome::Renamed => {
                    debug!(
                        bucket = %bucket,
                        name = %fs.local_to_display(base_name),
                        "moved to local debris"
                    );
                    return DebrisOutcome::Moved;
                }
                RenameOutcome::TransientError => {
                    warn!("transient error moving to local debris");
                    return DebrisOutcome::TransientError;
                }
                RenameOutcome::TargetExists => {
                    // Name collision inside this bucket: disambiguate with
                    // the next suffixed bucket.
                    continue;
                }
                RenameOutcome::Failed => {
                    if have_dir {
                        // The bucket exists yet the rename still failed;
                        // further buckets will not do better.
                        return DebrisOutcome::Exhausted;
                    }
                }
            }
        }

        warn!(
            name = %fs.local_to_display(base_name),
            "local debris exhausted"
        );
        DebrisOutcome::Exhausted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::StdFsAdapter;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn local(p: &std::path::Path) -> Vec<u8> {
        StdFsAdapter.path_to_local(&p.display().to_string())
    }

    fn fixed_now() -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap()
    }

    #[test]
    fn test_moves_into_day_bucket() {
        let dir = TempDir::new().unwrap();
        let victim = dir.path().join("victim.txt");
        std::fs::write(&victim, b"x").unwrap();

        let debris_root = dir.path().join(".debris");
        let vault = DebrisVault::new(local(&debris_root));
        let fs = StdFsAdapter::new();

        assert_eq!(
            vault.move_to_debris_at(&fs, &local(&victim), fixed_now()),
            DebrisOutcome::Moved
        );
        assert!(!victim.exists());
        assert!(debris_root.join("2026-03-14").join("victim.txt").exists());
    }

    #[test]
    fn test_collision_falls_back_to_suffixed_bucket() {
        let dir = TempDir::new().unwrap();
        let debris_root = dir.path().join(".debris");
        let vault = DebrisVault::new(local(&debris_root));
        let fs = StdFsAdapter::new();

        for round in 0..3 {
            let victim = dir.path().join("same-name.txt");
            std::fs::write(&victim, format!("round {round}")).unwrap();
            assert_eq!(
                vault.move_to_debris_at(&fs, &local(&victim), fixed_now()),
                DebrisOutcome::Moved
            );
        }

        let day = debris_root.join("2026-03-14");
        assert!(day.join("same-name.txt").exists());
        assert!(day.join("15.09.26.00").join("same-name.txt").exists());
        assert!(day.join("15.09.26.01").join("same-name.txt").exists());
    }

    #[test]
    fn test_moves_folders_with_contents() {
        let dir = TempDir::new().unwrap();
        let folder = dir.path().join("folder");
        std::fs::create_dir(&folder).unwrap();
        std::fs::write(folder.join("inner.txt"), b"x").unwrap();

        let debris_root = dir.path().join(".debris");
        let vault = DebrisVault::new(local(&debris_root));
        let fs = StdFsAdapter::new();

        assert_eq!(
            vault.move_to_debris_at(&fs, &local(&folder), fixed_now()),
            DebrisOutcome::Moved
        );
        assert!(debris_root
            .join("2026-03-14")
            .join("folder")
            .join("inner.txt")
            .exists());
    }

    #[test]
    fn test_missing_source_gives_up() {
        let dir = TempDir::new().unwrap();
        let vault = DebrisVault::new(local(&dir.path().join(".debris")));
        let fs = StdFsAdapter::new();

        let ghost = dir.path().join("never-existed.txt");
        assert_eq!(
            vault.move_to_debris_at(&fs, &local(&ghost), fixed_now()),
            DebrisOutcome::Exhausted
        );
    }
}
