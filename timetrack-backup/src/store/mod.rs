//! Artifact store: every file operation on the live datastore and the backup
//! directory goes through here.
//!
//! Operations are synchronous. Callers obtain a [`StoreGuard`] with
//! [`ArtifactStore::lock`] and perform their operations through it; the guard
//! holds the store's single operation lock, so a scheduled pass and a
//! user-initiated restore can never interleave. The convenience methods on
//! [`ArtifactStore`] each take the lock for exactly one operation.

pub mod archive;
pub mod artifact;

pub use artifact::{Artifact, ArtifactKind};

use crate::scheduler::{Clock, SystemClock};
use crate::{BackupError, Result};
use artifact::{artifact_name, is_plain_name, sort_newest_first};
use chrono::{DateTime, Local};
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info, warn};

/// Extension used for artifacts when the live datastore has none.
const DEFAULT_EXTENSION: &str = "db";

/// Result of a successful restore.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreOutcome {
    /// Snapshot of the datastore as it was right before the restore; `None`
    /// when there was no datastore to save.
    pub safety_artifact_name: Option<String>,
}

pub struct ArtifactStore {
    live_path: PathBuf,
    backup_dir: PathBuf,
    extension: String,
    clock: Arc<dyn Clock>,
    op_lock: Mutex<()>,
}

impl ArtifactStore {
    pub fn new(live_path: impl Into<PathBuf>, backup_dir: impl Into<PathBuf>) -> Self {
        Self::with_clock(live_path, backup_dir, Arc::new(SystemClock))
    }

    /// Artifact names are stamped with `clock`'s time.
    pub fn with_clock(
        live_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let live_path = live_path.into();
        let extension = live_path
            .extension()
            .and_then(|e| e.to_str())
            .filter(|e| !e.is_empty())
            .unwrap_or(DEFAULT_EXTENSION)
            .to_string();

        Self {
            live_path,
            backup_dir: backup_dir.into(),
            extension,
            clock,
            op_lock: Mutex::new(()),
        }
    }

    pub fn live_path(&self) -> &Path {
        &self.live_path
    }

    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    /// Acquire exclusive access to the datastore and the backup directory.
    pub fn lock(&self) -> StoreGuard<'_> {
        // The lock protects no data of its own, so a poisoned lock is still usable.
        let held = self.op_lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        StoreGuard { store: self, _held: held }
    }

    pub fn snapshot(&self, kind: ArtifactKind) -> Result<Artifact> {
        self.lock().snapshot(kind)
    }

    pub fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        self.lock().list_artifacts()
    }

    pub fn delete_artifacts<S: AsRef<str>>(&self, names: &[S]) -> usize {
        self.lock().delete_artifacts(names)
    }

    pub fn restore(&self, name: &str) -> Result<RestoreOutcome> {
        self.lock().restore(name)
    }

    pub fn export_to(&self, dest: &Path) -> Result<()> {
        self.lock().export_to(dest)
    }

    pub fn import_from(&self, src: &Path) -> Result<()> {
        self.lock().import_from(src)
    }

    pub fn download_artifact(&self, name: &str, dest: &Path) -> Result<()> {
        self.lock().download_artifact(name, dest)
    }

    pub fn pack_archive(&self, dest: &Path) -> Result<usize> {
        self.lock().pack_archive(dest)
    }

    pub fn unpack_archive(&self, src: &Path) -> Result<usize> {
        self.lock().unpack_archive(src)
    }
}

/// Exclusive handle on the store. Dropping it releases the operation lock.
pub struct StoreGuard<'a> {
    store: &'a ArtifactStore,
    _held: MutexGuard<'a, ()>,
}

impl StoreGuard<'_> {
    /// Copy the live datastore into a new artifact of `kind`.
    pub fn snapshot(&self, kind: ArtifactKind) -> Result<Artifact> {
        self.snapshot_at(kind, self.store.clock.now())
    }

    /// Like [`StoreGuard::snapshot`], naming the artifact after `taken_at`.
    pub fn snapshot_at(&self, kind: ArtifactKind, taken_at: DateTime<Local>) -> Result<Artifact> {
        let store = self.store;
        if !store.live_path.is_file() {
            return Err(BackupError::SourceMissing(store.live_path.clone()));
        }

        fs::create_dir_all(&store.backup_dir)?;
        let name = artifact_name(kind, taken_at, &store.extension);
        let dest = store.backup_dir.join(&name);
        copy_durable(&store.live_path, &dest)?;

        let artifact = Artifact::from_path(&dest)?.ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                format!("snapshot {name} is not a regular file"),
            )
        })?;
        info!(artifact = %artifact.name, kind = %kind, size = artifact.size_bytes, "Created backup");
        Ok(artifact)
    }

    /// All artifacts in the backup directory, newest first.
    pub fn list_artifacts(&self) -> Result<Vec<Artifact>> {
        let entries = match fs::read_dir(&self.store.backup_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut artifacts = Vec::new();
        for entry in entries {
            let entry = entry?;
            match Artifact::from_path(&entry.path()) {
                Ok(Some(artifact)) => artifacts.push(artifact),
                Ok(None) => {}
                // Removed between read_dir and stat.
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        sort_newest_first(&mut artifacts);
        Ok(artifacts)
    }

    /// Best-effort removal. Returns how many files were actually removed.
    pub fn delete_artifacts<S: AsRef<str>>(&self, names: &[S]) -> usize {
        let mut removed = 0;
        for name in names.iter().map(AsRef::as_ref) {
            if !is_plain_name(name) || ArtifactKind::from_name(name).is_none() {
                warn!(artifact = %name, "Refusing to delete a file that is not a backup");
                continue;
            }

            match fs::remove_file(self.store.backup_dir.join(name)) {
                Ok(()) => {
                    info!(artifact = %name, "Deleted backup");
                    removed += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!(artifact = %name, "Backup already gone");
                }
                Err(e) => {
                    warn!(artifact = %name, error = %e, "Failed to delete backup, skipping");
                }
            }
        }
        removed
    }

    /// Replace the live datastore with the named artifact.
    ///
    /// A safety snapshot of the current datastore is written and synced before
    /// the live file is touched. A missing datastore has nothing to save, so
    /// the artifact is copied into place without one.
    pub fn restore(&self, name: &str) -> Result<RestoreOutcome> {
        let source = self.artifact_path(name)?;
        let live = &self.store.live_path;

        let safety = if live.is_file() {
            Some(self.snapshot(ArtifactKind::Safety)?.name)
        } else {
            warn!(live = %live.display(), "Datastore missing, restoring without a safety backup");
            if let Some(parent) = live.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            None
        };
        copy_durable(&source, live)?;

        info!(
            artifact = %name,
            safety = safety.as_deref().unwrap_or("none"),
            "Restored datastore from backup"
        );
        Ok(RestoreOutcome {
            safety_artifact_name: safety,
        })
    }

    pub fn export_to(&self, dest: &Path) -> Result<()> {
        let live = &self.store.live_path;
        if !live.is_file() {
            return Err(BackupError::SourceMissing(live.clone()));
        }
        copy_durable(live, dest)?;
        info!(dest = %dest.display(), "Exported datastore");
        Ok(())
    }

    pub fn import_from(&self, src: &Path) -> Result<()> {
        if !src.is_file() {
            return Err(BackupError::SourceMissing(src.to_path_buf()));
        }
        copy_durable(src, &self.store.live_path)?;
        info!(src = %src.display(), "Imported datastore");
        Ok(())
    }

    pub fn download_artifact(&self, name: &str, dest: &Path) -> Result<()> {
        let source = self.artifact_path(name)?;
        copy_durable(&source, dest)?;
        info!(artifact = %name, dest = %dest.display(), "Copied backup out");
        Ok(())
    }

    pub fn pack_archive(&self, dest: &Path) -> Result<usize> {
        let artifacts = self.list_artifacts()?;
        archive::pack(&self.store.backup_dir, &artifacts, dest)
    }

    pub fn unpack_archive(&self, src: &Path) -> Result<usize> {
        if !src.is_file() {
            return Err(BackupError::SourceMissing(src.to_path_buf()));
        }
        archive::unpack(src, &self.store.backup_dir)
    }

    fn artifact_path(&self, name: &str) -> Result<PathBuf> {
        if !is_plain_name(name) || ArtifactKind::from_name(name).is_none() {
            return Err(BackupError::ArtifactMissing(name.to_string()));
        }
        let path = self.store.backup_dir.join(name);
        if !path.is_file() {
            return Err(BackupError::ArtifactMissing(name.to_string()));
        }
        Ok(path)
    }
}

/// Copy `src` to `dest` and flush the copy to disk before returning.
fn copy_durable(src: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(src, dest)?;
    File::options().write(true).open(dest)?.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    fn fixture() -> io::Result<(TempDir, ArtifactStore)> {
        let temp_dir = TempDir::new()?;
        let live = temp_dir.path().join("timetrack.db");
        fs::write(&live, b"live-v1")?;
        let store = ArtifactStore::new(live, temp_dir.path().join("backups"));
        Ok((temp_dir, store))
    }

    fn place(store: &ArtifactStore, name: &str, age: Duration) -> io::Result<()> {
        fs::create_dir_all(store.backup_dir())?;
        let path = store.backup_dir().join(name);
        fs::write(&path, name.as_bytes())?;
        File::options()
            .write(true)
            .open(&path)?
            .set_modified(SystemTime::now() - age)
    }

    #[test]
    fn test_snapshot_creates_directory_and_copy() -> Result<()> {
        let (_temp_dir, store) = fixture()?;

        let artifact = store.snapshot(ArtifactKind::Manual)?;

        assert_eq!(artifact.kind, ArtifactKind::Manual);
        assert!(artifact.name.starts_with("manual_"));
        assert!(artifact.name.ends_with(".db"));
        assert_eq!(artifact.size_bytes, 7);
        assert_eq!(fs::read(store.backup_dir().join(&artifact.name))?, b"live-v1");
        Ok(())
    }

    #[test]
    fn test_snapshot_without_live_file() -> Result<()> {
        let (_temp_dir, store) = fixture()?;
        fs::remove_file(store.live_path())?;

        let err = store.snapshot(ArtifactKind::Automatic).unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
        assert!(!store.backup_dir().exists());
        Ok(())
    }

    #[test]
    fn test_extension_defaults_to_db() {
        let store = ArtifactStore::new("/data/timetrack", "/data/backups");
        assert_eq!(store.extension, "db");
        let store = ArtifactStore::new("/data/timetrack.sqlite", "/data/backups");
        assert_eq!(store.extension, "sqlite");
    }

    #[test]
    fn test_list_newest_first_and_ignores_foreign_files() -> Result<()> {
        let (_temp_dir, store) = fixture()?;
        assert!(store.list_artifacts()?.is_empty());

        place(&store, "automatic_2026-10-10_12-00-00.db", Duration::from_secs(3 * 3600))?;
        place(&store, "manual_2026-10-10_13-00-00.db", Duration::from_secs(2 * 3600))?;
        place(&store, "safety_2026-10-10_14-00-00.db", Duration::from_secs(3600))?;
        fs::write(store.backup_dir().join("notes.txt"), b"not a backup")?;
        fs::create_dir(store.backup_dir().join("manual_dir"))?;

        let names: Vec<String> = store
            .list_artifacts()?
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(
            names,
            vec![
                "safety_2026-10-10_14-00-00.db",
                "manual_2026-10-10_13-00-00.db",
                "automatic_2026-10-10_12-00-00.db",
            ]
        );
        Ok(())
    }

    #[test]
    fn test_delete_is_best_effort() -> Result<()> {
        let (_temp_dir, store) = fixture()?;
        place(&store, "automatic_2026-10-10_12-00-00.db", Duration::ZERO)?;
        fs::write(store.backup_dir().join("notes.txt"), b"keep me")?;

        let removed = store.delete_artifacts(&[
            "automatic_2026-10-10_12-00-00.db",
            "automatic_2026-10-09_12-00-00.db",
            "notes.txt",
            "../timetrack.db",
        ]);

        assert_eq!(removed, 1);
        assert!(store.backup_dir().join("notes.txt").exists());
        assert!(store.live_path().exists());
        assert!(store.list_artifacts()?.is_empty());
        Ok(())
    }

    #[test]
    fn test_restore_takes_safety_copy_first() -> Result<()> {
        let (_temp_dir, store) = fixture()?;
        let backup = store.snapshot(ArtifactKind::Manual)?;
        fs::write(store.live_path(), b"live-v2")?;

        let before_restore = SystemTime::now();
        let outcome = store.restore(&backup.name)?;

        assert_eq!(fs::read(store.live_path())?, b"live-v1");
        let safety_name = outcome.safety_artifact_name.expect("safety backup");
        let safety_path = store.backup_dir().join(&safety_name);
        assert_eq!(fs::read(&safety_path)?, b"live-v2");

        let safeties: Vec<Artifact> = store
            .list_artifacts()?
            .into_iter()
            .filter(|a| a.kind == ArtifactKind::Safety)
            .collect();
        assert_eq!(safeties.len(), 1);
        assert_eq!(safeties[0].name, safety_name);
        let live_modified = fs::metadata(store.live_path())?.modified()?;
        assert!(fs::metadata(&safety_path)?.modified()? <= live_modified);
        assert!(fs::metadata(&safety_path)?.modified()? + Duration::from_secs(1) >= before_restore);
        Ok(())
    }

    #[test]
    fn test_restore_recreates_missing_datastore() -> Result<()> {
        let (_temp_dir, store) = fixture()?;
        let backup = store.snapshot(ArtifactKind::Manual)?;
        fs::remove_file(store.live_path())?;

        let outcome = store.restore(&backup.name)?;

        assert_eq!(outcome.safety_artifact_name, None);
        assert_eq!(fs::read(store.live_path())?, b"live-v1");
        assert!(store
            .list_artifacts()?
            .iter()
            .all(|a| a.kind != ArtifactKind::Safety));
        Ok(())
    }

    #[test]
    fn test_restore_missing_artifact_touches_nothing() -> Result<()> {
        let (_temp_dir, store) = fixture()?;

        let err = store.restore("manual_2001-01-01_00-00-00.db").unwrap_err();
        assert!(matches!(err, BackupError::ArtifactMissing(_)));

        let err = store.restore("../timetrack.db").unwrap_err();
        assert!(matches!(err, BackupError::ArtifactMissing(_)));

        assert!(store.list_artifacts()?.is_empty());
        assert_eq!(fs::read(store.live_path())?, b"live-v1");
        Ok(())
    }

    #[test]
    fn test_export_and_import() -> Result<()> {
        let (temp_dir, store) = fixture()?;
        let exported = temp_dir.path().join("export.db");

        store.export_to(&exported)?;
        assert_eq!(fs::read(&exported)?, b"live-v1");

        let incoming = temp_dir.path().join("incoming.db");
        fs::write(&incoming, b"from-elsewhere")?;
        store.import_from(&incoming)?;
        assert_eq!(fs::read(store.live_path())?, b"from-elsewhere");

        let err = store
            .import_from(&temp_dir.path().join("missing.db"))
            .unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
        Ok(())
    }

    #[test]
    fn test_download_artifact() -> Result<()> {
        let (temp_dir, store) = fixture()?;
        let backup = store.snapshot(ArtifactKind::Manual)?;
        let dest = temp_dir.path().join("copy.db");

        store.download_artifact(&backup.name, &dest)?;
        assert_eq!(fs::read(&dest)?, b"live-v1");

        let err = store
            .download_artifact("manual_1999-01-01_00-00-00.db", &dest)
            .unwrap_err();
        assert!(matches!(err, BackupError::ArtifactMissing(_)));
        Ok(())
    }

    #[test]
    fn test_pack_then_unpack_into_empty_directory() -> Result<()> {
        let (temp_dir, store) = fixture()?;
        place(&store, "automatic_2026-10-10_12-00-00.db", Duration::from_secs(60))?;
        place(&store, "manual_2026-10-11_12-00-00.db", Duration::ZERO)?;
        let archive_path = temp_dir.path().join("backups.zip");

        assert_eq!(store.pack_archive(&archive_path)?, 2);

        let other = ArtifactStore::new(store.live_path(), temp_dir.path().join("restored"));
        assert_eq!(other.unpack_archive(&archive_path)?, 2);
        assert_eq!(
            fs::read(other.backup_dir().join("manual_2026-10-11_12-00-00.db"))?,
            b"manual_2026-10-11_12-00-00.db"
        );
        Ok(())
    }

    #[test]
    fn test_archive_round_trip_keeps_retention_history() -> Result<()> {
        use crate::retention::{plan, RetentionLimits};
        use chrono::TimeZone;

        let (temp_dir, store) = fixture()?;
        let limits = RetentionLimits {
            max_daily: 7,
            max_weekly: 4,
            max_monthly: 12,
            weekly_day: 0,
        };
        for (name, month, day) in [
            ("automatic_a.db", 7, 5),
            ("automatic_b.db", 8, 9),
            ("automatic_c.db", 9, 13),
        ] {
            let at = Local
                .with_ymd_and_hms(2026, month, day, 12, 30, 10)
                .earliest()
                .expect("valid local time");
            fs::create_dir_all(store.backup_dir())?;
            let path = store.backup_dir().join(name);
            fs::write(&path, name.as_bytes())?;
            File::options()
                .write(true)
                .open(&path)?
                .set_modified(SystemTime::from(at))?;
        }
        let before = store.list_artifacts()?;
        let archive_path = temp_dir.path().join("history.zip");
        store.pack_archive(&archive_path)?;

        let other = ArtifactStore::new(store.live_path(), temp_dir.path().join("imported"));
        assert_eq!(other.unpack_archive(&archive_path)?, 3);
        let after = other.list_artifacts()?;

        let stamps = |artifacts: &[Artifact]| -> Vec<(String, chrono::DateTime<Local>)> {
            artifacts
                .iter()
                .map(|a| (a.name.clone(), a.modified_at))
                .collect()
        };
        assert_eq!(stamps(&after), stamps(&before));
        assert_eq!(plan(&after, &limits).prune, plan(&before, &limits).prune);
        assert!(plan(&after, &limits).prune.is_empty());
        Ok(())
    }

    #[test]
    fn test_held_guard_blocks_other_operations() -> Result<()> {
        use std::sync::mpsc;

        let (temp_dir, store) = fixture()?;
        let backup = store.snapshot(ArtifactKind::Manual)?;
        let archive_path = temp_dir.path().join("backups.zip");
        store.pack_archive(&archive_path)?;

        let (done_tx, done_rx) = mpsc::channel();
        std::thread::scope(|scope| -> Result<()> {
            let guard = store.lock();

            let shared = &store;
            let tx = done_tx.clone();
            scope.spawn(move || {
                let _ = shared.snapshot(ArtifactKind::Manual);
                let _ = tx.send("snapshot");
            });
            let (tx, name) = (done_tx.clone(), backup.name.clone());
            scope.spawn(move || {
                let _ = shared.restore(&name);
                let _ = tx.send("restore");
            });
            let (tx, archive) = (done_tx.clone(), archive_path.clone());
            scope.spawn(move || {
                let _ = shared.unpack_archive(&archive);
                let _ = tx.send("unpack");
            });

            assert!(done_rx.recv_timeout(Duration::from_millis(300)).is_err());
            // The holder itself can still work through its guard.
            guard.list_artifacts()?;
            drop(guard);

            let mut finished: Vec<&str> = (0..3)
                .map(|_| done_rx.recv_timeout(Duration::from_secs(10)).expect("operation finished"))
                .collect();
            finished.sort();
            assert_eq!(finished, ["restore", "snapshot", "unpack"]);
            Ok(())
        })
    }

    #[test]
    fn test_unpack_skips_collisions_and_foreign_entries() -> Result<()> {
        let (temp_dir, store) = fixture()?;
        place(&store, "manual_2026-10-11_12-00-00.db", Duration::ZERO)?;

        let archive_path = temp_dir.path().join("mixed.zip");
        {
            let mut writer = zip::ZipWriter::new(File::create(&archive_path)?);
            let options = zip::write::SimpleFileOptions::default();
            for (name, body) in [
                ("manual_2026-10-11_12-00-00.db", "from-archive"),
                ("automatic_2026-10-01_12-00-00.db", "new"),
                ("../escape_2026.db", "nope"),
                ("nested/manual_2026-10-02_12-00-00.db", "nope"),
                ("readme.txt", "nope"),
            ] {
                writer.start_file(name, options)?;
                writer.write_all(body.as_bytes())?;
            }
            writer.finish()?;
        }

        assert_eq!(store.unpack_archive(&archive_path)?, 1);
        assert_eq!(
            fs::read(store.backup_dir().join("manual_2026-10-11_12-00-00.db"))?,
            b"manual_2026-10-11_12-00-00.db"
        );
        assert_eq!(
            fs::read(store.backup_dir().join("automatic_2026-10-01_12-00-00.db"))?,
            b"new"
        );
        assert!(!store.backup_dir().join("readme.txt").exists());
        assert!(!temp_dir.path().join("escape_2026.db").exists());
        Ok(())
    }

    #[test]
    fn test_unpack_missing_archive() -> Result<()> {
        let (temp_dir, store) = fixture()?;
        let err = store
            .unpack_archive(&temp_dir.path().join("nothing.zip"))
            .unwrap_err();
        assert!(matches!(err, BackupError::SourceMissing(_)));
        Ok(())
    }
}
