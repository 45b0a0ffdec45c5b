//! The backup API offered to the application shell.
//!
//! [`BackupService`] wires the store, the settings and the scheduler together.
//! Every call except `start`/`stop`/`restart` is synchronous file I/O and
//! reports failures to the caller; only the scheduler swallows errors.

use crate::scheduler::{run_automatic_pass, Clock, Scheduler, SchedulerStatus, SystemClock};
use crate::settings::{BackupSettings, ConfigProvider, RetentionConfig, SettingsStore};
use crate::store::{Artifact, ArtifactKind, ArtifactStore};
use crate::Result;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// One row of the backup list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSummary {
    pub name: String,
    pub kind: ArtifactKind,
    pub date: DateTime<Local>,
    pub size: u64,
}

impl From<Artifact> for ArtifactSummary {
    fn from(artifact: Artifact) -> Self {
        Self {
            name: artifact.name,
            kind: artifact.kind,
            date: artifact.modified_at,
            size: artifact.size_bytes,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResult {
    pub success: bool,
    pub safety_artifact_name: Option<String>,
}

pub struct BackupService {
    store: Arc<ArtifactStore>,
    settings: BackupSettings,
    clock: Arc<dyn Clock>,
    scheduler: Scheduler,
}

impl BackupService {
    pub fn new(
        live_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self::with_clock(live_path, backup_dir, settings, Arc::new(SystemClock))
    }

    pub fn with_clock(
        live_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        settings: Arc<dyn SettingsStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let store = Arc::new(ArtifactStore::with_clock(live_path, backup_dir, clock.clone()));
        let settings = BackupSettings::new(settings);
        let scheduler = Scheduler::new(store.clone(), Arc::new(settings.clone()), clock.clone());
        Self {
            store,
            settings,
            clock,
            scheduler,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    // ── Configuration ──

    pub fn get_config(&self) -> Result<RetentionConfig> {
        self.settings.retention_config()
    }

    /// Validate and persist `config`, then re-arm the scheduler.
    pub fn set_config(&self, config: RetentionConfig) -> Result<RetentionConfig> {
        let saved = self.settings.save_config(config)?;
        self.scheduler.restart();
        Ok(saved)
    }

    pub fn last_auto_backup(&self) -> Result<Option<DateTime<Local>>> {
        self.settings.last_auto_backup()
    }

    // ── Snapshots ──

    /// Automatic snapshot plus retention cleanup, on demand.
    pub fn create_automatic(&self) -> Result<String> {
        let pass = run_automatic_pass(&self.store, &self.settings, self.clock.as_ref())?;
        Ok(pass.artifact.name)
    }

    pub fn create_manual(&self) -> Result<String> {
        Ok(self.store.snapshot(ArtifactKind::Manual)?.name)
    }

    pub fn list_artifacts(&self) -> Result<Vec<ArtifactSummary>> {
        Ok(self
            .store
            .list_artifacts()?
            .into_iter()
            .map(ArtifactSummary::from)
            .collect())
    }

    pub fn restore(&self, name: &str) -> Result<RestoreResult> {
        let outcome = self.store.restore(name)?;
        Ok(RestoreResult {
            success: true,
            safety_artifact_name: outcome.safety_artifact_name,
        })
    }

    pub fn delete_artifacts<S: AsRef<str>>(&self, names: &[S]) -> usize {
        self.store.delete_artifacts(names)
    }

    // ── Files outside the backup directory ──

    pub fn download_artifact(&self, name: &str, dest: &Path) -> Result<()> {
        self.store.download_artifact(name, dest)
    }

    pub fn export_live(&self, dest: &Path) -> Result<()> {
        self.store.export_to(dest)
    }

    pub fn import_live(&self, src: &Path) -> Result<()> {
        self.store.import_from(src)
    }

    pub fn pack_archive(&self, dest: &Path) -> Result<usize> {
        self.store.pack_archive(dest)
    }

    pub fn unpack_archive(&self, src: &Path) -> Result<usize> {
        self.store.unpack_archive(src)
    }

    // ── Scheduler lifecycle ──

    pub async fn start(&self) {
        self.scheduler.start().await;
    }

    pub fn stop(&self) {
        self.scheduler.stop();
    }

    pub fn restart(&self) {
        self.scheduler.restart();
    }

    pub fn scheduler_status(&self) -> SchedulerStatus {
        self.scheduler.status()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SchedulerState;
    use crate::settings::MemorySettings;
    use crate::BackupError;
    use chrono::TimeZone;
    use std::fs;
    use tempfile::TempDir;

    struct FixedClock(DateTime<Local>);

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Local> {
            self.0
        }
    }

    fn at(h: u32, min: u32) -> DateTime<Local> {
        Local.with_ymd_and_hms(2026, 10, 18, h, min, 0).unwrap()
    }

    fn service() -> (TempDir, BackupService) {
        let temp_dir = TempDir::new().unwrap();
        let live = temp_dir.path().join("timetrack.db");
        fs::write(&live, b"v1").unwrap();
        let service = BackupService::with_clock(
            live,
            temp_dir.path().join("backups"),
            Arc::new(MemorySettings::new()),
            Arc::new(FixedClock(at(8, 0))),
        );
        (temp_dir, service)
    }

    #[test]
    fn test_manual_backup_then_restore() -> Result<()> {
        let (temp_dir, service) = service();

        let name = service.create_manual()?;
        fs::write(temp_dir.path().join("timetrack.db"), b"v2")?;
        let result = service.restore(&name)?;

        assert!(result.success);
        assert_eq!(
            result.safety_artifact_name.as_deref(),
            Some("safety_2026-10-18_08-00-00.db")
        );
        assert_eq!(fs::read(temp_dir.path().join("timetrack.db"))?, b"v1");

        let kinds: Vec<ArtifactKind> = service.list_artifacts()?.into_iter().map(|a| a.kind).collect();
        assert_eq!(kinds.len(), 2);
        assert!(kinds.contains(&ArtifactKind::Manual));
        assert!(kinds.contains(&ArtifactKind::Safety));
        Ok(())
    }

    #[test]
    fn test_create_automatic_records_bookmark() -> Result<()> {
        let (_temp_dir, service) = service();

        let name = service.create_automatic()?;

        assert_eq!(name, "automatic_2026-10-18_08-00-00.db");
        assert_eq!(service.last_auto_backup()?, Some(at(8, 0)));
        Ok(())
    }

    #[test]
    fn test_user_operations_propagate_errors() {
        let (temp_dir, service) = service();
        fs::remove_file(temp_dir.path().join("timetrack.db")).unwrap();

        assert!(matches!(
            service.create_manual().unwrap_err(),
            BackupError::SourceMissing(_)
        ));
        assert!(matches!(
            service.restore("manual_2026-01-01_00-00-00.db").unwrap_err(),
            BackupError::ArtifactMissing(_)
        ));
        assert!(matches!(
            service.export_live(&temp_dir.path().join("out.db")).unwrap_err(),
            BackupError::SourceMissing(_)
        ));
    }

    #[test]
    fn test_set_config_rejects_invalid_values() {
        let (_temp_dir, service) = service();
        let err = service
            .set_config(RetentionConfig {
                max_weekly: 0,
                ..RetentionConfig::default()
            })
            .unwrap_err();
        assert!(matches!(err, BackupError::ConfigInvalid(_)));
        assert_eq!(service.get_config().unwrap(), RetentionConfig::default());
    }

    #[tokio::test]
    async fn test_set_config_rearms_running_scheduler() -> Result<()> {
        let (_temp_dir, service) = service();
        service.start().await;
        assert_eq!(service.scheduler_status().next_run, Some(at(12, 0)));

        service.set_config(RetentionConfig {
            schedule_times: vec!["09:15".parse().unwrap(), "17:45".parse().unwrap()],
            ..RetentionConfig::default()
        })?;

        let status = service.scheduler_status();
        assert_eq!(status.state, SchedulerState::Armed);
        assert_eq!(status.next_run, Some(at(9, 15)));

        service.stop();
        assert_eq!(service.scheduler_status().state, SchedulerState::Idle);
        Ok(())
    }

    #[test]
    fn test_archive_round_trip_through_service() -> Result<()> {
        let (temp_dir, service) = service();
        service.create_manual()?;
        let archive = temp_dir.path().join("all.zip");

        assert_eq!(service.pack_archive(&archive)?, 1);
        // Everything is already present, so nothing is written.
        assert_eq!(service.unpack_archive(&archive)?, 0);
        Ok(())
    }
}
