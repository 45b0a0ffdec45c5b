//! Backup engine for the time-tracking datastore.
//!
//! Snapshots the live database file into a backup directory, prunes automatic
//! snapshots with a daily/weekly/monthly retention policy and runs them on a
//! wall-clock schedule with missed-run catch-up.

pub mod retention;
pub mod scheduler;
pub mod service;
pub mod settings;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use scheduler::{Clock, ScheduleTime, SchedulerState, SchedulerStatus, SystemClock};
pub use service::{ArtifactSummary, BackupService, RestoreResult};
pub use settings::{MemorySettings, RetentionConfig, SettingsStore};
pub use store::{Artifact, ArtifactKind, ArtifactStore};
pub use utils::errors::{BackupError, Result};
