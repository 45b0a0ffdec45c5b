//! Error types for the backup engine.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Live datastore not found: {}", .0.display())]
    SourceMissing(PathBuf),

    #[error("Backup not found: {0}")]
    ArtifactMissing(String),

    #[error("Invalid backup configuration: {0}")]
    ConfigInvalid(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Settings store error: {0}")]
    Settings(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl BackupError {
    /// Whether this error belongs to the I/O failure class (copy, delete, archive).
    pub fn is_io_failure(&self) -> bool {
        matches!(self, BackupError::Io(_) | BackupError::Archive(_))
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
