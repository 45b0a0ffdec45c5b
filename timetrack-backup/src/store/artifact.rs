//! Snapshot artifacts and their on-disk naming scheme.
//!
//! An artifact file is named `<kind>_<YYYY-MM-DD_HH-MM-SS>.<ext>`. The kind
//! prefix is the only metadata carried by the name; the creation time used for
//! ordering and retention is the file's mtime.

use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

/// Timestamp layout embedded in artifact names.
pub const NAME_TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Category of a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ArtifactKind {
    /// Taken by the scheduler; subject to retention.
    Automatic,
    /// Requested by the user; kept until deleted.
    Manual,
    /// Taken right before a restore overwrites the live datastore.
    Safety,
}

impl ArtifactKind {
    pub const ALL: [ArtifactKind; 3] = [
        ArtifactKind::Automatic,
        ArtifactKind::Manual,
        ArtifactKind::Safety,
    ];

    pub fn prefix(self) -> &'static str {
        match self {
            ArtifactKind::Automatic => "automatic",
            ArtifactKind::Manual => "manual",
            ArtifactKind::Safety => "safety",
        }
    }

    /// Recover the kind from an artifact file name.
    pub fn from_name(name: &str) -> Option<Self> {
        let (prefix, rest) = name.split_once('_')?;
        if rest.is_empty() {
            return None;
        }
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// One snapshot file in the backup directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub name: String,
    pub kind: ArtifactKind,
    pub modified_at: DateTime<Local>,
    pub size_bytes: u64,
}

impl Artifact {
    /// Build an artifact from a file in the backup directory.
    ///
    /// Returns `Ok(None)` for files that are not artifacts (unknown prefix,
    /// directories).
    pub fn from_path(path: &Path) -> std::io::Result<Option<Self>> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        let Some(kind) = ArtifactKind::from_name(name) else {
            return Ok(None);
        };

        let metadata = fs::metadata(path)?;
        if !metadata.is_file() {
            return Ok(None);
        }

        Ok(Some(Self {
            name: name.to_string(),
            kind,
            modified_at: DateTime::<Local>::from(metadata.modified()?),
            size_bytes: metadata.len(),
        }))
    }
}

/// Compose the file name for a new artifact.
pub fn artifact_name(kind: ArtifactKind, at: DateTime<Local>, extension: &str) -> String {
    format!(
        "{}_{}.{}",
        kind.prefix(),
        at.format(NAME_TIMESTAMP_FORMAT),
        extension
    )
}

/// A name is acceptable as an artifact reference only if it is a bare file
/// name inside the backup directory.
pub fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// Newest first; ties broken by name so ordering is total.
pub fn sort_newest_first(artifacts: &mut [Artifact]) {
    artifacts.sort_by(|a, b| {
        b.modified_at
            .cmp(&a.modified_at)
            .then_with(|| b.name.cmp(&a.name))
    });
}
