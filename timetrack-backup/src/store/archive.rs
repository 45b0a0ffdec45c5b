//! ZIP packaging of the backup directory.
//!
//! Archives are flat: one entry per artifact, named exactly like the file.
//! Each entry carries the artifact's mtime, which retention depends on, and
//! unpacking puts it back on the extracted file.

use super::artifact::{is_plain_name, Artifact, ArtifactKind};
use crate::Result;
use chrono::{DateTime, Datelike, Local, NaiveDate, TimeZone, Timelike};
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::Path;
use std::time::SystemTime;
use tracing::{debug, info, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Write `artifacts` (all living in `backup_dir`) into a new archive at `dest`.
pub fn pack(backup_dir: &Path, artifacts: &[Artifact], dest: &Path) -> Result<usize> {
    let file = File::create(dest)?;
    let mut writer = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for artifact in artifacts {
        let mut source = BufReader::new(File::open(backup_dir.join(&artifact.name))?);
        let entry_options = match entry_time(artifact.modified_at) {
            Some(time) => options.last_modified_time(time),
            None => options,
        };
        writer.start_file(artifact.name.as_str(), entry_options)?;
        io::copy(&mut source, &mut writer)?;
    }

    writer.finish()?.flush()?;
    info!(
        archive = %dest.display(),
        entries = artifacts.len(),
        "Packed backup archive"
    );
    Ok(artifacts.len())
}

/// Extract artifact entries from the archive at `src` into `backup_dir`.
///
/// Entries that are not plain artifact names are skipped, as are entries whose
/// name already exists in `backup_dir`. Returns the number of files written.
pub fn unpack(src: &Path, backup_dir: &Path) -> Result<usize> {
    let file = File::open(src)?;
    let mut archive = ZipArchive::new(BufReader::new(file))?;
    fs::create_dir_all(backup_dir)?;

    let mut written = 0;
    for index in 0..archive.len() {
        let mut entry = archive.by_index(index)?;
        let name = entry.name().to_string();

        if entry.is_dir() || !is_plain_name(&name) || ArtifactKind::from_name(&name).is_none() {
            warn!(entry = %name, "Skipping archive entry that is not a backup file");
            continue;
        }

        let target = backup_dir.join(&name);
        if target.exists() {
            warn!(entry = %name, "Skipping archive entry, a backup with this name already exists");
            continue;
        }

        let modified = entry.last_modified().and_then(file_time);
        let mut out = BufWriter::new(File::create(&target)?);
        io::copy(&mut entry, &mut out)?;
        out.flush()?;
        match modified {
            Some(modified) => out.get_ref().set_modified(modified)?,
            None => debug!(entry = %name, "Archive entry has no timestamp, keeping extraction time"),
        }
        written += 1;
    }

    info!(archive = %src.display(), written, "Unpacked backup archive");
    Ok(written)
}

/// ZIP timestamps are local wall-clock time with two-second resolution and
/// cannot represent anything before 1980.
fn entry_time(at: DateTime<Local>) -> Option<zip::DateTime> {
    let year = u16::try_from(at.year()).ok()?;
    zip::DateTime::from_date_and_time(
        year,
        at.month() as u8,
        at.day() as u8,
        at.hour() as u8,
        at.minute() as u8,
        at.second() as u8,
    )
    .ok()
}

/// `None` for entries written without a timestamp, which carry the format's
/// 1980-01-01 00:00:00 placeholder.
fn file_time(time: zip::DateTime) -> Option<SystemTime> {
    let placeholder = time.year() == 1980
        && time.month() == 1
        && time.day() == 1
        && time.hour() == 0
        && time.minute() == 0
        && time.second() == 0;
    if placeholder {
        return None;
    }

    let naive = NaiveDate::from_ymd_opt(time.year().into(), time.month().into(), time.day().into())?
        .and_hms_opt(time.hour().into(), time.minute().into(), time.second().into())?;
    let local = Local.from_local_datetime(&naive).earliest()?;
    Some(SystemTime::from(local))
}
