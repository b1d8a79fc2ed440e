//! Timestamped backups of configuration documents.
//!
//! Every backup of `<root>/<dir>/<name>.json` is written to
//! `<root>/<backup_dir>/<dir>/<name>-<YYYYMMDD_HHMMSS_ffffff>.json.bak`. Rotation keeps
//! the newest `max_backups` files per document, ordered by the timestamp embedded in
//! the file name rather than by file system metadata.

use crate::error::{HostError, HostResult};
use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S_%6f";
const BACKUP_SUFFIX: &str = ".bak";

/// Metadata about one backup file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupInfo {
    /// Location of the backup file
    pub path: PathBuf,
    /// Timestamp parsed from the file name
    pub created_at: DateTime<Utc>,
}

/// Where backups go and how many are kept.
#[derive(Debug, Clone)]
pub(crate) struct BackupPolicy {
    root: PathBuf,
    dir_name: String,
    max_backups: usize,
}

impl BackupPolicy {
    pub fn new(root: PathBuf, dir_name: String, max_backups: usize) -> Self {
        Self {
            root,
            dir_name,
            max_backups: max_backups.max(1),
        }
    }

    /// Directory holding the backups of `target`.
    pub fn dir_for(&self, target: &Path) -> PathBuf {
        let base = self.root.join(&self.dir_name);
        match target.strip_prefix(&self.root).ok().and_then(Path::parent) {
            Some(relative) => base.join(relative),
            None => base,
        }
    }

    /// Copies `target` to a new timestamped backup, then rotates.
    pub fn create(&self, target: &Path) -> HostResult<PathBuf> {
        if !target.exists() {
            return Err(HostError::NotFound(target.to_path_buf()));
        }
        let dir = self.dir_for(target);
        fs::create_dir_all(&dir).map_err(|e| HostError::io(&dir, e))?;

        let (stem, extension) = split_name(target);
        let mut stamp = Utc::now();
        let mut backup = dir.join(backup_name(&stem, &extension, stamp));
        // Two backups within the same microsecond must not overwrite each other.
        while backup.exists() {
            stamp += ChronoDuration::microseconds(1);
            backup = dir.join(backup_name(&stem, &extension, stamp));
        }

        fs::copy(target, &backup).map_err(|e| HostError::io(&backup, e))?;
        tracing::debug!(
            target = %target.display(),
            backup = %backup.display(),
            "Created configuration backup"
        );

        self.rotate(target)?;
        Ok(backup)
    }

    /// Backups of `target`, newest first.
    pub fn list(&self, target: &Path) -> HostResult<Vec<BackupInfo>> {
        let dir = self.dir_for(target);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let (stem, extension) = split_name(target);

        let mut backups = Vec::new();
        for entry in fs::read_dir(&dir).map_err(|e| HostError::io(&dir, e))? {
            let entry = entry.map_err(|e| HostError::io(&dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(created_at) = parse_backup_name(name, &stem, &extension) {
                backups.push(BackupInfo { path, created_at });
            }
        }

        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }

    /// Deletes the oldest backups of `target` beyond the retention count.
    pub fn rotate(&self, target: &Path) -> HostResult<usize> {
        let backups = self.list(target)?;
        let mut removed = 0;
        for stale in backups.iter().skip(self.max_backups) {
            match fs::remove_file(&stale.path) {
                Ok(()) => removed += 1,
                Err(e) => tracing::warn!(
                    backup = %stale.path.display(),
                    error = %e,
                    "Failed to remove old backup"
                ),
            }
        }
        if removed > 0 {
            tracing::debug!(target = %target.display(), removed, "Rotated configuration backups");
        }
        Ok(removed)
    }
}

fn split_name(target: &Path) -> (String, String) {
    let stem = target
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let extension = target
        .extension()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "json".to_string());
    (stem, extension)
}

fn backup_name(stem: &str, extension: &str, stamp: DateTime<Utc>) -> String {
    format!(
        "{stem}-{}.{extension}{BACKUP_SUFFIX}",
        stamp.format(TIMESTAMP_FORMAT)
    )
}

fn parse_backup_name(name: &str, stem: &str, extension: &str) -> Option<DateTime<Utc>> {
    let rest = name.strip_prefix(stem)?.strip_prefix('-')?;
    let stamp = rest
        .strip_suffix(BACKUP_SUFFIX)?
        .strip_suffix(extension)?
        .strip_suffix('.')?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .map(|ndt| DateTime::<Utc>::from_naive_utc_and_offset(ndt, Utc))
        .ok()
}
