//! File-backed snapshot provider.

use super::{Snapshot, SnapshotProvider};
use crate::error::SnapshotError;
use crate::sources::TreeSource;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Versions already handed out or refused, keyed by modification time.
#[derive(Debug, Default)]
struct Versions {
    offered: Option<DateTime<Utc>>,
    rejected: Option<DateTime<Utc>>,
}

/// Serves snapshots of a single configuration file.
///
/// The file's modification time is the snapshot timestamp; a new time means
/// a new snapshot. A version that failed to load or was refused by the
/// service is not offered again. With a last-good path, every accepted file
/// is copied there and the copy is used when the file itself cannot be
/// loaded at startup.
///
/// Formats are detected from the extension: `.yaml`/`.yml`, `.toml`, `.json`.
#[derive(Debug)]
pub struct FileSnapshotProvider {
    path: PathBuf,
    last_good: Option<PathBuf>,
    versions: Mutex<Versions>,
}

impl FileSnapshotProvider {
    /// Serve snapshots of `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            last_good: None,
            versions: Mutex::new(Versions::default()),
        }
    }

    /// Keep a copy of the last accepted file at `path`.
    ///
    /// The copy must have the same extension as the watched file.
    pub fn with_last_good(mut self, path: impl Into<PathBuf>) -> Self {
        self.last_good = Some(path.into());
        self
    }

    /// The watched file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Where accepted files are copied, if anywhere.
    pub fn last_good_path(&self) -> Option<&Path> {
        self.last_good.as_deref()
    }

    fn location(path: &Path) -> String {
        path.display().to_string()
    }

    fn is_primary(&self, snapshot: &Snapshot) -> bool {
        snapshot.location() == Self::location(&self.path)
    }
}

fn modified(path: &Path) -> std::io::Result<DateTime<Utc>> {
    let modified = fs::metadata(path)?.modified()?;
    Ok(DateTime::<Utc>::from(modified))
}

fn load(path: &Path, timestamp: DateTime<Utc>) -> Result<Snapshot, String> {
    let source = TreeSource::builder()
        .with_file(path)
        .build()
        .map_err(|e| e.to_string())?;
    Ok(Snapshot::new(
        Arc::new(source),
        timestamp,
        FileSnapshotProvider::location(path),
    ))
}

fn load_current(path: &Path) -> Result<Snapshot, String> {
    let timestamp = modified(path).map_err(|e| e.to_string())?;
    load(path, timestamp)
}

impl SnapshotProvider for FileSnapshotProvider {
    fn retrieve_initial(&self) -> Result<Snapshot, SnapshotError> {
        let primary_error = match load_current(&self.path) {
            Ok(snapshot) => {
                self.versions.lock().offered = Some(snapshot.timestamp());
                return Ok(snapshot);
            }
            Err(reason) => reason,
        };

        let location = Self::location(&self.path);
        let Some(last_good) = &self.last_good else {
            return Err(SnapshotError::NoSnapshotAvailable {
                location,
                reason: primary_error,
            });
        };

        warn!(
            location = %location,
            error = %primary_error,
            "Configuration file unusable, trying last good copy"
        );

        match load_current(last_good) {
            Ok(snapshot) => {
                // The broken version of the file is not offered as an update
                self.versions.lock().rejected = modified(&self.path).ok();
                Ok(snapshot)
            }
            Err(backup_error) => Err(SnapshotError::NoSnapshotAvailable {
                location,
                reason: format!("{}; last good copy: {}", primary_error, backup_error),
            }),
        }
    }

    fn retrieve_updated(&self) -> Result<Option<Snapshot>, SnapshotError> {
        let location = Self::location(&self.path);
        let timestamp = match modified(&self.path) {
            Ok(timestamp) => timestamp,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(SnapshotError::InvalidSnapshot {
                    location,
                    reason: e.to_string(),
                });
            }
        };

        let mut versions = self.versions.lock();
        if versions.offered == Some(timestamp) || versions.rejected == Some(timestamp) {
            return Ok(None);
        }

        match load(&self.path, timestamp) {
            Ok(snapshot) => {
                debug!(location = %location, timestamp = %timestamp, "Offering updated snapshot");
                versions.offered = Some(timestamp);
                Ok(Some(snapshot))
            }
            Err(reason) => {
                versions.rejected = Some(timestamp);
                Err(SnapshotError::InvalidSnapshot { location, reason })
            }
        }
    }

    fn reject(&self, snapshot: &Snapshot) {
        if self.is_primary(snapshot) {
            self.versions.lock().rejected = Some(snapshot.timestamp());
        }
    }

    fn accept(&self, snapshot: &Snapshot) {
        let Some(last_good) = &self.last_good else {
            return;
        };
        if !self.is_primary(snapshot) {
            return;
        }
        if let Err(e) = fs::copy(&self.path, last_good) {
            warn!(
                path = %last_good.display(),
                error = %e,
                "Failed to write last good configuration"
            );
        }
    }
}
