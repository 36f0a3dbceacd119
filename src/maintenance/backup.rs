//! Backup rotation.
//!
//! Each run bundles both state files into one gzip-compressed JSON snapshot
//! under `<root>/backups/`, points `LATEST` at it, and deletes snapshots
//! older than the retention window. The newest snapshot is never deleted.
//!
//! ```text
//! backups/
//! ├── backup-20240601T120000Z.json.gz
//! ├── backup-20240602T120000Z.json.gz
//! └── LATEST            (contains "backup-20240602T120000Z.json.gz")
//! ```

use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, NaiveDateTime, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info, warn};

use super::report::{SweepJob, SweepReport};
use crate::clock::Clock;
use crate::error::StorageError;
use crate::persist::{read_raw, STATE_DIR, CACHE_STATE_FILE, IMAGE_STATE_FILE};
use crate::store::write_atomic;

/// Directory (under the storage root) holding snapshots.
pub const BACKUP_DIR: &str = "backups";

/// Pointer file naming the most recent snapshot.
pub const LATEST_POINTER: &str = "LATEST";

/// Default number of days snapshots are kept.
pub const DEFAULT_BACKUP_RETENTION_DAYS: i64 = 30;

const SNAPSHOT_PREFIX: &str = "backup-";
const SNAPSHOT_SUFFIX: &str = ".json.gz";
const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%SZ";

/// Contents of one snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupBundle {
    pub created_at: DateTime<Utc>,

    /// Cache table, if one existed
    pub cache: Option<serde_json::Value>,

    /// Image table, if one existed
    pub images: Option<serde_json::Value>,
}

pub struct BackupRotation {
    root: PathBuf,
    dir: PathBuf,
    retention: Duration,
    clock: Arc<dyn Clock>,
}

impl BackupRotation {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        let root = root.into();
        Self {
            dir: root.join(BACKUP_DIR),
            root,
            retention: Duration::days(DEFAULT_BACKUP_RETENTION_DAYS),
            clock,
        }
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write a snapshot, move `LATEST`, and delete expired snapshots.
    ///
    /// Failing to delete an old snapshot is counted, not fatal.
    pub async fn run(&self) -> Result<SweepReport, StorageError> {
        let mut report = SweepReport::new(SweepJob::BackupRotation);
        let now = self.clock.now();

        fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?;

        let bundle = BackupBundle {
            created_at: now,
            cache: self.read_state(CACHE_STATE_FILE).await?,
            images: self.read_state(IMAGE_STATE_FILE).await?,
        };
        let compressed = compress(&bundle)?;

        let name = snapshot_name(now);
        write_atomic(&self.dir.join(&name), &compressed).await?;
        write_atomic(&self.dir.join(LATEST_POINTER), name.as_bytes()).await?;
        info!(snapshot = %name, bytes = compressed.len(), "wrote backup snapshot");

        let cutoff = now - self.retention;
        let snapshots = self.list().await?;
        report.considered = snapshots.len();

        for (taken_at, path) in snapshots {
            let is_latest = path.file_name().is_some_and(|n| n == name.as_str());
            if is_latest || taken_at >= cutoff {
                continue;
            }

            let size = fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            match fs::remove_file(&path).await {
                Ok(()) => {
                    debug!(path = %path.display(), "deleted expired snapshot");
                    report.removed += 1;
                    report.bytes_reclaimed += size;
                }
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to delete snapshot");
                    report.failed += 1;
                }
            }
        }

        report.latest = Some(name);
        Ok(report)
    }

    /// Snapshots on disk with their timestamps, oldest first.
    pub async fn list(&self) -> Result<Vec<(DateTime<Utc>, PathBuf)>, StorageError> {
        let mut entries = match fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&self.dir, e)),
        };

        let mut snapshots = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&self.dir, e))?
        {
            let file_name = entry.file_name();
            if let Some(taken_at) = file_name.to_str().and_then(parse_snapshot_name) {
                snapshots.push((taken_at, entry.path()));
            }
        }
        snapshots.sort();
        Ok(snapshots)
    }

    /// Name of the snapshot `LATEST` points at.
    pub async fn latest(&self) -> Result<Option<String>, StorageError> {
        let raw = read_raw(&self.dir.join(LATEST_POINTER)).await?;
        Ok(raw.map(|bytes| String::from_utf8_lossy(&bytes).trim().to_string()))
    }

    /// Decompress and parse a snapshot.
    pub async fn read(&self, name: &str) -> Result<BackupBundle, StorageError> {
        let path = self.dir.join(name);
        let compressed = fs::read(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;

        let mut json = Vec::new();
        GzDecoder::new(compressed.as_slice())
            .read_to_end(&mut json)
            .map_err(|e| StorageError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;

        serde_json::from_slice(&json).map_err(|e| StorageError::Corrupt {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    async fn read_state(&self, name: &str) -> Result<Option<serde_json::Value>, StorageError> {
        let path = self.root.join(STATE_DIR).join(name);
        let Some(raw) = read_raw(&path).await? else {
            return Ok(None);
        };

        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|e| StorageError::Corrupt {
                path: path.display().to_string(),
                message: e.to_string(),
            })
    }
}

fn compress(bundle: &BackupBundle) -> Result<Vec<u8>, StorageError> {
    let json = serde_json::to_vec(bundle).map_err(|e| StorageError::Encode {
        message: e.to_string(),
    })?;

    let encode_err = |e: std::io::Error| StorageError::Encode {
        message: e.to_string(),
    };
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&json).map_err(encode_err)?;
    encoder.finish().map_err(encode_err)
}

fn snapshot_name(at: DateTime<Utc>) -> String {
    format!(
        "{}{}{}",
        SNAPSHOT_PREFIX,
        at.format(TIMESTAMP_FORMAT),
        SNAPSHOT_SUFFIX
    )
}

fn parse_snapshot_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name
        .strip_prefix(SNAPSHOT_PREFIX)?
        .strip_suffix(SNAPSHOT_SUFFIX)?;
    NaiveDateTime::parse_from_str(stamp, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}
