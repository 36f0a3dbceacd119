//! Write-to-temp-then-rename file replacement.
//!
//! Readers either see the previous file (or no file) or the complete new
//! one. Temp files live next to their destination so the rename never
//! crosses a filesystem boundary, and are removed when any step fails.

use std::path::{Path, PathBuf};

use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::error::StorageError;

/// Suffix of in-progress temp files.
pub const TEMP_SUFFIX: &str = ".tmp";

/// Atomically replace `dest` with `bytes`.
pub async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), StorageError> {
    let tmp = temp_path_for(dest);

    let result = async {
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        fs::rename(&tmp, dest).await
    }
    .await;

    if let Err(err) = result {
        let _ = fs::remove_file(&tmp).await;
        return Err(StorageError::Io {
            path: dest.display().to_string(),
            message: err.to_string(),
        });
    }

    Ok(())
}

/// Remove leftover temp files in `dir` (from a crash mid-write).
///
/// Returns the number of files removed.
pub async fn remove_stale_temps(dir: &Path) -> Result<usize, StorageError> {
    let mut removed = 0;
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| StorageError::io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if is_temp_name(&name) && fs::remove_file(entry.path()).await.is_ok() {
            removed += 1;
        }
    }

    Ok(removed)
}

fn temp_path_for(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_name = format!(".{}.{}{}", name, Uuid::new_v4().simple(), TEMP_SUFFIX);
    match dest.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

fn is_temp_name(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(TEMP_SUFFIX)
}
