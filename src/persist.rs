//! Durable JSON state files.
//!
//! The cache and the image repository keep their rows in memory and write a
//! full snapshot after each mutation. Snapshots go through the same
//! temp-then-rename protocol as artifacts, so a crash leaves either the old
//! or the new document on disk.

use std::marker::PhantomData;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;

use crate::error::StorageError;
use crate::store::write_atomic;

/// Directory (under the storage root) holding state files.
pub const STATE_DIR: &str = "state";

/// File name of the cache table.
pub const CACHE_STATE_FILE: &str = "cache.json";

/// File name of the image table.
pub const IMAGE_STATE_FILE: &str = "images.json";

/// A JSON document holding one table.
///
/// Saves are serialised: callers take the snapshot while holding the save
/// lock (see [`StateFile::save_with`]) so a later snapshot is never
/// overwritten by an earlier one.
pub struct StateFile<T> {
    path: PathBuf,
    save_lock: Mutex<()>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned + Default> StateFile<T> {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            save_lock: Mutex::new(()),
            _marker: PhantomData,
        }
    }

    /// State file `name` under `<root>/state/`.
    pub fn in_root(root: &Path, name: &str) -> Self {
        Self::new(root.join(STATE_DIR).join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the document, or the default value if the file does not exist.
    pub async fn load(&self) -> Result<T, StorageError> {
        let raw = match fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
            Err(e) => return Err(StorageError::io(&self.path, e)),
        };

        serde_json::from_slice(&raw).map_err(|e| StorageError::Corrupt {
            path: self.path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Take a snapshot with `snapshot` under the save lock, then write it.
    pub async fn save_with<F>(&self, snapshot: F) -> Result<(), StorageError>
    where
        F: FnOnce() -> T,
    {
        let _guard = self.save_lock.lock().await;
        let value = snapshot();
        self.write(&value).await
    }

    /// Async variant of [`save_with`](Self::save_with) for snapshots that
    /// need to take async locks.
    pub async fn save_with_async<F, Fut>(&self, snapshot: F) -> Result<(), StorageError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let _guard = self.save_lock.lock().await;
        let value = snapshot().await;
        self.write(&value).await
    }

    async fn write(&self, value: &T) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| StorageError::io(parent, e))?;
        }

        let json = serde_json::to_vec_pretty(value).map_err(|e| StorageError::Encode {
            message: e.to_string(),
        })?;
        write_atomic(&self.path, &json).await
    }
}

/// Read a state file's raw bytes, or `None` if it does not exist.
pub async fn read_raw(path: &Path) -> Result<Option<Vec<u8>>, StorageError> {
    match fs::read(path).await {
        Ok(raw) => Ok(Some(raw)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StorageError::io(path, e)),
    }
}
