//! Filesystem-backed artifact store.
//!
//! Layout under the storage root:
//!
//! ```text
//! <root>/
//! ├── full/<id>.jpg      full-size images
//! └── thumbs/<id>.jpg    thumbnails (same id)
//! ```
//!
//! The store is the only component that mutates these trees, and only
//! through [`write_atomic`]. Opening a store takes the root's [`RootLock`],
//! so one process at a time owns the trees and the state files beside them.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytes::Bytes;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::StorageError;

use super::artifact::{ArtifactRef, Variant, FULL_DIR, THUMBNAIL_DIR};
use super::atomic::{remove_stale_temps, write_atomic};
use super::encoder::{ImageEncoder, DEFAULT_JPEG_QUALITY, DEFAULT_THUMBNAIL_SIZE};
use super::lock::RootLock;
use super::read_cache::{ReadCache, DEFAULT_READ_CACHE_CAPACITY};

// =============================================================================
// Settings
// =============================================================================

/// Settings for opening an [`ArtifactStore`].
#[derive(Debug, Clone)]
pub struct StoreSettings {
    /// Storage root holding the `full/` and `thumbs/` trees
    pub root: PathBuf,

    /// JPEG quality for both variants (1-100)
    pub jpeg_quality: u8,

    /// Thumbnail width in pixels
    pub thumbnail_width: u32,

    /// Thumbnail height in pixels
    pub thumbnail_height: u32,

    /// Capacity of the in-memory read cache in bytes (0 disables it)
    pub read_cache_bytes: usize,
}

impl StoreSettings {
    /// Settings with default quality, thumbnail size and read cache.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            thumbnail_width: DEFAULT_THUMBNAIL_SIZE,
            thumbnail_height: DEFAULT_THUMBNAIL_SIZE,
            read_cache_bytes: DEFAULT_READ_CACHE_CAPACITY,
        }
    }
}

/// Totals for the files currently on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiskUsage {
    pub full_files: u64,
    pub thumbnail_files: u64,
    pub total_bytes: u64,
}

// =============================================================================
// Artifact Store
// =============================================================================

/// Stores full-size + thumbnail pairs on the local filesystem.
pub struct ArtifactStore {
    root: PathBuf,
    lock: Arc<RootLock>,
    encoder: ImageEncoder,
    read_cache: ReadCache,
}

impl ArtifactStore {
    /// Open (and create if needed) a store rooted at `settings.root`.
    ///
    /// Fails with `StorageError::Locked` while another process owns the
    /// root. Temp files left behind by an interrupted write are removed.
    pub async fn open(settings: StoreSettings) -> Result<Self, StorageError> {
        let root = settings.root;
        fs::create_dir_all(&root)
            .await
            .map_err(|e| StorageError::io(&root, e))?;
        let lock = Arc::new(RootLock::acquire(&root)?);

        let mut stale = 0;
        for dir in [FULL_DIR, THUMBNAIL_DIR] {
            let path = root.join(dir);
            fs::create_dir_all(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?;
            stale += remove_stale_temps(&path).await?;
        }
        if stale > 0 {
            info!(root = %root.display(), removed = stale, "removed stale temp files");
        }

        Ok(Self {
            root,
            lock,
            encoder: ImageEncoder::new(
                settings.jpeg_quality,
                settings.thumbnail_width,
                settings.thumbnail_height,
            ),
            read_cache: ReadCache::with_capacity(settings.read_cache_bytes),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shared handle on the root lock, for components that persist state
    /// under the same root.
    pub fn root_lock(&self) -> Arc<RootLock> {
        self.lock.clone()
    }

    pub fn encoder(&self) -> &ImageEncoder {
        &self.encoder
    }

    /// Absolute path of one variant of an artifact.
    pub fn resolve(&self, artifact: &ArtifactRef, variant: Variant) -> PathBuf {
        self.root.join(artifact.path(variant))
    }

    /// Compress `image`, derive its thumbnail and write both atomically.
    ///
    /// # Errors
    ///
    /// - `StorageError::Decode` if `image` is not a readable image
    /// - `StorageError::Io` on disk failure; no file of the pair is left behind
    pub async fn store(&self, image: Bytes) -> Result<ArtifactRef, StorageError> {
        let encoder = self.encoder;
        let encoded = tokio::task::spawn_blocking(move || encoder.encode(&image))
            .await
            .map_err(|e| StorageError::Encode {
                message: format!("encoder task failed: {}", e),
            })??;

        let checksum = hex::encode(Sha256::digest(&encoded.full));
        let size_bytes = (encoded.full.len() + encoded.thumbnail.len()) as u64;
        let artifact = ArtifactRef::new(Uuid::new_v4(), checksum, size_bytes);

        let thumb_path = self.resolve(&artifact, Variant::Thumbnail);
        let full_path = self.resolve(&artifact, Variant::Full);

        write_atomic(&thumb_path, &encoded.thumbnail).await?;
        if let Err(e) = write_atomic(&full_path, &encoded.full).await {
            // Never leave half a pair behind
            let _ = fs::remove_file(&thumb_path).await;
            warn!(artifact = %artifact.id, error = %e, "artifact write failed");
            return Err(e);
        }

        debug!(
            artifact = %artifact.id,
            bytes = size_bytes,
            checksum = %artifact.checksum,
            "stored artifact"
        );
        Ok(artifact)
    }

    /// Read one variant of an artifact.
    pub async fn retrieve(
        &self,
        artifact: &ArtifactRef,
        variant: Variant,
    ) -> Result<Bytes, StorageError> {
        if let Some(data) = self.read_cache.get(artifact.id, variant).await {
            return Ok(data);
        }

        let epoch = self.read_cache.epoch().await;
        let path = self.resolve(artifact, variant);
        let data = Bytes::from(
            fs::read(&path)
                .await
                .map_err(|e| StorageError::io(&path, e))?,
        );
        self.read_cache
            .put_if_current(artifact.id, variant, data.clone(), epoch)
            .await;
        Ok(data)
    }

    /// Whether both files of the pair are present.
    pub async fn exists(&self, artifact: &ArtifactRef) -> bool {
        for variant in [Variant::Full, Variant::Thumbnail] {
            let path = self.resolve(artifact, variant);
            if !fs::try_exists(&path).await.unwrap_or(false) {
                return false;
            }
        }
        true
    }

    /// Re-hash the stored full-size file and compare with the recorded checksum.
    pub async fn verify(&self, artifact: &ArtifactRef) -> Result<bool, StorageError> {
        let path = self.resolve(artifact, Variant::Full);
        let data = fs::read(&path)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(hex::encode(Sha256::digest(&data)) == artifact.checksum)
    }

    /// Remove both files of the pair.
    ///
    /// Idempotent: missing files are not an error. Returns the number of
    /// bytes freed.
    pub async fn delete(&self, artifact: &ArtifactRef) -> Result<u64, StorageError> {
        let result = self.remove_pair(artifact).await;
        // After removal, so a read racing the delete cannot re-cache the bytes
        self.read_cache.invalidate(artifact.id).await;

        let freed = result?;
        debug!(artifact = %artifact.id, freed, "deleted artifact");
        Ok(freed)
    }

    async fn remove_pair(&self, artifact: &ArtifactRef) -> Result<u64, StorageError> {
        let mut freed = 0;
        for variant in [Variant::Full, Variant::Thumbnail] {
            let path = self.resolve(artifact, variant);
            let len = match fs::metadata(&path).await {
                Ok(meta) => meta.len(),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(StorageError::io(&path, e)),
            };
            match fs::remove_file(&path).await {
                Ok(()) => freed += len,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(StorageError::io(&path, e)),
            }
        }
        Ok(freed)
    }

    /// Count files and bytes in both trees.
    pub async fn disk_usage(&self) -> Result<DiskUsage, StorageError> {
        let (full_files, full_bytes) = scan_dir(&self.root.join(FULL_DIR)).await?;
        let (thumbnail_files, thumb_bytes) = scan_dir(&self.root.join(THUMBNAIL_DIR)).await?;
        Ok(DiskUsage {
            full_files,
            thumbnail_files,
            total_bytes: full_bytes + thumb_bytes,
        })
    }

    /// Bytes currently held by the read cache.
    pub async fn read_cache_size(&self) -> usize {
        self.read_cache.size().await
    }
}

async fn scan_dir(dir: &Path) -> Result<(u64, u64), StorageError> {
    let mut files = 0;
    let mut bytes = 0;
    let mut entries = fs::read_dir(dir)
        .await
        .map_err(|e| StorageError::io(dir, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| StorageError::io(dir, e))?
    {
        if let Ok(meta) = entry.metadata().await {
            if meta.is_file() {
                files += 1;
                bytes += meta.len();
            }
        }
    }
    Ok((files, bytes))
}

// =============================================================================
// Tests
// =============================================================================
