use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Extension of every stored artifact file.
pub const ARTIFACT_EXTENSION: &str = "jpg";

/// Directory (under the storage root) holding full-size artifacts.
pub const FULL_DIR: &str = "full";

/// Directory (under the storage root) holding thumbnails.
pub const THUMBNAIL_DIR: &str = "thumbs";

/// Which file of an artifact pair to read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Variant {
    Full,
    Thumbnail,
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Full => write!(f, "full"),
            Variant::Thumbnail => write!(f, "thumbnail"),
        }
    }
}

/// Reference to a stored full-size + thumbnail pair.
///
/// Paths are relative to the storage root. Each reference is owned by
/// exactly one cache entry or image record; two references may carry the
/// same checksum but never the same paths.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    /// Identifier used to name both files
    pub id: Uuid,

    /// Relative path of the full-size image
    pub full_path: PathBuf,

    /// Relative path of the thumbnail
    pub thumbnail_path: PathBuf,

    /// SHA-256 (hex) of the stored full-size bytes
    pub checksum: String,

    /// Combined on-disk size of both files
    pub size_bytes: u64,
}

impl ArtifactRef {
    pub(crate) fn new(id: Uuid, checksum: String, size_bytes: u64) -> Self {
        Self {
            id,
            full_path: relative_path(FULL_DIR, id),
            thumbnail_path: relative_path(THUMBNAIL_DIR, id),
            checksum,
            size_bytes,
        }
    }

    pub fn path(&self, variant: Variant) -> &Path {
        match variant {
            Variant::Full => &self.full_path,
            Variant::Thumbnail => &self.thumbnail_path,
        }
    }
}

fn relative_path(dir: &str, id: Uuid) -> PathBuf {
    Path::new(dir).join(format!("{}.{}", id.simple(), ARTIFACT_EXTENSION))
}
