//! Artifact storage.
//!
//! Every image (generated scene or uploaded picture) is stored as a pair:
//! a compressed full-size JPEG and a fixed-size thumbnail.
//!
//! ```text
//!      image bytes
//!          │
//!          ▼
//! ┌───────────────────┐     ┌──────────────────┐
//! │   ImageEncoder    │────▶│  write_atomic    │──▶ full/<id>.jpg
//! │ (decode, JPEG,    │     │ (temp + rename)  │──▶ thumbs/<id>.jpg
//! │  resample thumb)  │     └──────────────────┘
//! └───────────────────┘
//!                        ArtifactRef { id, paths, checksum, size }
//! ```
//!
//! # Components
//!
//! - [`ArtifactStore`]: store / retrieve / delete of artifact pairs
//! - [`ArtifactRef`]: owned reference to one pair
//! - [`ImageEncoder`]: JPEG compression and thumbnail resampling
//! - [`ReadCache`]: size-bounded LRU of recently read bytes
//! - [`RootLock`]: one owning process per storage root

mod artifact;
mod atomic;
mod disk;
mod encoder;
mod lock;
mod read_cache;

pub use artifact::{ArtifactRef, Variant, ARTIFACT_EXTENSION, FULL_DIR, THUMBNAIL_DIR};
pub use atomic::write_atomic;
pub use disk::{ArtifactStore, DiskUsage, StoreSettings};
pub use encoder::{
    clamp_quality, is_valid_quality, EncodedArtifact, ImageEncoder, DEFAULT_JPEG_QUALITY,
    DEFAULT_THUMBNAIL_SIZE, MAX_JPEG_QUALITY, MIN_JPEG_QUALITY,
};
pub use lock::{RootLock, LOCK_FILE};
pub use read_cache::{ReadCache, DEFAULT_READ_CACHE_CAPACITY};
