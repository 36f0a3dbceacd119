//! # Scene Cache
//!
//! Generation cache and image storage engine.
//!
//! Sits between cheap, repeatable client requests and an expensive,
//! non-deterministic image generator. Identical concurrent requests collapse
//! into one generator call, results are stored durably as a compressed image
//! plus thumbnail, and maintenance jobs keep storage growth bounded.
//!
//! ## Features
//!
//! - **Single-flight generation**: one upstream call per fingerprint at a time
//! - **Time-based expiry**: cached scenes are served for a configurable TTL
//! - **Atomic artifact storage**: write-temp-then-rename for every file
//! - **Rate limiting**: token buckets per client and endpoint class
//! - **Soft delete**: image records move `active → deleted → purged`
//! - **Maintenance**: expire sweep, orphan reclamation, backup rotation
//!
//! ## Architecture
//!
//! - [`limit`] - Token-bucket rate limiter
//! - [`fingerprint`] - Canonical cache keys for generation parameters
//! - [`store`] - Artifact store, encoder and read cache
//! - [`cache`] - Generation cache with single-flight coordination
//! - [`repository`] - Durable image records with cursor search
//! - [`maintenance`] - Sweeps and backup rotation
//! - [`service`] - Rate-limited request facade
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use scene_cache::{
//!     ArtifactStore, CacheSettings, GenerationCache, GenerationParams, Offline, StoreSettings,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), scene_cache::Error> {
//!     let store = Arc::new(ArtifactStore::open(StoreSettings::new("./scene-data")).await?);
//!     let cache = GenerationCache::new(Offline, store, CacheSettings::default());
//!
//!     let params = GenerationParams::new("a harbour at night").with_size(512, 512);
//!     let lookup = cache.get_or_generate(&params).await?;
//!     println!("{} (hit: {})", lookup.artifact.full_path.display(), lookup.was_hit);
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod limit;
pub mod maintenance;
pub mod persist;
pub mod repository;
pub mod service;
pub mod store;

// Re-export commonly used types
pub use cache::{
    CacheEntry, CacheLookup, CacheSettings, CacheStats, GenerationCache, Generator, Offline,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Cli, Command, Config, SweepTarget};
pub use error::{Error, GeneratorError, RepositoryError, Result, StorageError};
pub use fingerprint::{fingerprint, Fingerprint, GenerationParams};
pub use limit::{Admission, EndpointClass, LimitPolicy, RateLimiter, RateLimits};
pub use maintenance::{BackupRotation, SweepJob, SweepReport, Sweeper};
pub use repository::{
    ImageId, ImageRecord, ImageRepository, NoOwners, OwnerDirectory, Page, RecordState,
    SearchFilters,
};
pub use service::{SceneService, ServiceStats};
pub use store::{ArtifactRef, ArtifactStore, RootLock, StoreSettings, Variant};
