//! Configuration for the scene-cache maintenance tool.
//!
//! Options come from command-line arguments, then environment variables with
//! the `SCENE_` prefix, then the defaults below.
//!
//! # Commands
//!
//! - `scene-cache sweep <expire|orphans|all>` - Run maintenance sweeps
//! - `scene-cache backup` - Snapshot state and rotate old snapshots
//! - `scene-cache stats` - Print cache and storage statistics
//! - `scene-cache check` - Validate configuration and the storage root
//!
//! # Environment Variables
//!
//! - `SCENE_ROOT` - Storage root (default: ./scene-data)
//! - `SCENE_CACHE_TTL_DAYS` - Cache entry lifetime (default: 7)
//! - `SCENE_THUMBNAIL_WIDTH` / `SCENE_THUMBNAIL_HEIGHT` - Thumbnail size (default: 256x256)
//! - `SCENE_JPEG_QUALITY` - Compression quality (default: 80)
//! - `SCENE_IMAGES_LIMIT` / `SCENE_IMAGES_WINDOW_SECS` - Image endpoint limit (default: 10 per 60s)
//! - `SCENE_SCENES_LIMIT` / `SCENE_SCENES_WINDOW_SECS` - Scene endpoint limit (default: 5 per 60s)
//! - `SCENE_BACKUP_RETENTION_DAYS` - Snapshot retention (default: 30)
//! - `SCENE_ORPHAN_RETENTION_DAYS` - Soft-delete retention before purge (default: 30)
//! - `SCENE_READ_CACHE_BYTES` - In-memory read cache size (default: 64MB)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::cache::{CacheSettings, DEFAULT_CACHE_TTL_DAYS};
use crate::limit::{LimitPolicy, RateLimits};
use crate::maintenance::{DEFAULT_BACKUP_RETENTION_DAYS, DEFAULT_ORPHAN_RETENTION_DAYS};
use crate::store::{
    is_valid_quality, StoreSettings, DEFAULT_JPEG_QUALITY, DEFAULT_READ_CACHE_CAPACITY,
    DEFAULT_THUMBNAIL_SIZE,
};

// =============================================================================
// Default Values
// =============================================================================

/// Default storage root.
pub const DEFAULT_ROOT: &str = "./scene-data";

/// Default image endpoint capacity.
pub const DEFAULT_IMAGES_CAPACITY: u32 = 10;

/// Default scene endpoint capacity.
pub const DEFAULT_SCENES_CAPACITY: u32 = 5;

/// Default refill window for both endpoint classes, in seconds.
pub const DEFAULT_WINDOW_SECS: u64 = 60;

/// Largest accepted thumbnail edge.
pub const MAX_THUMBNAIL_SIZE: u32 = 4096;

// =============================================================================
// CLI Structure
// =============================================================================

/// Scene Cache - generation cache and image storage maintenance.
#[derive(Parser, Debug, Clone)]
#[command(name = "scene-cache")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run maintenance sweeps over the cache and image records
    Sweep(SweepArgs),

    /// Snapshot state files and rotate old snapshots
    Backup(Config),

    /// Print cache, repository and storage statistics as JSON
    Stats(Config),

    /// Validate configuration and storage root writability
    Check(Config),
}

impl Command {
    pub fn config(&self) -> &Config {
        match self {
            Command::Sweep(args) => &args.config,
            Command::Backup(config) | Command::Stats(config) | Command::Check(config) => config,
        }
    }
}

/// Which sweep to run.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SweepTarget {
    /// Evict expired cache entries and reclaim their artifacts
    Expire,
    /// Purge long-deleted image records without owners
    Orphans,
    /// Both sweeps
    All,
}

#[derive(Args, Debug, Clone)]
pub struct SweepArgs {
    #[arg(value_enum)]
    pub target: SweepTarget,

    #[command(flatten)]
    pub config: Config,
}

// =============================================================================
// Shared Configuration
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct Config {
    // =========================================================================
    // Storage
    // =========================================================================
    /// Storage root holding artifacts, state files and backups.
    #[arg(long, default_value = DEFAULT_ROOT, env = "SCENE_ROOT")]
    pub root: PathBuf,

    /// Capacity of the in-memory artifact read cache in bytes.
    #[arg(long, default_value_t = DEFAULT_READ_CACHE_CAPACITY, env = "SCENE_READ_CACHE_BYTES")]
    pub read_cache_bytes: usize,

    // =========================================================================
    // Cache and encoding
    // =========================================================================
    /// Days a generated scene is served from cache.
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL_DAYS, env = "SCENE_CACHE_TTL_DAYS")]
    pub cache_ttl_days: i64,

    /// Thumbnail width in pixels.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_SIZE, env = "SCENE_THUMBNAIL_WIDTH")]
    pub thumbnail_width: u32,

    /// Thumbnail height in pixels.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_SIZE, env = "SCENE_THUMBNAIL_HEIGHT")]
    pub thumbnail_height: u32,

    /// JPEG quality for stored images (1-100).
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, env = "SCENE_JPEG_QUALITY")]
    pub jpeg_quality: u8,

    // =========================================================================
    // Rate limits
    // =========================================================================
    /// Image requests allowed per window, per client.
    #[arg(long, default_value_t = DEFAULT_IMAGES_CAPACITY, env = "SCENE_IMAGES_LIMIT")]
    pub images_limit: u32,

    /// Image refill window in seconds.
    #[arg(long, default_value_t = DEFAULT_WINDOW_SECS, env = "SCENE_IMAGES_WINDOW_SECS")]
    pub images_window_secs: u64,

    /// Scene requests allowed per window, per client.
    #[arg(long, default_value_t = DEFAULT_SCENES_CAPACITY, env = "SCENE_SCENES_LIMIT")]
    pub scenes_limit: u32,

    /// Scene refill window in seconds.
    #[arg(long, default_value_t = DEFAULT_WINDOW_SECS, env = "SCENE_SCENES_WINDOW_SECS")]
    pub scenes_window_secs: u64,

    // =========================================================================
    // Maintenance
    // =========================================================================
    /// Days backup snapshots are kept.
    #[arg(long, default_value_t = DEFAULT_BACKUP_RETENTION_DAYS, env = "SCENE_BACKUP_RETENTION_DAYS")]
    pub backup_retention_days: i64,

    /// Days a soft-deleted image is kept before it may be purged.
    #[arg(long, default_value_t = DEFAULT_ORPHAN_RETENTION_DAYS, env = "SCENE_ORPHAN_RETENTION_DAYS")]
    pub orphan_retention_days: i64,

    // =========================================================================
    // Logging
    // =========================================================================
    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Config {
    /// Config with every default and the given storage root.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            read_cache_bytes: DEFAULT_READ_CACHE_CAPACITY,
            cache_ttl_days: DEFAULT_CACHE_TTL_DAYS,
            thumbnail_width: DEFAULT_THUMBNAIL_SIZE,
            thumbnail_height: DEFAULT_THUMBNAIL_SIZE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            images_limit: DEFAULT_IMAGES_CAPACITY,
            images_window_secs: DEFAULT_WINDOW_SECS,
            scenes_limit: DEFAULT_SCENES_CAPACITY,
            scenes_window_secs: DEFAULT_WINDOW_SECS,
            backup_retention_days: DEFAULT_BACKUP_RETENTION_DAYS,
            orphan_retention_days: DEFAULT_ORPHAN_RETENTION_DAYS,
            verbose: false,
        }
    }

    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.root.as_os_str().is_empty() {
            return Err("Storage root is required. Set --root or SCENE_ROOT".to_string());
        }

        if self.cache_ttl_days <= 0 {
            return Err("cache_ttl_days must be greater than 0".to_string());
        }

        if !is_valid_quality(self.jpeg_quality) {
            return Err("jpeg_quality must be between 1 and 100".to_string());
        }

        for (name, size) in [
            ("thumbnail_width", self.thumbnail_width),
            ("thumbnail_height", self.thumbnail_height),
        ] {
            if size == 0 || size > MAX_THUMBNAIL_SIZE {
                return Err(format!("{} must be between 1 and {}", name, MAX_THUMBNAIL_SIZE));
            }
        }

        if self.images_limit == 0 || self.scenes_limit == 0 {
            return Err("rate limits must be greater than 0".to_string());
        }
        if self.images_window_secs == 0 || self.scenes_window_secs == 0 {
            return Err("rate limit windows must be greater than 0 seconds".to_string());
        }

        if self.backup_retention_days < 0 {
            return Err("backup_retention_days must not be negative".to_string());
        }
        if self.orphan_retention_days < 0 {
            return Err("orphan_retention_days must not be negative".to_string());
        }

        Ok(())
    }

    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            root: self.root.clone(),
            jpeg_quality: self.jpeg_quality,
            thumbnail_width: self.thumbnail_width,
            thumbnail_height: self.thumbnail_height,
            read_cache_bytes: self.read_cache_bytes,
        }
    }

    pub fn cache_settings(&self) -> CacheSettings {
        CacheSettings {
            ttl: chrono::Duration::days(self.cache_ttl_days),
        }
    }

    pub fn limits(&self) -> RateLimits {
        RateLimits {
            images: LimitPolicy::new(
                self.images_limit,
                Duration::from_secs(self.images_window_secs),
            ),
            scenes: LimitPolicy::new(
                self.scenes_limit,
                Duration::from_secs(self.scenes_window_secs),
            ),
        }
    }

    pub fn backup_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.backup_retention_days)
    }

    pub fn orphan_retention(&self) -> chrono::Duration {
        chrono::Duration::days(self.orphan_retention_days)
    }
}

// =============================================================================
// Tests
// =============================================================================
