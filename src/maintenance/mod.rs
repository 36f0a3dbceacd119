//! Maintenance jobs.
//!
//! Jobs are triggered from outside (the command-line tool or an external
//! timer); nothing here schedules itself. Each job returns a [`SweepReport`]
//! and is safe to run while requests are being served.
//!
//! - [`Sweeper::expire_cache`]: evict expired cache rows and reclaim artifacts
//! - [`Sweeper::reclaim_orphans`]: purge long-deleted records without owners
//! - [`BackupRotation::run`]: snapshot state and rotate old snapshots

mod backup;
mod report;
mod sweeper;

pub use backup::{
    BackupBundle, BackupRotation, BACKUP_DIR, DEFAULT_BACKUP_RETENTION_DAYS, LATEST_POINTER,
};
pub use report::{SweepJob, SweepReport};
pub use sweeper::{Sweeper, DEFAULT_ORPHAN_RETENTION_DAYS};
