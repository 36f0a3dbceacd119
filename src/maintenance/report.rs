use std::fmt;

use serde::Serialize;

/// Maintenance job kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepJob {
    ExpireCache,
    ReclaimOrphans,
    BackupRotation,
}

impl fmt::Display for SweepJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SweepJob::ExpireCache => "expire_cache",
            SweepJob::ReclaimOrphans => "reclaim_orphans",
            SweepJob::BackupRotation => "backup_rotation",
        };
        f.write_str(name)
    }
}

/// Summary of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub job: SweepJob,

    /// Items examined (expired rows, retired artifacts, deleted records, snapshots)
    pub considered: usize,

    /// Rows or snapshots removed
    pub removed: usize,

    /// Items left alone on purpose (still referenced, owner alive, restored)
    pub skipped: usize,

    /// Items that could not be processed; the job continued past them
    pub failed: usize,

    /// Artifact files deleted
    pub artifacts_deleted: usize,

    pub bytes_reclaimed: u64,

    /// Name of the snapshot written by a backup run
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest: Option<String>,
}

impl SweepReport {
    pub fn new(job: SweepJob) -> Self {
        Self {
            job,
            considered: 0,
            removed: 0,
            skipped: 0,
            failed: 0,
            artifacts_deleted: 0,
            bytes_reclaimed: 0,
            latest: None,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0
    }
}
