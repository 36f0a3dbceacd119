//! Expire and orphan sweeps.
//!
//! Both jobs remove the owning row first and delete the artifact only
//! afterwards. A failure on one artifact is logged, counted and handed back
//! to the cache's retired queue so the next expire sweep tries again.
//!
//! A sweeper must run in the process that owns the storage root: either a
//! serving process calling [`Sweeper::run_periodically`], or the maintenance
//! binary while no server holds the root.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::report::{SweepJob, SweepReport};
use crate::cache::{GenerationCache, Generator};
use crate::clock::Clock;
use crate::error::{Error, RepositoryError};
use crate::repository::{ImageRepository, OwnerDirectory};
use crate::store::{ArtifactRef, ArtifactStore};

/// Default retention of soft-deleted records before purge: 30 days.
pub const DEFAULT_ORPHAN_RETENTION_DAYS: i64 = 30;

/// Runs the cache and repository maintenance jobs against shared state.
pub struct Sweeper<G: Generator> {
    cache: GenerationCache<G>,
    repository: Arc<ImageRepository>,
    owners: Arc<dyn OwnerDirectory>,
    clock: Arc<dyn Clock>,
    orphan_retention: Duration,
}

impl<G: Generator> Sweeper<G> {
    pub fn new(
        cache: GenerationCache<G>,
        repository: Arc<ImageRepository>,
        owners: Arc<dyn OwnerDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            cache,
            repository,
            owners,
            clock,
            orphan_retention: Duration::days(DEFAULT_ORPHAN_RETENTION_DAYS),
        }
    }

    pub fn with_orphan_retention(mut self, retention: Duration) -> Self {
        self.orphan_retention = retention;
        self
    }

    fn store(&self) -> &ArtifactStore {
        self.cache.store()
    }

    /// Delete expired cache rows, then their artifacts (and any retired
    /// ones) unless an image record owns the same artifact.
    pub async fn expire_cache(&self) -> Result<SweepReport, Error> {
        let mut report = SweepReport::new(SweepJob::ExpireCache);

        let expired = self.cache.evict_expired().await?;
        let retired = self.cache.take_retired().await?;
        report.considered = expired.len() + retired.len();
        report.removed = expired.len();

        for entry in &expired {
            debug!(fingerprint = %entry.fingerprint.short(), "evicted expired cache entry");
        }

        let artifacts = expired
            .into_iter()
            .map(|entry| entry.artifact)
            .chain(retired);

        let mut retry = Vec::new();
        for artifact in artifacts {
            if self.repository.references(&artifact).await {
                debug!(artifact = %artifact.id, "artifact owned by an image record, keeping");
                report.skipped += 1;
                continue;
            }
            if !self.delete_artifact(&artifact, &mut report).await {
                retry.push(artifact);
            }
        }
        self.hand_back(retry).await;

        info!(
            removed = report.removed,
            artifacts = report.artifacts_deleted,
            failed = report.failed,
            bytes = report.bytes_reclaimed,
            "expire sweep finished"
        );
        Ok(report)
    }

    /// Purge records deleted longer than the retention window whose owner no
    /// longer exists, then delete their artifacts.
    pub async fn reclaim_orphans(&self) -> Result<SweepReport, Error> {
        let mut report = SweepReport::new(SweepJob::ReclaimOrphans);
        let cutoff = self.clock.now() - self.orphan_retention;

        let candidates = self.repository.purge_candidates(cutoff).await;
        report.considered = candidates.len();

        let mut retry = Vec::new();
        for record in candidates {
            if self.owners.owner_exists(&record.owner_ref).await {
                debug!(id = %record.id, owner = %record.owner_ref, "owner still exists, keeping");
                report.skipped += 1;
                continue;
            }

            match self.repository.mark_purged(record.id).await {
                Ok(_) => report.removed += 1,
                Err(RepositoryError::InvalidState { .. }) | Err(RepositoryError::NotFound(_)) => {
                    // Restored or purged since the candidate scan
                    report.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "failed to purge image record");
                    report.failed += 1;
                    continue;
                }
            }

            info!(id = %record.id, owner = %record.owner_ref, "purged orphaned image");
            if !self.delete_artifact(&record.artifact, &mut report).await {
                retry.push(record.artifact);
            }
        }
        self.hand_back(retry).await;

        info!(
            considered = report.considered,
            removed = report.removed,
            failed = report.failed,
            bytes = report.bytes_reclaimed,
            "orphan sweep finished"
        );
        Ok(report)
    }

    /// Run both jobs. The orphan sweep runs first so the artifacts it fails
    /// to delete are retried by the expire sweep in the same pass.
    pub async fn run_all(&self) -> Result<Vec<SweepReport>, Error> {
        let orphans = self.reclaim_orphans().await?;
        let expire = self.expire_cache().await?;
        Ok(vec![expire, orphans])
    }

    /// Run [`run_all`](Self::run_all) every `every` until `shutdown` turns
    /// true. A failed pass is logged and the next tick tries again.
    ///
    /// Returns the number of passes that completed.
    pub async fn run_periodically(
        &self,
        every: StdDuration,
        mut shutdown: watch::Receiver<bool>,
    ) -> u64 {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut passes = 0;

        info!(every_secs = every.as_secs(), "periodic sweeps started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    match self.run_all().await {
                        Ok(_) => passes += 1,
                        Err(e) => warn!(error = %e, "sweep pass failed"),
                    }
                }
            }
        }

        info!(passes, "periodic sweeps stopped");
        passes
    }

    /// Returns false if the artifact must be retried later.
    async fn delete_artifact(&self, artifact: &ArtifactRef, report: &mut SweepReport) -> bool {
        match self.store().delete(artifact).await {
            Ok(bytes) => {
                report.artifacts_deleted += 1;
                report.bytes_reclaimed += bytes;
                true
            }
            Err(e) => {
                warn!(artifact = %artifact.id, error = %e, "failed to delete artifact");
                report.failed += 1;
                false
            }
        }
    }

    async fn hand_back(&self, artifacts: Vec<ArtifactRef>) {
        let count = artifacts.len();
        if let Err(e) = self.cache.retire(artifacts).await {
            warn!(count, error = %e, "failed to persist retired artifacts");
        }
    }
}
