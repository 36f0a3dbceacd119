//! Scene service.
//!
//! The request-level entry point. Every call is admitted by the rate limiter
//! before any work happens.
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        SceneService                          │
//! │                                                              │
//! │  request_scene(client, params)    save_image(client, ...)    │
//! │        │                                 │                   │
//! │        ▼                                 ▼                   │
//! │  ┌─────────────┐                  ┌─────────────┐            │
//! │  │ RateLimiter │ (scenes)         │ RateLimiter │ (images)   │
//! │  └─────────────┘                  └─────────────┘            │
//! │        │                                 │                   │
//! │        ▼                                 ▼                   │
//! │  ┌─────────────────┐   ┌─────────────┐  ┌─────────────────┐  │
//! │  │ GenerationCache │──▶│ArtifactStore│◀─│ ImageRepository │  │
//! │  └─────────────────┘   └─────────────┘  └─────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheLookup, CacheStats, GenerationCache, Generator};
use crate::error::{Error, Result};
use crate::fingerprint::GenerationParams;
use crate::limit::{Admission, EndpointClass, LimiterStats, RateLimiter};
use crate::repository::{ImageRecord, ImageRepository, RepositoryStats};
use crate::store::{ArtifactStore, DiskUsage};

/// Aggregated counters for the whole engine.
#[derive(Debug, Clone, Serialize)]
pub struct ServiceStats {
    pub cache: CacheStats,
    pub repository: RepositoryStats,
    pub limiter: LimiterStats,
    pub disk: DiskUsage,
    pub read_cache_bytes: usize,
}

/// Rate-limited facade over the cache and the repository.
pub struct SceneService<G: Generator> {
    limiter: Arc<RateLimiter>,
    cache: GenerationCache<G>,
    repository: Arc<ImageRepository>,
}

impl<G: Generator> SceneService<G> {
    pub fn new(
        limiter: Arc<RateLimiter>,
        cache: GenerationCache<G>,
        repository: Arc<ImageRepository>,
    ) -> Self {
        Self {
            limiter,
            cache,
            repository,
        }
    }

    pub fn cache(&self) -> &GenerationCache<G> {
        &self.cache
    }

    pub fn repository(&self) -> &Arc<ImageRepository> {
        &self.repository
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn store(&self) -> &ArtifactStore {
        self.cache.store()
    }

    /// Return the scene for `params`, generating it on a cache miss.
    ///
    /// # Errors
    ///
    /// - `RateLimited` if `client` is over its scene limit
    /// - `GenerationFailed` / `StorageFailure` from the cache
    pub async fn request_scene(
        &self,
        client: &str,
        params: &GenerationParams,
    ) -> Result<CacheLookup> {
        self.admit(client, EndpointClass::Scenes)?;
        self.cache.get_or_generate(params).await
    }

    /// Like [`request_scene`](Self::request_scene), but stop waiting after
    /// `wait`. The generation continues and is cached.
    pub async fn request_scene_with_timeout(
        &self,
        client: &str,
        params: &GenerationParams,
        wait: Duration,
    ) -> Result<CacheLookup> {
        self.admit(client, EndpointClass::Scenes)?;
        self.cache.get_or_generate_with_timeout(params, wait).await
    }

    /// Store an image and create a record owned by `owner_ref`.
    pub async fn save_image(
        &self,
        client: &str,
        owner_ref: &str,
        image: Bytes,
    ) -> Result<ImageRecord> {
        self.admit(client, EndpointClass::Images)?;

        let artifact = self.store().store(image).await?;
        match self.repository.create(owner_ref, artifact.clone()).await {
            Ok(record) => Ok(record),
            Err(e) => {
                // No row points at the artifact yet
                if let Err(delete_err) = self.store().delete(&artifact).await {
                    warn!(artifact = %artifact.id, error = %delete_err, "failed to remove unsaved artifact");
                }
                Err(e.into())
            }
        }
    }

    pub async fn stats(&self) -> Result<ServiceStats> {
        Ok(ServiceStats {
            cache: self.cache.stats().await,
            repository: self.repository.stats().await,
            limiter: self.limiter.stats(),
            disk: self.store().disk_usage().await?,
            read_cache_bytes: self.store().read_cache_size().await,
        })
    }

    fn admit(&self, client: &str, class: EndpointClass) -> Result<()> {
        match self.limiter.admit(client, class) {
            Admission::Allowed { remaining } => {
                debug!(client = %client, class = %class, remaining, "request admitted");
                Ok(())
            }
            Admission::Denied { .. } => Err(Error::RateLimited {
                client: client.to_string(),
                class,
            }),
        }
    }
}
