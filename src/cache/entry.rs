use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::fingerprint::Fingerprint;
use crate::store::ArtifactRef;

/// One cached generation result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub artifact: ArtifactRef,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
}

impl CacheEntry {
    pub fn new(
        fingerprint: Fingerprint,
        artifact: ArtifactRef,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            fingerprint,
            artifact,
            created_at,
            expires_at,
            hit_count: 0,
        }
    }

    /// An entry is served up to and including `expires_at`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

/// Persisted form of the cache table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheState {
    pub entries: Vec<CacheEntry>,

    /// Artifacts whose rows were replaced or cleared, awaiting reclamation
    #[serde(default)]
    pub retired: Vec<ArtifactRef>,
}
