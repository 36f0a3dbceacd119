use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::bucket::{LimitPolicy, TokenBucket};

/// Default image endpoint limit: 10 requests per minute.
pub const DEFAULT_IMAGES_LIMIT: LimitPolicy = LimitPolicy::new(10, Duration::from_secs(60));

/// Default scene endpoint limit: 5 requests per minute.
pub const DEFAULT_SCENES_LIMIT: LimitPolicy = LimitPolicy::new(5, Duration::from_secs(60));

// =============================================================================
// Endpoint classes
// =============================================================================

/// Group of endpoints sharing one limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointClass {
    /// Direct image CRUD and uploads
    Images,
    /// Scene generation (cache-backed)
    Scenes,
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointClass::Images => write!(f, "images"),
            EndpointClass::Scenes => write!(f, "scenes"),
        }
    }
}

/// Per-class limit configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimits {
    pub images: LimitPolicy,
    pub scenes: LimitPolicy,
}

impl RateLimits {
    pub fn policy(&self, class: EndpointClass) -> &LimitPolicy {
        match class {
            EndpointClass::Images => &self.images,
            EndpointClass::Scenes => &self.scenes,
        }
    }
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            images: DEFAULT_IMAGES_LIMIT,
            scenes: DEFAULT_SCENES_LIMIT,
        }
    }
}

// =============================================================================
// Admission
// =============================================================================

/// Result of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Request admitted; `remaining` whole tokens are left in the bucket
    Allowed { remaining: u32 },
    /// Request denied; a token becomes available after `retry_after`
    Denied { retry_after: Duration },
}

impl Admission {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Admission::Allowed { .. })
    }
}

/// Limiter decision counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LimiterStats {
    pub allowed: u64,
    pub denied: u64,
    pub buckets: usize,
}

// =============================================================================
// Rate Limiter
// =============================================================================

type BucketKey = (String, EndpointClass);

/// Token-bucket rate limiter keyed by client and endpoint class.
///
/// Buckets live in a sharded map; an admission only locks the shard holding
/// its own bucket.
pub struct RateLimiter {
    limits: RateLimits,
    buckets: DashMap<BucketKey, TokenBucket>,
    allowed: AtomicU64,
    denied: AtomicU64,
}

impl RateLimiter {
    pub fn new(limits: RateLimits) -> Self {
        Self {
            limits,
            buckets: DashMap::new(),
            allowed: AtomicU64::new(0),
            denied: AtomicU64::new(0),
        }
    }

    pub fn limits(&self) -> &RateLimits {
        &self.limits
    }

    /// Check and consume one token for `client` on `class`.
    pub fn admit(&self, client: &str, class: EndpointClass) -> Admission {
        self.admit_at(client, class, Instant::now())
    }

    /// Like [`admit`](Self::admit), with an explicit monotonic timestamp.
    pub fn admit_at(&self, client: &str, class: EndpointClass, now: Instant) -> Admission {
        let policy = *self.limits.policy(class);

        let decision = {
            let mut bucket = self
                .buckets
                .entry((client.to_string(), class))
                .or_insert_with(|| TokenBucket::full(&policy, now));
            bucket.try_acquire(&policy, now)
        };

        match decision {
            Ok(remaining) => {
                self.allowed.fetch_add(1, Ordering::Relaxed);
                Admission::Allowed { remaining }
            }
            Err(retry_after) => {
                self.denied.fetch_add(1, Ordering::Relaxed);
                debug!(
                    client = client,
                    class = %class,
                    retry_after_ms = retry_after.as_millis() as u64,
                    "rate limit denied"
                );
                Admission::Denied { retry_after }
            }
        }
    }

    pub fn stats(&self) -> LimiterStats {
        LimiterStats {
            allowed: self.allowed.load(Ordering::Relaxed),
            denied: self.denied.load(Ordering::Relaxed),
            buckets: self.buckets.len(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(RateLimits::default())
    }
}
