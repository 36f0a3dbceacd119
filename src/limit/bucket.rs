use std::time::{Duration, Instant};

/// Capacity and refill rate of one endpoint class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LimitPolicy {
    /// Maximum number of tokens a bucket holds
    pub capacity: u32,

    /// Time needed to refill an empty bucket to capacity
    pub refill_window: Duration,
}

impl LimitPolicy {
    pub const fn new(capacity: u32, refill_window: Duration) -> Self {
        Self {
            capacity,
            refill_window,
        }
    }

    /// Refill rate in tokens per second.
    pub fn rate_per_sec(&self) -> f64 {
        let secs = self.refill_window.as_secs_f64();
        if secs <= 0.0 {
            return f64::INFINITY;
        }
        self.capacity as f64 / secs
    }

    /// Time it takes to earn a single token.
    pub fn token_interval(&self) -> Duration {
        if self.capacity == 0 {
            return self.refill_window;
        }
        self.refill_window / self.capacity
    }
}

/// Token bucket state for a single (client, endpoint class) pair.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A new bucket starts full.
    pub fn full(policy: &LimitPolicy, now: Instant) -> Self {
        Self {
            tokens: policy.capacity as f64,
            last_refill: now,
        }
    }

    /// Refill by elapsed time, then take one token if available.
    ///
    /// Returns `Ok(remaining)` on admission or `Err(retry_after)` on denial.
    pub fn try_acquire(&mut self, policy: &LimitPolicy, now: Instant) -> Result<u32, Duration> {
        self.refill(policy, now);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(self.tokens.floor() as u32);
        }

        if policy.capacity == 0 || policy.refill_window.is_zero() {
            return Err(policy.refill_window);
        }
        let missing = 1.0 - self.tokens;
        Err(Duration::from_secs_f64(
            missing * policy.refill_window.as_secs_f64() / policy.capacity as f64,
        ))
    }

    /// Tokens currently available (after the last refill).
    pub fn tokens(&self) -> f64 {
        self.tokens
    }

    fn refill(&mut self, policy: &LimitPolicy, now: Instant) {
        // Instants supplied out of order never drain or overfill the bucket
        let elapsed = now.saturating_duration_since(self.last_refill);
        if elapsed.is_zero() {
            return;
        }

        let capacity = policy.capacity as f64;
        let window = policy.refill_window.as_secs_f64();
        self.tokens = if window <= 0.0 {
            capacity
        } else {
            (self.tokens + elapsed.as_secs_f64() * capacity / window).min(capacity)
        };
        self.last_refill = now;
    }
}
