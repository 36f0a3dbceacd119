//! Admission control.
//!
//! Every inbound request passes the [`RateLimiter`] before any cache or
//! storage work happens. Limits are token buckets, one per
//! (client, endpoint class) pair:
//!
//! ```text
//!            admit(client, class)
//!                    │
//!                    ▼
//! ┌─────────────────────────────────────────┐
//! │               RateLimiter               │
//! │  ┌───────────────┐   ┌───────────────┐  │
//! │  │ (alice,scenes)│   │ (bob, images) │  │
//! │  │  TokenBucket  │   │  TokenBucket  │  │
//! │  └───────────────┘   └───────────────┘  │
//! └─────────────────────────────────────────┘
//! ```
//!
//! Buckets are created lazily and each sits behind its own lock, so two
//! clients never contend with each other.

mod bucket;
mod limiter;

pub use bucket::{LimitPolicy, TokenBucket};
pub use limiter::{Admission, EndpointClass, LimiterStats, RateLimiter, RateLimits};
