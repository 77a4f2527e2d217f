//! Rate limiting primitives.
//!
//! Three contracts, each consumed by a matching middleware gate:
//!
//! - [`Limiter`]: frequency check per key ("should this request be refused?")
//! - [`ActiveLimiter`]: bounded concurrency per key, released through an
//!   [`ActivePermit`] guard
//! - [`BucketLimiter`]: token bucket with optional blocking acquisition
//!
//! Implementations live in-process on [`dashmap`] and [`tokio`] primitives,
//! with Redis-backed variants behind the `redis` feature.

pub mod active;
pub mod bucket;
#[cfg(feature = "redis")]
pub mod redis;
pub mod sliding_window;

use crate::error::LimiterError;
use async_trait::async_trait;
use std::time::Duration;

pub use active::LocalActiveLimiter;
pub use bucket::TokenBucketLimiter;
#[cfg(feature = "redis")]
pub use self::redis::{RedisActiveLimiter, RedisSlidingWindowLimiter};
pub use sliding_window::SlidingWindowLimiter;

/// Frequency limiter
#[async_trait]
pub trait Limiter: Send + Sync {
    /// `Ok(true)` means the request for `key` must be refused
    async fn limit(&self, key: &str) -> Result<bool, LimiterError>;
}

/// Concurrency limiter
#[async_trait]
pub trait ActiveLimiter: Send + Sync {
    /// Try to occupy a slot for `key`.
    ///
    /// `Ok(None)` means the key is at capacity. The slot is held until the
    /// returned permit is dropped.
    async fn acquire(&self, key: &str) -> Result<Option<ActivePermit>, LimiterError>;
}

/// Token bucket limiter
#[async_trait]
pub trait BucketLimiter: Send + Sync {
    /// Take a token without waiting; `Ok(true)` means none was available
    async fn limit(&self, key: &str) -> Result<bool, LimiterError>;

    /// Wait up to `timeout` for a token.
    ///
    /// Running out of time is an error ([`LimiterError::Timeout`]), not a
    /// plain refusal.
    async fn block_limit(&self, key: &str, timeout: Duration) -> Result<bool, LimiterError>;

    /// Stop background work. Later calls fail with [`LimiterError::Closed`].
    fn close(&self);
}

/// A held concurrency slot, released exactly once when dropped.
///
/// Dropping also happens while unwinding, so a panicking handler still
/// frees its slot.
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct ActivePermit {
    release: Option<Box<dyn FnOnce() + Send>>,
}

impl ActivePermit {
    /// Permit that runs `release` once when dropped
    pub fn new<F>(release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            release: Some(Box::new(release)),
        }
    }
}

impl Drop for ActivePermit {
    fn drop(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl std::fmt::Debug for ActivePermit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivePermit")
            .field("held", &self.release.is_some())
            .finish()
    }
}
