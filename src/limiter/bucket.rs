//! Token bucket and leaky bucket limiters

use super::BucketLimiter;
use crate::error::LimiterError;
use crate::shutdown::{ShutdownCoordinator, ShutdownNotifier};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, TryAcquireError};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Shortest refill period; `tokio::time::interval` rejects zero
pub const MIN_REFILL_INTERVAL: Duration = Duration::from_millis(1);

/// Semaphore-backed token bucket shared by every key.
///
/// A background task adds one token per interval up to `capacity`. It is
/// started by the constructor, so construction needs a tokio runtime, and
/// it stops on [`close`](BucketLimiter::close) or drop.
pub struct TokenBucketLimiter {
    capacity: usize,
    interval: Duration,
    tokens: Arc<Semaphore>,
    shutdown: ShutdownCoordinator,
    refill_task: JoinHandle<()>,
}

impl TokenBucketLimiter {
    /// Bucket that starts full
    pub fn new(capacity: usize, interval: Duration) -> Self {
        Self::start(capacity, capacity, interval)
    }

    /// Leaky bucket: a single slot, empty at start, so requests pass at most
    /// once per `interval`
    pub fn leaky(interval: Duration) -> Self {
        Self::start(1, 0, interval)
    }

    fn start(capacity: usize, initial: usize, interval: Duration) -> Self {
        let interval = if interval < MIN_REFILL_INTERVAL {
            warn!(
                requested_ns = interval.as_nanos() as u64,
                "Token bucket refill interval too short, using 1ms"
            );
            MIN_REFILL_INTERVAL
        } else {
            interval
        };

        let tokens = Arc::new(Semaphore::new(initial));
        let shutdown = ShutdownCoordinator::new();
        let refill_task = tokio::spawn(refill(
            Arc::clone(&tokens),
            capacity,
            interval,
            shutdown.subscribe(),
        ));

        info!(capacity, interval_ms = interval.as_millis() as u64, "Token bucket started");

        Self {
            capacity,
            interval,
            tokens,
            shutdown,
            refill_task,
        }
    }

    /// Most tokens the bucket holds
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Period between refills, after clamping
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Tokens currently in the bucket
    pub fn available(&self) -> usize {
        self.tokens.available_permits()
    }

    /// Whether [`close`](BucketLimiter::close) has run
    pub fn is_closed(&self) -> bool {
        self.tokens.is_closed()
    }
}

async fn refill(tokens: Arc<Semaphore>, capacity: usize, period: Duration, shutdown: ShutdownNotifier) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                // Only this task adds permits, so the check cannot overshoot
                if tokens.available_permits() < capacity {
                    tokens.add_permits(1);
                }
            }
            _ = shutdown.wait() => {
                debug!("Token bucket refill task stopped");
                break;
            }
        }
    }
}

#[async_trait]
impl BucketLimiter for TokenBucketLimiter {
    async fn limit(&self, _key: &str) -> Result<bool, LimiterError> {
        match self.tokens.try_acquire() {
            Ok(permit) => {
                permit.forget();
                Ok(false)
            }
            Err(TryAcquireError::NoPermits) => Ok(true),
            Err(TryAcquireError::Closed) => Err(LimiterError::Closed),
        }
    }

    async fn block_limit(&self, _key: &str, timeout: Duration) -> Result<bool, LimiterError> {
        match tokio::time::timeout(timeout, self.tokens.acquire()).await {
            Ok(Ok(permit)) => {
                permit.forget();
                Ok(false)
            }
            Ok(Err(_)) => Err(LimiterError::Closed),
            Err(_) => Err(LimiterError::Timeout(timeout)),
        }
    }

    fn close(&self) {
        if !self.tokens.is_closed() {
            self.tokens.close();
            self.shutdown.shutdown();
            info!("Token bucket closed");
        }
    }
}

impl Drop for TokenBucketLimiter {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready};

    #[tokio::test(start_paused = true)]
    async fn test_bucket_starts_full_and_drains() {
        let limiter = TokenBucketLimiter::new(3, Duration::from_secs(1));
        assert_eq!(limiter.available(), 3);

        for _ in 0..3 {
            assert!(!limiter.limit("").await.unwrap());
        }
        assert!(limiter.limit("").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_never_exceeds_capacity() {
        let limiter = TokenBucketLimiter::new(2, Duration::from_millis(100));
        assert!(!limiter.limit("").await.unwrap());
        assert!(!limiter.limit("").await.unwrap());
        assert_eq!(limiter.available(), 0);

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(limiter.available(), 1);

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(limiter.available(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_leaky_bucket_starts_empty() {
        let limiter = TokenBucketLimiter::leaky(Duration::from_millis(100));
        assert_eq!(limiter.capacity(), 1);
        assert!(limiter.limit("").await.unwrap());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!limiter.limit("").await.unwrap());
        assert!(limiter.limit("").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_zero_interval_is_clamped() {
        let limiter = TokenBucketLimiter::leaky(Duration::ZERO);
        assert_eq!(limiter.interval(), MIN_REFILL_INTERVAL);

        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(!limiter.refill_task.is_finished());
        assert!(!limiter.limit("").await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_limit_waits_for_refill() {
        let limiter = TokenBucketLimiter::leaky(Duration::from_millis(100));

        let mut waiter = tokio_test::task::spawn(limiter.block_limit("", Duration::from_secs(1)));
        assert_pending!(waiter.poll());

        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(waiter.is_woken());
        let admitted = assert_ready!(waiter.poll());
        assert!(!admitted.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_limit_times_out() {
        let limiter = TokenBucketLimiter::leaky(Duration::from_secs(10));

        let err = limiter
            .block_limit("", Duration::from_millis(50))
            .await
            .unwrap_err();

        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_refill_and_fails_calls() {
        let limiter = TokenBucketLimiter::new(1, Duration::from_millis(10));
        limiter.close();
        limiter.close();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.refill_task.is_finished());
        assert!(limiter.is_closed());

        assert!(matches!(limiter.limit("").await, Err(LimiterError::Closed)));
        assert!(matches!(
            limiter.block_limit("", Duration::from_secs(1)).await,
            Err(LimiterError::Closed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_wakes_blocked_waiter() {
        let limiter = TokenBucketLimiter::leaky(Duration::from_secs(10));

        let mut waiter = tokio_test::task::spawn(limiter.block_limit("", Duration::from_secs(5)));
        assert_pending!(waiter.poll());

        limiter.close();
        assert!(waiter.is_woken());
        assert!(matches!(assert_ready!(waiter.poll()), Err(LimiterError::Closed)));
    }
}
