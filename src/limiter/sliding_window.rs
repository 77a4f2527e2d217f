//! In-process sliding window limiter

use super::Limiter;
use crate::error::LimiterError;
use crate::shutdown::ShutdownNotifier;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Allows at most `threshold` requests per key within any trailing `window`.
///
/// Refused requests are not recorded, so a client hammering a closed window
/// does not extend it.
pub struct SlidingWindowLimiter {
    window: Duration,
    threshold: usize,
    records: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl SlidingWindowLimiter {
    /// Limiter admitting `threshold` requests per key in each `window`
    pub fn new(window: Duration, threshold: usize) -> Self {
        Self {
            window,
            threshold,
            records: Arc::new(DashMap::new()),
        }
    }

    /// Length of the trailing window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests admitted per key per window
    pub fn threshold(&self) -> usize {
        self.threshold
    }

    /// Requests recorded for `key` inside the current window
    pub fn usage(&self, key: &str) -> usize {
        let now = Instant::now();
        self.records
            .get(key)
            .map(|hits| hits.iter().filter(|at| now.duration_since(**at) < self.window).count())
            .unwrap_or(0)
    }

    /// Drop keys with no request inside the window, returning roughly how
    /// many went. Keys inserted concurrently can make the count low.
    pub fn cleanup_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.records.len();

        self.records.retain(|_, hits| {
            hits.back()
                .is_some_and(|last| now.duration_since(*last) < self.window)
        });

        let removed = before.saturating_sub(self.records.len());
        debug!(removed, "Cleaned up expired rate limit records");
        removed
    }

    /// Periodically run [`cleanup_expired`](Self::cleanup_expired) until shutdown
    pub fn start_cleanup_task(self: Arc<Self>, shutdown: ShutdownNotifier) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(self.window.max(Duration::from_secs(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        self.cleanup_expired();
                    }
                    _ = shutdown.wait() => {
                        debug!("Rate limit cleanup task stopped");
                        break;
                    }
                }
            }
        })
    }
}

#[async_trait]
impl Limiter for SlidingWindowLimiter {
    async fn limit(&self, key: &str) -> Result<bool, LimiterError> {
        let now = Instant::now();
        let mut entry = self.records.entry(key.to_string()).or_default();
        let hits = entry.value_mut();

        while hits
            .front()
            .is_some_and(|oldest| now.duration_since(*oldest) >= self.window)
        {
            hits.pop_front();
        }

        if hits.len() >= self.threshold {
            warn!(key, requests = hits.len(), "Rate limit exceeded");
            return Ok(true);
        }

        hits.push_back(now);
        debug!(key, requests = hits.len(), limit = self.threshold, "Request allowed");
        Ok(false)
    }
}
