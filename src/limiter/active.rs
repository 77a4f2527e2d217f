//! In-process concurrency limiter

use super::{ActiveLimiter, ActivePermit};
use crate::error::LimiterError;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

/// Caps in-flight requests per key
#[derive(Clone)]
pub struct LocalActiveLimiter {
    max_active: usize,
    active: Arc<DashMap<String, usize>>,
}

impl LocalActiveLimiter {
    /// Limiter admitting `max_active` concurrent requests per key
    pub fn new(max_active: usize) -> Self {
        Self {
            max_active,
            active: Arc::new(DashMap::new()),
        }
    }

    pub fn max_active(&self) -> usize {
        self.max_active
    }

    /// Slots currently held for `key`
    pub fn active(&self, key: &str) -> usize {
        self.active.get(key).map(|count| *count).unwrap_or(0)
    }
}

fn release(active: &DashMap<String, usize>, key: &str) {
    if let Entry::Occupied(mut entry) = active.entry(key.to_string()) {
        if *entry.get() <= 1 {
            entry.remove();
        } else {
            *entry.get_mut() -= 1;
        }
    }
}

#[async_trait]
impl ActiveLimiter for LocalActiveLimiter {
    async fn acquire(&self, key: &str) -> Result<Option<ActivePermit>, LimiterError> {
        {
            let mut count = self.active.entry(key.to_string()).or_insert(0);
            if *count >= self.max_active {
                debug!(key, active = *count, "Active request limit reached");
                return Ok(None);
            }
            *count += 1;
        }

        let active = Arc::clone(&self.active);
        let key = key.to_string();
        Ok(Some(ActivePermit::new(move || release(&active, &key))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_capacity_and_release() {
        let limiter = LocalActiveLimiter::new(2);

        let first = limiter.acquire("k").await.unwrap();
        let second = limiter.acquire("k").await.unwrap();
        assert!(first.is_some() && second.is_some());
        assert!(limiter.acquire("k").await.unwrap().is_none());
        assert_eq!(limiter.active("k"), 2);

        drop(first);
        assert_eq!(limiter.active("k"), 1);

        let third = limiter.acquire("k").await.unwrap();
        assert!(third.is_some());

        drop(second);
        drop(third);
        assert_eq!(limiter.active("k"), 0);
        assert!(limiter.active.is_empty());
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = LocalActiveLimiter::new(1);

        let _a = limiter.acquire("a").await.unwrap().unwrap();
        assert!(limiter.acquire("a").await.unwrap().is_none());
        assert!(limiter.acquire("b").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_sequential_requests_never_refused() {
        let limiter = LocalActiveLimiter::new(1);

        for _ in 0..100 {
            let permit = limiter.acquire("k").await.unwrap();
            assert!(permit.is_some());
        }
        assert_eq!(limiter.active("k"), 0);
    }

    #[tokio::test]
    async fn test_concurrent_acquire_respects_capacity() {
        let limiter = LocalActiveLimiter::new(5);
        let mut handles = Vec::new();

        for _ in 0..50 {
            let limiter = limiter.clone();
            handles.push(tokio::spawn(async move { limiter.acquire("k").await.unwrap() }));
        }

        let mut held = Vec::new();
        for handle in handles {
            if let Some(permit) = handle.await.unwrap() {
                held.push(permit);
            }
        }

        assert_eq!(held.len(), 5);
        assert_eq!(limiter.active("k"), 5);
        held.clear();
        assert_eq!(limiter.active("k"), 0);
    }
}
