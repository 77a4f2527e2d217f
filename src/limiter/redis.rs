//! Redis-backed limiters, shared by every process pointing at the same server

use super::{ActiveLimiter, ActivePermit, Limiter};
use crate::error::LimiterError;
use async_trait::async_trait;
use ::redis::aio::ConnectionManager;
use ::redis::{AsyncCommands, Script};
use std::time::Duration;
use tracing::{debug, error, warn};

const SLIDING_WINDOW_SCRIPT: &str = r#"
local key = KEYS[1]
local window = tonumber(ARGV[1])
local threshold = tonumber(ARGV[2])
local now = tonumber(ARGV[3])
local member = ARGV[4]

redis.call('ZREMRANGEBYSCORE', key, '-inf', now - window)
local count = redis.call('ZCARD', key)
if count >= threshold then
    return 1
end

redis.call('ZADD', key, now, member)
redis.call('PEXPIRE', key, window)
return 0
"#;

const ACQUIRE_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current > tonumber(ARGV[1]) then
    redis.call('DECR', KEYS[1])
    return 0
end
return 1
"#;

/// Connect a [`ConnectionManager`] for the limiters below
pub async fn connect(url: &str) -> Result<ConnectionManager, LimiterError> {
    let client = ::redis::Client::open(url)?;
    Ok(ConnectionManager::new(client).await?)
}

/// Sliding window over a sorted set of request timestamps (milliseconds)
pub struct RedisSlidingWindowLimiter {
    conn: ConnectionManager,
    window: Duration,
    threshold: usize,
    script: Script,
}

impl RedisSlidingWindowLimiter {
    /// Window of `window` admitting `threshold` requests per key
    pub fn new(conn: ConnectionManager, window: Duration, threshold: usize) -> Self {
        Self {
            conn,
            window,
            threshold,
            script: Script::new(SLIDING_WINDOW_SCRIPT),
        }
    }
}

#[async_trait]
impl Limiter for RedisSlidingWindowLimiter {
    async fn limit(&self, key: &str) -> Result<bool, LimiterError> {
        let mut conn = self.conn.clone();
        let now = chrono::Utc::now().timestamp_millis();
        // Unique member so simultaneous requests are all counted
        let member = format!("{}-{}", now, uuid::Uuid::new_v4());

        let limited: i64 = self
            .script
            .key(key)
            .arg(self.window.as_millis() as u64)
            .arg(self.threshold)
            .arg(now)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        if limited == 1 {
            warn!(key, "Rate limit exceeded");
        }
        Ok(limited == 1)
    }
}

/// In-flight counter kept with INCR/DECR
pub struct RedisActiveLimiter {
    conn: ConnectionManager,
    max_active: usize,
    script: Script,
}

impl RedisActiveLimiter {
    /// Counter admitting `max_active` concurrent requests per key
    pub fn new(conn: ConnectionManager, max_active: usize) -> Self {
        Self {
            conn,
            max_active,
            script: Script::new(ACQUIRE_SCRIPT),
        }
    }
}

#[async_trait]
impl ActiveLimiter for RedisActiveLimiter {
    async fn acquire(&self, key: &str) -> Result<Option<ActivePermit>, LimiterError> {
        let mut conn = self.conn.clone();
        let admitted: i64 = self
            .script
            .key(key)
            .arg(self.max_active)
            .invoke_async(&mut conn)
            .await?;

        if admitted == 0 {
            debug!(key, "Active request limit reached");
            return Ok(None);
        }

        let key = key.to_string();
        Ok(Some(ActivePermit::new(move || release(conn, key))))
    }
}

/// Decrement in the background; drop cannot await
fn release(mut conn: ConnectionManager, key: String) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(async move {
                if let Err(e) = conn.decr::<_, _, i64>(&key, 1).await {
                    error!(key = %key, error = %e, "Failed to release active request slot");
                }
            });
        }
        Err(_) => error!(key = %key, "No runtime to release active request slot"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REDIS_URL: &str = "redis://127.0.0.1:6379";

    fn unique_key(prefix: &str) -> String {
        format!("{}:{}", prefix, uuid::Uuid::new_v4())
    }

    #[tokio::test]
    #[ignore] // Requires a local Redis
    async fn test_redis_sliding_window() {
        let conn = connect(REDIS_URL).await.unwrap();
        let limiter = RedisSlidingWindowLimiter::new(conn, Duration::from_millis(500), 2);
        let key = unique_key("ip-limiter");

        assert!(!limiter.limit(&key).await.unwrap());
        assert!(!limiter.limit(&key).await.unwrap());
        assert!(limiter.limit(&key).await.unwrap());

        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(!limiter.limit(&key).await.unwrap());
    }

    #[tokio::test]
    #[ignore] // Requires a local Redis
    async fn test_redis_active_limiter_releases_on_drop() {
        let conn = connect(REDIS_URL).await.unwrap();
        let limiter = RedisActiveLimiter::new(conn.clone(), 1);
        let key = unique_key("ip_active_limiter");

        let permit = limiter.acquire(&key).await.unwrap();
        assert!(permit.is_some());
        assert!(limiter.acquire(&key).await.unwrap().is_none());

        drop(permit);
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut conn = conn;
        let active: i64 = conn.get(&key).await.unwrap();
        assert_eq!(active, 0);
        assert!(limiter.acquire(&key).await.unwrap().is_some());
    }
}
