//! Rate limiting gates for the strategies in [`crate::limiter`]

use crate::error::LimiterError;
use crate::limiter::{ActiveLimiter, BucketLimiter, Limiter};
use axum::{
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, warn};

/// Derives the limiter key for a request
pub type KeyFn = Arc<dyn Fn(&Request) -> String + Send + Sync>;

pub const IP_LIMITER_PREFIX: &str = "ip-limiter";
pub const GLOBAL_RATE_KEY: &str = "all_req_rate_limiter";
pub const IP_RATE_PREFIX: &str = "ip_rate_limiter";
pub const GLOBAL_ACTIVE_KEY: &str = "all_req_active_limiter";
pub const IP_ACTIVE_PREFIX: &str = "ip_active_limiter";
pub const GLOBAL_BUCKET_KEY: &str = "all_req_bucket_limiter";

/// Best-effort client address: first `X-Forwarded-For` entry, then
/// `X-Real-Ip`, then the socket peer, else `unknown`
pub fn client_ip(req: &Request) -> String {
    let headers = req.headers();

    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }

    let real_ip = headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|ip| !ip.is_empty());
    if let Some(ip) = real_ip {
        return ip.to_string();
    }

    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// `<prefix>:<client ip>`
pub fn ip_key(prefix: &'static str) -> KeyFn {
    Arc::new(move |req| format!("{}:{}", prefix, client_ip(req)))
}

/// The same key for every request
pub fn global_key(key: &'static str) -> KeyFn {
    Arc::new(move |_| key.to_string())
}

fn limiter_failure(err: LimiterError) -> Response {
    if err.is_timeout() {
        warn!(error = %err, "Rate limiter timed out");
        StatusCode::GATEWAY_TIMEOUT.into_response()
    } else {
        error!(error = %err, "Rate limiter failure");
        StatusCode::INTERNAL_SERVER_ERROR.into_response()
    }
}

fn too_many_requests(key: &str) -> Response {
    debug!(key, "Request limited");
    StatusCode::TOO_MANY_REQUESTS.into_response()
}

/// Builder for a frequency gate, keyed by client IP by default
pub struct RateLimitBuilder {
    limiter: Arc<dyn Limiter>,
    key_fn: KeyFn,
}

impl RateLimitBuilder {
    /// Keys default to `ip-limiter:<client ip>`
    pub fn new(limiter: Arc<dyn Limiter>) -> Self {
        Self {
            limiter,
            key_fn: ip_key(IP_LIMITER_PREFIX),
        }
    }

    /// One shared window for every request
    pub fn global(mut self) -> Self {
        self.key_fn = global_key(GLOBAL_RATE_KEY);
        self
    }

    /// One window per client IP under `ip_rate_limiter:`, the naming used
    /// alongside the active-count keys
    pub fn by_ip(mut self) -> Self {
        self.key_fn = ip_key(IP_RATE_PREFIX);
        self
    }

    /// Derive keys with `key_fn` instead
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Freeze the builder into a cloneable gate
    pub fn build(self) -> RateGate {
        RateGate {
            inner: Arc::new(self),
        }
    }
}

/// Frequency gate shared by every request through [`rate_limit`]
#[derive(Clone)]
pub struct RateGate {
    inner: Arc<RateLimitBuilder>,
}

impl RateGate {
    /// Limiter key for `req`
    pub fn key(&self, req: &Request) -> String {
        (self.inner.key_fn)(req)
    }

    /// `Err` carries the response to send instead of running the handler
    pub async fn check(&self, key: &str) -> Result<(), Response> {
        match self.inner.limiter.limit(key).await {
            Ok(false) => Ok(()),
            Ok(true) => Err(too_many_requests(key)),
            Err(e) => Err(limiter_failure(e)),
        }
    }
}

/// Frequency limiting middleware
pub async fn rate_limit(State(gate): State<RateGate>, req: Request, next: Next) -> Response {
    // The request body is not Sync, so no borrow of it may cross an await
    let key = gate.key(&req);
    match gate.check(&key).await {
        Ok(()) => next.run(req).await,
        Err(rejection) => rejection,
    }
}

/// Builder for a concurrency gate, global by default
pub struct ActiveLimitBuilder {
    limiter: Arc<dyn ActiveLimiter>,
    key_fn: KeyFn,
}

impl ActiveLimitBuilder {
    /// Keys default to the global `all_req_active_limiter`
    pub fn new(limiter: Arc<dyn ActiveLimiter>) -> Self {
        Self {
            limiter,
            key_fn: global_key(GLOBAL_ACTIVE_KEY),
        }
    }

    /// Count in-flight requests per client IP instead of globally
    pub fn by_ip(mut self) -> Self {
        self.key_fn = ip_key(IP_ACTIVE_PREFIX);
        self
    }

    /// Derive keys with `key_fn` instead
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Freeze the builder into a cloneable gate
    pub fn build(self) -> ActiveGate {
        ActiveGate {
            inner: Arc::new(self),
        }
    }
}

/// Concurrency gate shared by every request through [`active_limit`]
#[derive(Clone)]
pub struct ActiveGate {
    inner: Arc<ActiveLimitBuilder>,
}

/// Concurrency limiting middleware.
///
/// The slot is held for the whole downstream call and released when the
/// permit drops, whether the handler returns, errors or panics.
pub async fn active_limit(State(gate): State<ActiveGate>, req: Request, next: Next) -> Response {
    let key = (gate.inner.key_fn)(&req);

    let permit = match gate.inner.limiter.acquire(&key).await {
        Ok(Some(permit)) => permit,
        Ok(None) => return too_many_requests(&key),
        Err(e) => return limiter_failure(e),
    };

    let response = next.run(req).await;
    drop(permit);
    response
}

/// Builder for a token bucket gate, global by default
pub struct BucketLimitBuilder {
    limiter: Arc<dyn BucketLimiter>,
    key_fn: KeyFn,
    block_timeout: Option<Duration>,
}

impl BucketLimitBuilder {
    /// Keys default to the global `all_req_bucket_limiter`; refuses at once
    /// unless [`blocking`](Self::blocking) is set
    pub fn new(limiter: Arc<dyn BucketLimiter>) -> Self {
        Self {
            limiter,
            key_fn: global_key(GLOBAL_BUCKET_KEY),
            block_timeout: None,
        }
    }

    /// Derive keys with `key_fn` instead
    pub fn key_fn<F>(mut self, key_fn: F) -> Self
    where
        F: Fn(&Request) -> String + Send + Sync + 'static,
    {
        self.key_fn = Arc::new(key_fn);
        self
    }

    /// Wait up to `timeout` for a token instead of refusing at once.
    /// Running out of time answers 504.
    pub fn blocking(mut self, timeout: Duration) -> Self {
        self.block_timeout = Some(timeout);
        self
    }

    /// Freeze the builder into a cloneable gate
    pub fn build(self) -> BucketGate {
        BucketGate {
            inner: Arc::new(self),
        }
    }
}

/// Token bucket gate shared by every request through [`bucket_limit`]
#[derive(Clone)]
pub struct BucketGate {
    inner: Arc<BucketLimitBuilder>,
}

impl BucketGate {
    /// Limiter key for `req`
    pub fn key(&self, req: &Request) -> String {
        (self.inner.key_fn)(req)
    }

    /// Take a token for `key`, waiting when the gate is blocking
    pub async fn check(&self, key: &str) -> Result<(), Response> {
        let inner = &self.inner;
        let decision = match inner.block_timeout {
            Some(timeout) => inner.limiter.block_limit(key, timeout).await,
            None => inner.limiter.limit(key).await,
        };

        match decision {
            Ok(false) => Ok(()),
            Ok(true) => Err(too_many_requests(key)),
            Err(e) => Err(limiter_failure(e)),
        }
    }
}

/// Token bucket middleware
pub async fn bucket_limit(State(gate): State<BucketGate>, req: Request, next: Next) -> Response {
    let key = gate.key(&req);
    match gate.check(&key).await {
        Ok(()) => next.run(req).await,
        Err(rejection) => rejection,
    }
}
