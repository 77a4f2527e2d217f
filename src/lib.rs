//! Gatekeeper - JWT authentication, refresh-token rotation and rate limiting
//! middleware for axum
//!
//! ## Features
//!
//! - **Token management**: sign and verify JWTs over caller-defined claims,
//!   with an injectable clock and copy-on-write options
//! - **Authentication**: bearer-token middleware with path exemptions and
//!   claims propagation through request extensions
//! - **Refresh**: trade a refresh token for a new access token, optionally
//!   rotating the refresh token too
//! - **Rate limiting**: sliding window, in-flight cap and token bucket gates,
//!   in-process or backed by Redis (`redis` feature)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use gatekeeper::prelude::*;
//! use axum::{routing::get, Router};
//! use serde::{Deserialize, Serialize};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct UserClaims {
//!     uid: i64,
//!     #[serde(flatten)]
//!     registered: RegisteredClaims,
//! }
//!
//! impl StandardClaims for UserClaims {
//!     fn registered(&self) -> &RegisteredClaims {
//!         &self.registered
//!     }
//!
//!     fn registered_mut(&mut self) -> &mut RegisteredClaims {
//!         &mut self.registered
//!     }
//! }
//!
//! async fn profile(Claims(user): Claims<UserClaims>) -> String {
//!     user.uid.to_string()
//! }
//!
//! let manager = Arc::new(JwtManager::new("access key", Duration::from_secs(600)));
//! let auth = AuthMiddlewareBuilder::<UserClaims>::new(manager).build();
//!
//! let app: Router = Router::new()
//!     .route("/profile", get(profile))
//!     .layer(axum::middleware::from_fn_with_state(auth, require_auth::<UserClaims>));
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod limiter;
pub mod middleware;
pub mod observability;
pub mod server;
pub mod shutdown;
pub mod token;

#[cfg(test)]
pub(crate) mod testing;

pub use config::Config;
pub use error::{GateError, Result};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::config::Config;
    pub use crate::error::{GateError, LimiterError, Result, TokenError};
    pub use crate::limiter::{
        ActiveLimiter, ActivePermit, BucketLimiter, Limiter, LocalActiveLimiter,
        SlidingWindowLimiter, TokenBucketLimiter,
    };
    pub use crate::middleware::{
        active_limit, bucket_limit, rate_limit, refresh_handler, require_auth,
        ActiveLimitBuilder, AuthMiddlewareBuilder, Authenticator, BucketLimitBuilder, Claims,
        RateLimitBuilder, RefreshManager, RefreshOption,
    };
    pub use crate::token::{
        JwtManager, ManagerOption, RegisteredClaims, StandardClaims, TokenManager, VerifyOption,
    };
}
