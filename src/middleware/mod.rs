//! Middleware components for request processing

pub mod auth;
pub mod rate_limit;
pub mod refresh;

pub use auth::{
    bearer_token, claims_from_request, insert_claims, require_auth, AuthError,
    AuthMiddlewareBuilder, AuthOutcome, Authenticator, Claims, ClaimsExt,
};
pub use rate_limit::{
    active_limit, bucket_limit, client_ip, rate_limit, ActiveGate, ActiveLimitBuilder, BucketGate,
    BucketLimitBuilder, RateGate, RateLimitBuilder,
};
pub use refresh::{
    json_body, refresh_handler, IssuedTokens, RefreshManager, RefreshOption, TokenSlot,
};
