//! Error types for the gatekeeper middleware

use thiserror::Error;

/// Result type alias for gatekeeper operations
pub type Result<T> = std::result::Result<T, GateError>;

/// Main error type for the crate
#[derive(Error, Debug)]
pub enum GateError {
    #[error("Token error: {0}")]
    Token(#[from] TokenError),

    #[error("Limiter error: {0}")]
    Limiter(#[from] LimiterError),

    #[error("Authentication error: {0}")]
    Auth(#[from] crate::middleware::AuthError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Errors produced while generating or verifying a token
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("Token is malformed: {0}")]
    Malformed(String),

    #[error("Token signature is invalid")]
    SignatureInvalid,

    #[error("Token has expired")]
    Expired,

    #[error("Token is not valid yet")]
    NotYetValid,

    #[error("Token claims do not match the expected shape: {0}")]
    ClaimsTypeMismatch(String),

    #[error("Token claim `{0}` does not match the expected value")]
    InvalidClaim(&'static str),

    #[error("Failed to generate token: {0}")]
    Generation(String),
}

/// Errors reported by a rate limiting strategy
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LimiterError {
    #[error("Limiter backend failure: {0}")]
    Backend(String),

    #[error("Timed out after {0:?} waiting for capacity")]
    Timeout(std::time::Duration),

    #[error("Limiter has been closed")]
    Closed,
}

impl LimiterError {
    /// Whether the error stems from a deadline rather than a backend fault
    pub fn is_timeout(&self) -> bool {
        matches!(self, LimiterError::Timeout(_))
    }
}

#[cfg(feature = "redis")]
impl From<redis::RedisError> for LimiterError {
    fn from(err: redis::RedisError) -> Self {
        LimiterError::Backend(err.to_string())
    }
}

impl From<config::ConfigError> for GateError {
    fn from(err: config::ConfigError) -> Self {
        GateError::Config(err.to_string())
    }
}
