//! Configuration management for the gatekeeper server

use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

pub mod loader;
pub mod validation;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    pub jwt: JwtConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server port
    #[serde(default = "default_server_port")]
    pub port: u16,

    /// Server host
    #[serde(default = "default_server_host")]
    pub host: String,

    /// Maximum request body size in MB (0 = unlimited)
    #[serde(default = "default_max_body_size")]
    pub max_body_size_mb: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level or `EnvFilter` directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: json, compact or pretty
    #[serde(default = "default_log_format")]
    pub format: String,
}

/// Token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret for access tokens (secured)
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    pub access_key: Secret<String>,

    /// HMAC secret for refresh tokens (secured)
    #[serde(serialize_with = "serialize_secret", deserialize_with = "deserialize_secret")]
    pub refresh_key: Secret<String>,

    /// Access token lifetime in seconds
    #[serde(default = "default_access_expire")]
    pub access_expire_secs: u64,

    /// Refresh token lifetime in seconds
    #[serde(default = "default_refresh_expire")]
    pub refresh_expire_secs: u64,

    /// Value stamped into `iss`; empty omits the claim
    #[serde(default)]
    pub issuer: String,

    /// Issue a new refresh token on every refresh
    #[serde(default)]
    pub rotate_refresh_token: bool,

    /// Response header carrying new access tokens
    #[serde(default = "default_access_header")]
    pub access_header: String,

    /// Response header carrying new refresh tokens
    #[serde(default = "default_refresh_header")]
    pub refresh_header: String,

    /// Request paths served without an access token
    #[serde(default = "default_ignore_paths")]
    pub ignore_paths: Vec<String>,
}

impl JwtConfig {
    /// Access token lifetime
    pub fn access_expire(&self) -> Duration {
        Duration::from_secs(self.access_expire_secs)
    }

    /// Refresh token lifetime
    pub fn refresh_expire(&self) -> Duration {
        Duration::from_secs(self.refresh_expire_secs)
    }
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Whether to enable rate limiting
    #[serde(default = "default_rate_limit_enabled")]
    pub enabled: bool,

    /// Sliding window length in milliseconds
    #[serde(default = "default_window_millis")]
    pub window_millis: u64,

    /// Requests allowed per client IP within one window
    #[serde(default = "default_max_requests")]
    pub max_requests: usize,

    /// Requests allowed in flight across the whole server
    #[serde(default = "default_max_active")]
    pub max_active: usize,

    /// Token bucket size guarding the login endpoint
    #[serde(default = "default_bucket_capacity")]
    pub login_bucket_capacity: usize,

    /// Milliseconds between bucket refills
    #[serde(default = "default_bucket_refill")]
    pub login_refill_millis: u64,

    /// How long a login waits for a token before answering 504
    #[serde(default = "default_block_timeout")]
    pub login_block_timeout_millis: u64,
}

impl RateLimitConfig {
    /// Sliding window length
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_millis)
    }

    /// Period between login bucket refills
    pub fn login_refill_interval(&self) -> Duration {
        Duration::from_millis(self.login_refill_millis)
    }

    /// How long `/login` waits for a bucket token
    pub fn login_block_timeout(&self) -> Duration {
        Duration::from_millis(self.login_block_timeout_millis)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_server_port(),
            host: default_server_host(),
            max_body_size_mb: default_max_body_size(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_rate_limit_enabled(),
            window_millis: default_window_millis(),
            max_requests: default_max_requests(),
            max_active: default_max_active(),
            login_bucket_capacity: default_bucket_capacity(),
            login_refill_millis: default_bucket_refill(),
            login_block_timeout_millis: default_block_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        loader::load_config(path)
    }

    /// Load configuration with `GATEKEEPER__` environment overrides
    pub fn from_file_with_env<P: AsRef<Path>>(path: P) -> crate::error::Result<Self> {
        loader::load_config_with_env(path)
    }

    /// Validate this configuration
    pub fn validate(&self) -> crate::error::Result<()> {
        validation::validate_config(self)
    }

    /// Create default configuration; keys come from `GATEKEEPER_ACCESS_KEY`
    /// and `GATEKEEPER_REFRESH_KEY` when set
    pub fn default_config() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            jwt: JwtConfig {
                access_key: Secret::new(std::env::var("GATEKEEPER_ACCESS_KEY").unwrap_or_default()),
                refresh_key: Secret::new(std::env::var("GATEKEEPER_REFRESH_KEY").unwrap_or_default()),
                access_expire_secs: default_access_expire(),
                refresh_expire_secs: default_refresh_expire(),
                issuer: String::new(),
                rotate_refresh_token: false,
                access_header: default_access_header(),
                refresh_header: default_refresh_header(),
                ignore_paths: default_ignore_paths(),
            },
            rate_limit: RateLimitConfig::default(),
        }
    }
}

fn serialize_secret<S>(secret: &Secret<String>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: serde::Serializer,
{
    serializer.serialize_str(secret.expose_secret())
}

fn deserialize_secret<'de, D>(deserializer: D) -> Result<Secret<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(Secret::new(s))
}

// Default value functions
fn default_server_port() -> u16 { 8080 }
fn default_server_host() -> String { "0.0.0.0".to_string() }
fn default_max_body_size() -> usize { 1 }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "pretty".to_string() }
fn default_access_expire() -> u64 { 600 }
fn default_refresh_expire() -> u64 { 86_400 }
fn default_access_header() -> String { "x-access-token".to_string() }
fn default_refresh_header() -> String { "x-refresh-token".to_string() }
fn default_ignore_paths() -> Vec<String> {
    ["/", "/health", "/login", "/refresh-token"]
        .into_iter()
        .map(String::from)
        .collect()
}
fn default_rate_limit_enabled() -> bool { true }
fn default_window_millis() -> u64 { 1000 }
fn default_max_requests() -> usize { 1000 }
fn default_max_active() -> usize { 100 }
fn default_bucket_capacity() -> usize { 10 }
fn default_bucket_refill() -> u64 { 100 }
fn default_block_timeout() -> u64 { 500 }
