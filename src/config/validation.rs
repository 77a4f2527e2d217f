//! Configuration validation

use super::*;
use crate::error::{GateError, Result};
use axum::http::HeaderName;

/// Longest token lifetime accepted from configuration: ten years
pub const MAX_EXPIRE_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Validate complete configuration
pub fn validate_config(config: &Config) -> Result<()> {
    validate_server_config(&config.server)?;
    validate_logging_config(&config.logging)?;
    validate_jwt_config(&config.jwt)?;
    validate_rate_limit_config(&config.rate_limit)?;
    Ok(())
}

fn validate_server_config(config: &ServerConfig) -> Result<()> {
    if config.port == 0 {
        return Err(GateError::Config("Server port must be greater than 0".to_string()));
    }

    if config.host.is_empty() {
        return Err(GateError::Config("Server host cannot be empty".to_string()));
    }

    Ok(())
}

fn validate_logging_config(config: &LoggingConfig) -> Result<()> {
    if config.level.is_empty() {
        return Err(GateError::Config("Log level cannot be empty".to_string()));
    }

    if !["json", "compact", "pretty"].contains(&config.format.as_str()) {
        return Err(GateError::Config(format!(
            "Unknown log format '{}' (expected json, compact or pretty)",
            config.format
        )));
    }

    Ok(())
}

fn validate_jwt_config(config: &JwtConfig) -> Result<()> {
    if config.access_key.expose_secret().is_empty() {
        return Err(GateError::Config("JWT access key is required".to_string()));
    }

    if config.refresh_key.expose_secret().is_empty() {
        return Err(GateError::Config("JWT refresh key is required".to_string()));
    }

    // Refresh tokens signed with the access key would pass as access tokens
    if config.access_key.expose_secret() == config.refresh_key.expose_secret() {
        return Err(GateError::Config(
            "JWT access and refresh keys must differ".to_string(),
        ));
    }

    if config.access_expire_secs == 0 {
        return Err(GateError::Config(
            "Access token expiry must be greater than 0".to_string(),
        ));
    }

    if config.refresh_expire_secs > MAX_EXPIRE_SECS {
        return Err(GateError::Config(format!(
            "Refresh token expiry must not exceed {} seconds",
            MAX_EXPIRE_SECS
        )));
    }

    if config.refresh_expire_secs < config.access_expire_secs {
        return Err(GateError::Config(
            "Refresh token expiry must not be shorter than access token expiry".to_string(),
        ));
    }

    for name in [&config.access_header, &config.refresh_header] {
        HeaderName::try_from(name.as_str())
            .map_err(|_| GateError::Config(format!("Invalid token header name '{}'", name)))?;
    }

    if config.ignore_paths.iter().any(|path| !path.starts_with('/')) {
        return Err(GateError::Config(
            "Ignored paths must start with '/'".to_string(),
        ));
    }

    Ok(())
}

fn validate_rate_limit_config(config: &RateLimitConfig) -> Result<()> {
    if !config.enabled {
        return Ok(());
    }

    if config.window_millis == 0 {
        return Err(GateError::Config(
            "Rate limit window must be greater than 0".to_string(),
        ));
    }

    if config.max_requests == 0 {
        return Err(GateError::Config(
            "Max requests per window must be greater than 0".to_string(),
        ));
    }

    if config.max_active == 0 {
        return Err(GateError::Config(
            "Max active requests must be greater than 0".to_string(),
        ));
    }

    if config.login_bucket_capacity == 0 {
        return Err(GateError::Config(
            "Login bucket capacity must be greater than 0".to_string(),
        ));
    }

    if config.login_refill_millis == 0 {
        return Err(GateError::Config(
            "Login bucket refill interval must be greater than 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        let mut config = Config::default_config();
        config.jwt.access_key = Secret::new("access key".to_string());
        config.jwt.refresh_key = Secret::new("refresh key".to_string());
        config
    }

    #[test]
    fn test_valid_config() {
        assert!(validate_config(&valid_config()).is_ok());
    }

    #[test]
    fn test_missing_keys() {
        let mut config = valid_config();
        config.jwt.access_key = Secret::new(String::new());
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.jwt.refresh_key = Secret::new(String::new());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_shared_key_rejected() {
        let mut config = valid_config();
        config.jwt.refresh_key = Secret::new("access key".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_expiry_rules() {
        let mut config = valid_config();
        config.jwt.access_expire_secs = 0;
        assert!(validate_config(&config).is_err());

        let mut config = valid_config();
        config.jwt.refresh_expire_secs = config.jwt.access_expire_secs - 1;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_expiry_upper_bound() {
        let mut config = valid_config();
        config.jwt.refresh_expire_secs = MAX_EXPIRE_SECS;
        assert!(validate_config(&config).is_ok());

        config.jwt.refresh_expire_secs = MAX_EXPIRE_SECS + 1;
        assert!(validate_config(&config).is_err());

        // An access expiry above the bound implies a refresh expiry above it too
        let mut config = valid_config();
        config.jwt.access_expire_secs = 10_000_000_000_000;
        config.jwt.refresh_expire_secs = 10_000_000_000_000;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_header_names() {
        let mut config = valid_config();
        config.jwt.access_header = "x access token".to_string();
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_rate_limits() {
        let mut config = valid_config();
        config.rate_limit.max_requests = 0;
        assert!(validate_config(&config).is_err());

        // Limits are not checked when rate limiting is off
        config.rate_limit.enabled = false;
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_log_format() {
        let mut config = valid_config();
        config.logging.format = "xml".to_string();
        assert!(validate_config(&config).is_err());
    }
}
