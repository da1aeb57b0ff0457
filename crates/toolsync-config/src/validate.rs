//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::Config;

/// Validate a fully-merged and deserialized configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &Config) -> ConfigResult<()> {
    validate_cache(config)?;
    validate_git(config)?;
    validate_http(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_cache(config: &Config) -> ConfigResult<()> {
    let c = &config.cache;

    if c.ttl_secs == 0 {
        return Err(invalid("cache.ttl_secs", "ttl_secs must be greater than 0"));
    }

    if c.url_ttl_secs == 0 {
        return Err(invalid(
            "cache.url_ttl_secs",
            "url_ttl_secs must be greater than 0",
        ));
    }

    if let Some(dir) = &c.dir
        && dir.as_os_str().is_empty()
    {
        return Err(invalid("cache.dir", "dir must not be empty when set"));
    }

    Ok(())
}

fn validate_git(config: &Config) -> ConfigResult<()> {
    let g = &config.git;

    if g.timeout_secs == 0 {
        return Err(invalid("git.timeout_secs", "timeout_secs must be greater than 0"));
    }

    if g.depth == 0 {
        return Err(invalid("git.depth", "depth must be greater than 0"));
    }

    if let Some(var) = &g.token_env
        && (var.is_empty() || var.contains('='))
    {
        return Err(invalid(
            "git.token_env",
            format!("'{var}' is not a valid environment variable name"),
        ));
    }

    Ok(())
}

fn validate_http(config: &Config) -> ConfigResult<()> {
    let h = &config.http;

    if h.timeout_secs == 0 {
        return Err(invalid("http.timeout_secs", "timeout_secs must be greater than 0"));
    }

    if h.user_agent.trim().is_empty() {
        return Err(invalid("http.user_agent", "user_agent must not be empty"));
    }

    Ok(())
}

fn validate_logging(config: &Config) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}
