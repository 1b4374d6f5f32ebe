use rustc_hash::FxHashSet;

use super::{AppConfig, ConfigError};

/// Validate the full application config, returning an error if any rule is violated.
///
/// # Errors
///
/// Returns [`ConfigError::Validation`] when any configuration invariant is violated.
pub fn validate_config(config: &AppConfig) -> Result<(), ConfigError> {
    validate_server_config(config)?;
    validate_allowed_keys(config)?;
    validate_backend(config)?;
    validate_accounts(config)?;
    validate_failover(config)?;
    validate_log_level(config)?;
    Ok(())
}

fn validation_err(msg: impl Into<String>) -> ConfigError {
    ConfigError::Validation(msg.into())
}

fn validate_server_config(config: &AppConfig) -> Result<(), ConfigError> {
    let server = &config.server;
    if let Some(worker_threads) = server.runtime_worker_threads {
        if worker_threads == 0 {
            return Err(validation_err(
                "server.runtime_worker_threads must be greater than 0 when set",
            ));
        }
    }
    if server.body_limit_bytes == 0 {
        return Err(validation_err(
            "server.body_limit_bytes must be greater than 0",
        ));
    }
    Ok(())
}

fn validate_allowed_keys(config: &AppConfig) -> Result<(), ConfigError> {
    let auth = &config.client_authentication;
    if auth.allowed_keys.is_empty() {
        return Err(validation_err("allowed_keys cannot be empty"));
    }
    for key in &auth.allowed_keys {
        if key.trim().is_empty() {
            return Err(validation_err("allowed_keys contains an empty key"));
        }
    }
    for key in auth.key_groups.keys() {
        if !auth.allowed_keys.contains(key) {
            return Err(validation_err(
                "key_groups references a key that is not in allowed_keys",
            ));
        }
    }
    Ok(())
}

fn validate_http_url(field: &str, value: &str) -> Result<(), ConfigError> {
    let parsed = url::Url::parse(value)
        .map_err(|err| validation_err(format!("{field}: invalid URL '{value}': {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(validation_err(format!(
            "{field}: must start with http:// or https://"
        )));
    }
    Ok(())
}

fn validate_backend(config: &AppConfig) -> Result<(), ConfigError> {
    let backend = &config.backend;
    validate_http_url("backend.base_url", &backend.base_url)?;
    validate_http_url("backend.refresh_url", &backend.refresh_url)?;
    if let Some(proxy) = backend.proxy.as_deref() {
        let parsed = url::Url::parse(proxy)
            .map_err(|err| validation_err(format!("backend.proxy: invalid URL: {err}")))?;
        if !matches!(parsed.scheme(), "http" | "https" | "socks5" | "socks5h") {
            return Err(validation_err(
                "backend.proxy: scheme must be http, https, socks5, or socks5h",
            ));
        }
    }
    if backend.request_timeout_secs == 0 || backend.stream_idle_timeout_secs == 0 {
        return Err(validation_err("backend timeouts must be greater than 0"));
    }
    if backend.refresh_timeout_secs <= backend.request_timeout_secs {
        return Err(validation_err(
            "backend.refresh_timeout_secs must be longer than backend.request_timeout_secs",
        ));
    }
    Ok(())
}

fn validate_accounts(config: &AppConfig) -> Result<(), ConfigError> {
    let mut seen = FxHashSet::default();
    for account in &config.accounts {
        if account.id.trim().is_empty() {
            return Err(validation_err("accounts contains an empty id"));
        }
        if !seen.insert(account.id.as_str()) {
            return Err(validation_err(format!(
                "Duplicate account id '{}'",
                account.id
            )));
        }
        if account.refresh_token.trim().is_empty() {
            return Err(validation_err(format!(
                "Account '{}': refresh_token cannot be empty",
                account.id
            )));
        }
    }
    Ok(())
}

fn validate_failover(config: &AppConfig) -> Result<(), ConfigError> {
    if config.failover.max_attempts == 0 {
        return Err(validation_err(
            "failover.max_attempts must be greater than 0",
        ));
    }
    Ok(())
}

const VALID_LOG_LEVELS: &[&str] = &[
    "DEBUG", "INFO", "WARNING", "WARN", "ERROR", "CRITICAL", "DISABLED",
];

fn validate_log_level(config: &AppConfig) -> Result<(), ConfigError> {
    let level = config.features.log_level.to_uppercase();
    if !VALID_LOG_LEVELS.contains(&level.as_str()) {
        return Err(validation_err(format!(
            "Unknown log_level '{}'. Must be one of: {}",
            config.features.log_level,
            VALID_LOG_LEVELS.join(", ")
        )));
    }
    Ok(())
}
