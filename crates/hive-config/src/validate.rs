//! Post-merge validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::HiveConfig;

/// Longest long-poll wait a client may request, in seconds.
pub const MAX_WAIT_TIMEOUT_SECS: u64 = 60;

const LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];
const LOG_FORMATS: &[&str] = &["pretty", "compact", "json"];

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

/// Check ranges and cross-field rules.
///
/// # Errors
///
/// Returns the first [`ConfigError::ValidationError`] found.
pub fn validate(config: &HiveConfig) -> ConfigResult<()> {
    validate_rpc(config)?;
    validate_subscriptions(config)?;
    validate_socket(config)?;
    validate_logging(config)?;
    Ok(())
}

fn validate_rpc(config: &HiveConfig) -> ConfigResult<()> {
    if config.rpc.workers == 0 {
        return Err(invalid("rpc.workers", "at least one worker is required"));
    }
    if config.rpc.request_timeout_secs == 0 {
        return Err(invalid("rpc.request_timeout_secs", "must be positive"));
    }
    if config.rpc.ping_attempts == 0 {
        return Err(invalid("rpc.ping_attempts", "must be positive"));
    }
    Ok(())
}

fn validate_subscriptions(config: &HiveConfig) -> ConfigResult<()> {
    let s = &config.subscriptions;
    if s.max_poll_tasks == 0 {
        return Err(invalid(
            "subscriptions.max_poll_tasks",
            "at least one poll task is required",
        ));
    }
    if s.wait_timeout_secs > MAX_WAIT_TIMEOUT_SECS {
        return Err(invalid(
            "subscriptions.wait_timeout_secs",
            format!(
                "{} exceeds the {MAX_WAIT_TIMEOUT_SECS} second maximum",
                s.wait_timeout_secs
            ),
        ));
    }
    Ok(())
}

fn validate_socket(config: &HiveConfig) -> ConfigResult<()> {
    let s = &config.socket;
    if !(s.url.starts_with("ws://") || s.url.starts_with("wss://")) {
        return Err(invalid(
            "socket.url",
            format!("'{}' is not a ws:// or wss:// url", s.url),
        ));
    }
    if s.heartbeat_interval_secs == 0 {
        return Err(invalid("socket.heartbeat_interval_secs", "must be positive"));
    }
    if s.heartbeat_miss_limit < 2 {
        return Err(invalid(
            "socket.heartbeat_miss_limit",
            "must allow at least two missed heartbeats",
        ));
    }
    if s.response_timeout_secs == 0 {
        return Err(invalid("socket.response_timeout_secs", "must be positive"));
    }
    if s.reconnect_base_ms > s.reconnect_max_ms {
        return Err(invalid(
            "socket.reconnect_base_ms",
            "must not exceed socket.reconnect_max_ms",
        ));
    }
    Ok(())
}

fn validate_logging(config: &HiveConfig) -> ConfigResult<()> {
    let level = config.logging.level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unknown level '{}'; expected one of: {}",
                config.logging.level,
                LOG_LEVELS.join(", ")
            ),
        ));
    }
    let format = config.logging.format.to_ascii_lowercase();
    if !LOG_FORMATS.contains(&format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!("unknown format '{}'", config.logging.format),
        ));
    }
    Ok(())
}
