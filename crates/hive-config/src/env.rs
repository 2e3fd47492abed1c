//! Environment variable fallbacks.
//!
//! A variable only fills a field no config file set; files always win.

use std::collections::{HashMap, HashSet};

use crate::error::{ConfigError, ConfigResult};

/// Binds an environment variable to a dotted config path.
#[derive(Debug, Clone, Copy)]
pub struct EnvMapping {
    /// Variable name.
    pub var_name: &'static str,
    /// Dotted field path, e.g. `rpc.workers`.
    pub field_path: &'static str,
}

/// Every recognized variable.
pub const ENV_MAPPINGS: &[EnvMapping] = &[
    EnvMapping {
        var_name: "HIVE_RPC_WORKERS",
        field_path: "rpc.workers",
    },
    EnvMapping {
        var_name: "HIVE_RPC_REQUEST_TIMEOUT_SECS",
        field_path: "rpc.request_timeout_secs",
    },
    EnvMapping {
        var_name: "HIVE_SUBSCRIPTIONS_MAX_POLL_TASKS",
        field_path: "subscriptions.max_poll_tasks",
    },
    EnvMapping {
        var_name: "HIVE_WAIT_TIMEOUT_SECS",
        field_path: "subscriptions.wait_timeout_secs",
    },
    EnvMapping {
        var_name: "HIVE_SOCKET_URL",
        field_path: "socket.url",
    },
    EnvMapping {
        var_name: "HIVE_SOCKET_BIND",
        field_path: "socket.bind",
    },
    EnvMapping {
        var_name: "HIVE_HEARTBEAT_INTERVAL_SECS",
        field_path: "socket.heartbeat_interval_secs",
    },
    EnvMapping {
        var_name: "HIVE_LOG_LEVEL",
        field_path: "logging.level",
    },
];

/// Snapshot of the `HIVE_*` variables in the process environment.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(name, _)| name.starts_with("HIVE_"))
        .collect()
}

/// Apply mapped variables to fields not present in `file_set`.
///
/// The replacement keeps the TOML type of the value it overwrites, so
/// `HIVE_RPC_WORKERS=5` lands as an integer.
///
/// Returns the number of fields filled.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] when a value cannot be converted.
pub fn apply_env_fallbacks(
    merged: &mut toml::Value,
    file_set: &HashSet<String>,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<usize> {
    let mut applied = 0usize;
    for mapping in ENV_MAPPINGS {
        let Some(raw) = env_vars.get(mapping.var_name) else {
            continue;
        };
        if file_set.contains(mapping.field_path) {
            tracing::debug!(
                var = mapping.var_name,
                field = mapping.field_path,
                "field set by a config file, ignoring environment"
            );
            continue;
        }
        let segments: Vec<&str> = mapping.field_path.split('.').collect();
        let Some(slot) = get_nested_mut(merged, &segments) else {
            continue;
        };
        *slot = convert(mapping.var_name, raw, slot)?;
        applied = applied.saturating_add(1);
    }
    Ok(applied)
}

fn get_nested_mut<'a>(val: &'a mut toml::Value, path: &[&str]) -> Option<&'a mut toml::Value> {
    let mut current = val;
    for segment in path {
        current = current.as_table_mut()?.get_mut(*segment)?;
    }
    Some(current)
}

fn convert(var: &str, raw: &str, like: &toml::Value) -> ConfigResult<toml::Value> {
    let invalid = |message: String| ConfigError::EnvError {
        var: var.to_owned(),
        message,
    };
    match like {
        toml::Value::Integer(_) => raw
            .trim()
            .parse::<i64>()
            .map(toml::Value::Integer)
            .map_err(|e| invalid(format!("expected an integer: {e}"))),
        toml::Value::Boolean(_) => raw
            .trim()
            .parse::<bool>()
            .map(toml::Value::Boolean)
            .map_err(|e| invalid(format!("expected a boolean: {e}"))),
        _ => Ok(toml::Value::String(raw.to_owned())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> toml::Value {
        toml::from_str(
            r#"
            [rpc]
            workers = 3
            [logging]
            level = "info"
            "#,
        )
        .unwrap()
    }

    #[test]
    fn test_env_fills_unset_field_with_type() {
        let mut merged = base();
        let env = HashMap::from([("HIVE_RPC_WORKERS".to_owned(), "7".to_owned())]);
        let applied = apply_env_fallbacks(&mut merged, &HashSet::new(), &env).unwrap();
        assert_eq!(applied, 1);
        assert_eq!(merged["rpc"]["workers"].as_integer(), Some(7));
    }

    #[test]
    fn test_file_value_wins() {
        let mut merged = base();
        let env = HashMap::from([("HIVE_LOG_LEVEL".to_owned(), "trace".to_owned())]);
        let file_set = HashSet::from(["logging.level".to_owned()]);
        assert_eq!(apply_env_fallbacks(&mut merged, &file_set, &env).unwrap(), 0);
        assert_eq!(merged["logging"]["level"].as_str(), Some("info"));
    }

    #[test]
    fn test_bad_integer_is_reported() {
        let mut merged = base();
        let env = HashMap::from([("HIVE_RPC_WORKERS".to_owned(), "many".to_owned())]);
        let err = apply_env_fallbacks(&mut merged, &HashSet::new(), &env).unwrap_err();
        assert!(matches!(err, ConfigError::EnvError { ref var, .. } if var == "HIVE_RPC_WORKERS"));
    }
}
