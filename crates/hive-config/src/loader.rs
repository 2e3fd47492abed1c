//! Config file discovery and layered loading.
//!
//! Layers, lowest priority first:
//! 1. Embedded `defaults.toml`
//! 2. `/etc/devicehive/config.toml`
//! 3. `~/.devicehive/config.toml`
//! 4. An explicit file passed by the caller
//! 5. `HIVE_*` environment variables, for fields no file set

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::env::{apply_env_fallbacks, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::types::HiveConfig;
use crate::validate;

const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum accepted config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Where the layered loader looks for files.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Replaces `/etc/devicehive`; `None` uses the system path.
    pub system_dir: Option<PathBuf>,
    /// Replaces `~/.devicehive`; `None` uses the user's home.
    pub user_dir: Option<PathBuf>,
    /// Highest-priority file.
    pub explicit: Option<PathBuf>,
}

impl LoadOptions {
    /// Load `path` on top of the standard layers.
    #[must_use]
    pub fn with_explicit(mut self, path: impl Into<PathBuf>) -> Self {
        self.explicit = Some(path.into());
        self
    }

    /// Look for the user file in `dir` instead of the home directory.
    #[must_use]
    pub fn with_user_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.user_dir = Some(dir.into());
        self
    }

    /// Look for the system file in `dir`.
    #[must_use]
    pub fn with_system_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.system_dir = Some(dir.into());
        self
    }
}

/// Load the layered configuration using the process environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is malformed, an environment value
/// cannot be converted, or the merged result fails validation.
pub fn load(options: &LoadOptions) -> ConfigResult<HiveConfig> {
    load_with_env(options, &collect_env_vars())
}

/// Load the layered configuration against an explicit environment snapshot.
///
/// # Errors
///
/// See [`load`].
pub fn load_with_env(
    options: &LoadOptions,
    env_vars: &HashMap<String, String>,
) -> ConfigResult<HiveConfig> {
    let mut merged = parse(DEFAULTS_TOML, "<embedded defaults>")?;
    let mut file_set = HashSet::new();

    let system_path = options
        .system_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("/etc/devicehive"))
        .join("config.toml");
    let user_path = match &options.user_dir {
        Some(dir) => Some(dir.join("config.toml")),
        None => home_directory()
            .ok()
            .map(|home| home.join(".devicehive").join("config.toml")),
    };

    let candidates = [Some(system_path), user_path, options.explicit.clone()];
    for path in candidates.into_iter().flatten() {
        let required = options.explicit.as_ref() == Some(&path);
        let overlay = if required {
            Some(read_file(&path)?)
        } else {
            try_load_file(&path)?
        };
        if let Some(overlay) = overlay {
            record_leaves(&overlay, "", &mut file_set);
            deep_merge(&mut merged, &overlay);
            info!(path = %path.display(), "loaded config file");
        }
    }

    let applied = apply_env_fallbacks(&mut merged, &file_set, env_vars)?;
    if applied > 0 {
        debug!(count = applied, "applied environment fallbacks");
    }

    let config: HiveConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Parse and validate a single TOML document on top of the defaults.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the text is malformed or invalid.
pub fn load_str(toml_text: &str) -> ConfigResult<HiveConfig> {
    let mut merged = parse(DEFAULTS_TOML, "<embedded defaults>")?;
    deep_merge(&mut merged, &parse(toml_text, "<inline>")?);
    let config: HiveConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<inline>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Recursively merge `overlay` into `base`.
///
/// Tables merge per key; scalars and arrays from the overlay replace the base.
pub fn deep_merge(base: &mut toml::Value, overlay: &toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (key, overlay_val) in overlay_table {
                if let Some(base_val) = base_table.get_mut(key) {
                    deep_merge(base_val, overlay_val);
                } else {
                    base_table.insert(key.clone(), overlay_val.clone());
                }
            }
        },
        (base, overlay) => {
            *base = overlay.clone();
        },
    }
}

fn parse(text: &str, origin: &str) -> ConfigResult<toml::Value> {
    toml::from_str(text).map_err(|e| ConfigError::ParseError {
        path: origin.to_owned(),
        source: e,
    })
}

fn read_file(path: &Path) -> ConfigResult<toml::Value> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
        path: path.display().to_string(),
        source: e,
    })?;
    check_size(path, &content)?;
    parse(&content, &path.display().to_string())
}

/// `None` when the file does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };
    check_size(path, &content)?;
    parse(&content, &path.display().to_string()).map(Some)
}

fn check_size(path: &Path, content: &str) -> ConfigResult<()> {
    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }
    Ok(())
}

fn record_leaves(val: &toml::Value, prefix: &str, out: &mut HashSet<String>) {
    match val {
        toml::Value::Table(table) => {
            for (key, child) in table {
                let path = if prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{prefix}.{key}")
                };
                record_leaves(child, &path, out);
            }
        },
        _ => {
            out.insert(prefix.to_owned());
        },
    }
}

fn home_directory() -> ConfigResult<PathBuf> {
    directories::BaseDirs::new()
        .map(|d| d.home_dir().to_path_buf())
        .ok_or(ConfigError::NoHomeDir)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isolated(dir: &Path) -> LoadOptions {
        LoadOptions::default()
            .with_system_dir(dir.join("system"))
            .with_user_dir(dir.join("user"))
    }

    #[test]
    fn test_defaults_match_struct_defaults() {
        let value = parse(DEFAULTS_TOML, "<embedded defaults>").unwrap();
        let config: HiveConfig = value.try_into().unwrap();
        assert_eq!(config, HiveConfig::default());
    }

    #[test]
    fn test_load_without_files() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_with_env(&isolated(dir.path()), &HashMap::new()).unwrap();
        assert_eq!(config, HiveConfig::default());
    }

    #[test]
    fn test_layers_override_in_order() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("system")).unwrap();
        std::fs::create_dir_all(dir.path().join("user")).unwrap();
        std::fs::write(
            dir.path().join("system/config.toml"),
            "[rpc]\nworkers = 8\nrequest_timeout_secs = 20\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("user/config.toml"), "[rpc]\nworkers = 4\n").unwrap();
        let explicit = dir.path().join("explicit.toml");
        std::fs::write(&explicit, "[cache]\nsearch_limit = 5\n").unwrap();

        let options = isolated(dir.path()).with_explicit(&explicit);
        let config = load_with_env(&options, &HashMap::new()).unwrap();
        assert_eq!(config.rpc.workers, 4);
        assert_eq!(config.rpc.request_timeout_secs, 20);
        assert_eq!(config.cache.search_limit, 5);
        assert_eq!(config.subscriptions.max_poll_tasks, 100);
    }

    #[test]
    fn test_env_only_fills_unset_fields() {
        let dir = tempfile::tempdir().unwrap();
        let explicit = dir.path().join("explicit.toml");
        std::fs::write(&explicit, "[rpc]\nworkers = 2\n").unwrap();
        let env = HashMap::from([
            ("HIVE_RPC_WORKERS".to_owned(), "9".to_owned()),
            ("HIVE_WAIT_TIMEOUT_SECS".to_owned(), "5".to_owned()),
        ]);

        let config = load_with_env(&isolated(dir.path()).with_explicit(&explicit), &env).unwrap();
        assert_eq!(config.rpc.workers, 2);
        assert_eq!(config.subscriptions.wait_timeout_secs, 5);
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let options = isolated(dir.path()).with_explicit(dir.path().join("nope.toml"));
        assert!(matches!(
            load_with_env(&options, &HashMap::new()),
            Err(ConfigError::ReadError { .. })
        ));
    }

    #[test]
    fn test_invalid_merged_config_rejected() {
        let err = load_str("[subscriptions]\nwait_timeout_secs = 120\n").unwrap_err();
        assert!(matches!(err, ConfigError::ValidationError { .. }));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(matches!(
            load_str("[rpc\nworkers = 1"),
            Err(ConfigError::ParseError { .. })
        ));
    }

    #[test]
    fn test_deep_merge_keeps_siblings() {
        let mut base: toml::Value = toml::from_str("[a]\nx = 1\ny = 2\n").unwrap();
        let overlay: toml::Value = toml::from_str("[a]\ny = 3\n[b]\nz = true\n").unwrap();
        deep_merge(&mut base, &overlay);
        assert_eq!(base["a"]["x"].as_integer(), Some(1));
        assert_eq!(base["a"]["y"].as_integer(), Some(3));
        assert_eq!(base["b"]["z"].as_bool(), Some(true));
    }
}
