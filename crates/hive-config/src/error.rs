//! Configuration errors.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config file exists but could not be read.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// File path.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// A config file or the merged tree is not valid TOML for [`HiveConfig`](crate::HiveConfig).
    #[error("failed to parse config {path}: {source}")]
    ParseError {
        /// File path, or a `<...>` marker for in-memory sources.
        path: String,
        /// Underlying parse error.
        #[source]
        source: toml::de::Error,
    },

    /// An environment variable could not be converted to its field type.
    #[error("invalid value for {var}: {message}")]
    EnvError {
        /// Variable name.
        var: String,
        /// What went wrong.
        message: String,
    },

    /// A value is out of range.
    #[error("invalid config value for {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What went wrong.
        message: String,
    },

    /// No home directory to look for the user config in.
    #[error("could not determine home directory")]
    NoHomeDir,
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
