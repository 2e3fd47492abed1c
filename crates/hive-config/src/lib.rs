//! Layered configuration for the DeviceHive message platform.
//!
//! # Precedence
//!
//! From highest to lowest:
//!
//! 1. An explicit file passed via [`LoadOptions::with_explicit`]
//! 2. `~/.devicehive/config.toml`
//! 3. `/etc/devicehive/config.toml`
//! 4. `HIVE_*` environment variables (fallback only)
//! 5. Embedded defaults
//!
//! ```rust,no_run
//! use hive_config::{HiveConfig, LoadOptions};
//!
//! # fn main() -> Result<(), hive_config::ConfigError> {
//! let config = HiveConfig::load(&LoadOptions::default())?;
//! println!("{} rpc workers", config.rpc.workers);
//! # Ok(())
//! # }
//! ```
//!
//! This crate depends on no other hive crate.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

/// Environment variable fallbacks.
pub mod env;
/// Configuration error types.
pub mod error;
/// File discovery and layered loading.
pub mod loader;
pub mod prelude;
/// Configuration sections.
pub mod types;
/// Validation rules.
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::LoadOptions;
pub use types::*;

impl HiveConfig {
    /// Load with the full precedence chain.
    ///
    /// # Errors
    ///
    /// See [`loader::load`].
    pub fn load(options: &LoadOptions) -> ConfigResult<Self> {
        loader::load(options)
    }

    /// Parse a TOML document over the defaults.
    ///
    /// # Errors
    ///
    /// See [`loader::load_str`].
    pub fn from_toml(text: &str) -> ConfigResult<Self> {
        loader::load_str(text)
    }
}
