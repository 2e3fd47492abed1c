//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hive_config::prelude::*;` to import all essential types.

pub use crate::{
    CacheSection, ConfigError, ConfigResult, HiveConfig, LoadOptions, LoggingSection, RpcSection,
    SocketSection, SubscriptionSection,
};
