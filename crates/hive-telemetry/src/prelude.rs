//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hive_telemetry::prelude::*;` to import all essential types.

pub use crate::{LogConfig, LogFormat, LogTarget, RequestContext, TelemetryError, TelemetryResult};

pub use crate::{setup_default_logging, setup_logging};
