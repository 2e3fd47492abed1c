//! Hive Telemetry - Logging setup and request correlation spans.
//!
//! # Example
//!
//! ```rust,no_run
//! use hive_telemetry::{LogConfig, LogFormat, RequestContext, setup_logging};
//!
//! # fn main() -> Result<(), hive_telemetry::TelemetryError> {
//! setup_logging(&LogConfig::new("debug").with_format(LogFormat::Json))?;
//!
//! let ctx = RequestContext::new("socket").with_action("notification/subscribe");
//! let _guard = ctx.span().entered();
//! tracing::info!("handling request");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod context;
mod error;
mod logging;

pub use context::RequestContext;
pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogTarget, setup_default_logging, setup_logging};
