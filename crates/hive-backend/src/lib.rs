//! Hive Backend - request handlers, message cache and their wiring.
//!
//! [`Backend::start`] builds the in-process bus: a partitioned
//! [`LocalBroker`](hive_rpc::LocalBroker), an [`RpcServer`](hive_rpc::RpcServer)
//! with one worker per partition, and an [`EventBus`](hive_events::EventBus)
//! that inserts are published through.
//!
//! ```rust,no_run
//! use hive_backend::Backend;
//! use hive_config::HiveConfig;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = Backend::start(&HiveConfig::default())?;
//! let client = backend.client("frontend-1");
//! client.ping(3, std::time::Duration::from_secs(1)).await?;
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

mod backend;
mod cache;
mod error;
pub mod handlers;

pub use backend::{Backend, log_config};
pub use cache::{MessageCache, MonotonicClock};
pub use error::{BackendError, BackendResult};
pub use handlers::{HandlerContext, request_handlers};
