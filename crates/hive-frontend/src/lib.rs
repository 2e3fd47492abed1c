//! Hive Frontend - client-facing operations and the persistent-socket server.
//!
//! [`HiveService`] turns the core operations (subscribe, unsubscribe,
//! insert, update, long-poll, command-update wait) into requests on the
//! request/response bus. A subscription covering several devices is one
//! backend registration per device behind a single handle; its
//! [`EventStream`] yields any replayed backlog first, then live items.
//!
//! [`SocketServer`] exposes the service to `WebSocket` clients.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use hive_core::DeviceNotification;
//! use hive_frontend::prelude::*;
//!
//! # async fn run(service: Arc<HiveService>) -> Result<(), FrontendError> {
//! let mut stream = service
//!     .subscribe_notifications(&EventFilter::devices(["d1"]).with_names(["temperature"]))
//!     .await?;
//! service
//!     .insert_notification("d1", DeviceNotification::new("d1", "temperature"))
//!     .await?;
//! let _event = stream.recv().await;
//! service.unsubscribe(stream.id()).await;
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

mod error;
mod filter;
mod server;
mod service;

pub use error::{FrontendError, FrontendResult};
pub use filter::EventFilter;
pub use server::{API_VERSION, SocketServer};
pub use service::{EventStream, HiveService};
