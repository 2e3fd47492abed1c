//! Hive RPC - Correlated request/response bus.
//!
//! Requests carry a correlation id, an optional partition key and a reply
//! channel name. Responses sharing the correlation id are routed back to the
//! waiting caller:
//!
//! - **Single reply**: exactly one resolution (success, error response or
//!   timeout), after which all correlation state is released.
//! - **Streaming**: the correlation entry stays open and every response with
//!   the same id is delivered until the caller drops the stream. Event pushes
//!   are modeled this way, as replies to the original subscribe request.
//!
//! Requests with the same partition key are consumed by the same worker, in
//! submission order.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use hive_rpc::prelude::*;
//!
//! # async fn example() -> Result<(), RpcError> {
//! let broker = Arc::new(LocalBroker::new(3));
//! let handlers = Arc::new(RequestHandlers::new());
//! let _server = RpcServer::start(
//!     broker.take_partitions().unwrap_or_default(),
//!     handlers,
//!     broker.clone(),
//! );
//!
//! let client = RpcClient::connect(broker, "frontend", Duration::from_secs(10));
//! client.ping(3, Duration::from_secs(1)).await?;
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

pub mod body;
mod broker;
mod client;
mod error;
mod matcher;
mod message;
mod server;
mod transport;

pub use body::{Action, Body};
pub use broker::LocalBroker;
pub use client::{ResponseStream, RpcClient};
pub use error::{RpcError, RpcResult};
pub use matcher::RequestResponseMatcher;
pub use message::{Request, RequestBuilder, Response};
pub use server::{RequestHandler, RequestHandlers, RpcServer};
pub use transport::{MessageDispatcher, RequestTransport};
