//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hive_rpc::prelude::*;` to import all essential types.

pub use crate::{RpcError, RpcResult};

pub use crate::{Action, Body, Request, RequestBuilder, Response};

pub use crate::{LocalBroker, MessageDispatcher, RequestTransport};

pub use crate::{RequestHandler, RequestHandlers, ResponseStream, RpcClient, RpcServer};
