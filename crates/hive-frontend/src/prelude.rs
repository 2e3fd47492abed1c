//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hive_frontend::prelude::*;` to import all essential types.

pub use crate::{
    EventFilter, EventStream, FrontendError, FrontendResult, HiveService, SocketServer,
};
