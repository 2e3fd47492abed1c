//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hive_backend::prelude::*;` to import all essential types.

pub use crate::{Backend, BackendError, BackendResult, HandlerContext, MessageCache};
