//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hive_events::prelude::*;` to import all essential types.

pub use crate::{EventBus, EventBusError, EventBusResult, Filter};

pub use crate::{Subscriber, SubscriberKey, SubscriberRegistry, Subscription};
