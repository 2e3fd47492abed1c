//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hive_client::prelude::*;` to import all essential types.

// Errors
pub use crate::{ConnectorError, ConnectorResult, SubscriptionError, SubscriptionResult};

// Subscriptions
pub use crate::{
    MessageHandler, PollingSubscriptions, SocketSubscriptions, SubscriptionFilter,
    SubscriptionKey, Subscriptions,
};

// Transports
pub use crate::{ConnectorSettings, HiveSocketConnector, PollTransport, RestPollTransport};
