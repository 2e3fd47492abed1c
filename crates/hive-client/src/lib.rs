//! Hive Client - subscription managers and the persistent-socket connector.
//!
//! Two interchangeable back ends implement [`Subscriptions`]:
//! - [`PollingSubscriptions`] runs one long-poll loop per subscription key
//!   over a [`PollTransport`], bounded by a fixed task pool.
//! - [`SocketSubscriptions`] registers subscriptions over a
//!   [`HiveSocketConnector`] and receives pushed items, reconnecting and
//!   resubscribing from the last-seen cursor when the connection drops.
//!
//! Both deliver to a user-supplied [`MessageHandler`] and never deliver an
//! item at or before a subscription's cursor twice.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod connector;
pub mod cursor;
pub mod error;
pub mod filter;
pub mod handler;
pub mod polling;
pub mod socket;
pub mod subscriptions;
pub mod transport;

pub use connector::{
    ConnectionEvent, ConnectorSettings, HiveSocketConnector, PushHandler,
};
pub use cursor::Cursor;
pub use error::{ConnectorError, ConnectorResult, SubscriptionError, SubscriptionResult};
pub use filter::{SubscriptionFilter, SubscriptionKey};
pub use handler::MessageHandler;
pub use polling::PollingSubscriptions;
pub use socket::SocketSubscriptions;
pub use subscriptions::Subscriptions;
pub use transport::{PollRequest, PollTransport, RestPollTransport};
