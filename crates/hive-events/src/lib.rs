//! Hive Events - Subscription registry and publish/subscribe router.
//!
//! A subscriber registers one [`Subscription`] row per name it cares about.
//! Publishing a [`DeviceEvent`](hive_core::DeviceEvent) looks up every row
//! that matches the event's kind, device and name, and streams the event to
//! each row's subscriber as a [`Response`](hive_rpc::Response) on its reply
//! channel.
//!
//! Matching rule: kind equal, and device equal or wildcard, and name equal or
//! absent.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod bus;
mod error;
mod filter;
mod registry;
mod subscriber;

pub use bus::EventBus;
pub use error::{EventBusError, EventBusResult};
pub use filter::Filter;
pub use registry::SubscriberRegistry;
pub use subscriber::{Subscriber, SubscriberKey, Subscription};
