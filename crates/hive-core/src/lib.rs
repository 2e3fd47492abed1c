//! Hive Core - Foundation types and traits for the DeviceHive message platform.
//!
//! This crate provides:
//! - Device messages (commands, notifications, command updates) and the events built from them
//! - The device scope used by subscriptions, including the "any device" wildcard
//! - Subscription handles and id generation
//! - Error families shared by every layer
//! - Narrow collaborator interfaces: keyed message store, authenticator, wire codec

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

pub mod auth;
pub mod codec;
pub mod error;
pub mod model;
pub mod scope;
pub mod store;

pub use auth::{AuthError, Authenticator, HivePrincipal, bearer_token};
pub use codec::{CodecError, JsonCodec, WireCodec, from_wire, to_wire};
pub use error::{ErrorFamily, HiveError, HiveResult, codes};
pub use model::{CommandUpdate, DeviceCommand, DeviceEvent, DeviceNotification, EventKind};
pub use scope::{DeviceScope, IdGenerator, SubscriptionId, WILDCARD};
pub use store::{KeyedStore, SearchQuery, StoreError, StoreResult, StoredEntity};
