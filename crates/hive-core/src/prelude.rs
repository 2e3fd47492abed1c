//! Prelude module - commonly used types for convenient import.
//!
//! Use `use hive_core::prelude::*;` to import all essential types.

// Errors
pub use crate::{ErrorFamily, HiveError, HiveResult};

// Messages
pub use crate::{CommandUpdate, DeviceCommand, DeviceEvent, DeviceNotification, EventKind};

// Subscriptions
pub use crate::{DeviceScope, IdGenerator, SubscriptionId};

// Collaborators
pub use crate::{Authenticator, HivePrincipal, KeyedStore, SearchQuery, StoredEntity, WireCodec};
