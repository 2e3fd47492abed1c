//! Device scopes and subscription handles.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Wire sentinel for "any device".
pub const WILDCARD: &str = "*";

/// Which devices a subscription covers.
///
/// This is the only encoding of "all devices" used past the client API:
/// an absent device list is converted to [`DeviceScope::Any`] before it is
/// sent anywhere. On the wire the wildcard is the string `"*"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DeviceScope {
    /// Every device.
    Any,
    /// One device.
    Device(String),
}

impl DeviceScope {
    /// Scope for a single device.
    #[must_use]
    pub fn device(id: impl Into<String>) -> Self {
        Self::Device(id.into())
    }

    /// Whether an event from `device_id` falls in this scope.
    #[must_use]
    pub fn matches(&self, device_id: &str) -> bool {
        match self {
            Self::Any => true,
            Self::Device(id) => id == device_id,
        }
    }

    /// The concrete device, if this is not the wildcard.
    #[must_use]
    pub fn device_id(&self) -> Option<&str> {
        match self {
            Self::Any => None,
            Self::Device(id) => Some(id),
        }
    }

    /// Whether this is the wildcard.
    #[must_use]
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }
}

impl From<String> for DeviceScope {
    fn from(value: String) -> Self {
        if value == WILDCARD {
            Self::Any
        } else {
            Self::Device(value)
        }
    }
}

impl From<&str> for DeviceScope {
    fn from(value: &str) -> Self {
        Self::from(value.to_owned())
    }
}

impl From<Option<String>> for DeviceScope {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Any, Self::from)
    }
}

impl From<DeviceScope> for String {
    fn from(value: DeviceScope) -> Self {
        match value {
            DeviceScope::Any => WILDCARD.to_owned(),
            DeviceScope::Device(id) => id,
        }
    }
}

impl fmt::Display for DeviceScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str(WILDCARD),
            Self::Device(id) => f.write_str(id),
        }
    }
}

/// Handle identifying one logical subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SubscriptionId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Monotonic id source. One instance is owned by whichever component mints ids;
/// there is no process-wide generator.
#[derive(Debug)]
pub struct IdGenerator {
    next: AtomicU64,
}

impl IdGenerator {
    /// Start generating at `first`.
    #[must_use]
    pub fn starting_at(first: u64) -> Self {
        Self {
            next: AtomicU64::new(first),
        }
    }

    /// Take the next id.
    pub fn next_id(&self) -> u64 {
        self.next.fetch_add(1, Ordering::Relaxed)
    }

    /// Take the next id as a subscription handle.
    pub fn next_subscription(&self) -> SubscriptionId {
        SubscriptionId(self.next_id())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::starting_at(1)
    }
}
