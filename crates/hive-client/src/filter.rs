//! What a client subscribes to, and the keys subscriptions are tracked under.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use hive_core::{DeviceScope, EventKind};

/// Client-side description of a subscription.
///
/// An absent device list means every device and becomes [`DeviceScope::Any`]
/// when the filter is expanded into keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionFilter {
    /// Devices to watch, or `None` for all devices.
    pub device_ids: Option<Vec<String>>,
    /// Names to watch. Empty means every name.
    pub names: BTreeSet<String>,
    /// Starting cursor. Only items strictly newer are delivered.
    pub since: Option<DateTime<Utc>>,
}

impl SubscriptionFilter {
    /// Filter covering every device and name.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Filter for the given devices.
    #[must_use]
    pub fn devices<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            device_ids: Some(ids.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    /// Restrict to the given names.
    #[must_use]
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Start after `since`.
    #[must_use]
    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    /// One key per device, or a single wildcard key when no devices are given.
    ///
    /// Duplicate device ids collapse into one key.
    #[must_use]
    pub fn keys(&self, kind: EventKind) -> Vec<SubscriptionKey> {
        let scopes: BTreeSet<DeviceScope> = match &self.device_ids {
            None => BTreeSet::from([DeviceScope::Any]),
            Some(ids) => ids.iter().map(|id| DeviceScope::from(id.as_str())).collect(),
        };
        scopes
            .into_iter()
            .map(|device| SubscriptionKey {
                kind,
                device,
                names: self.names.clone(),
            })
            .collect()
    }
}

/// Identity of one client-side subscription: kind, device-or-all, name set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    /// Commands or notifications.
    pub kind: EventKind,
    /// One device, or every device.
    pub device: DeviceScope,
    /// Names watched. Empty means every name.
    pub names: BTreeSet<String>,
}

impl SubscriptionKey {
    /// Whether an item from `device_id` named `name` belongs to this key.
    #[must_use]
    pub fn matches(&self, device_id: &str, name: &str) -> bool {
        self.device.matches(device_id) && (self.names.is_empty() || self.names.contains(name))
    }
}

impl fmt::Display for SubscriptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.device)?;
        if !self.names.is_empty() {
            let names: Vec<&str> = self.names.iter().map(String::as_str).collect();
            write!(f, "[{}]", names.join(","))?;
        }
        Ok(())
    }
}
