//! Subscribers and the subscription rows that bind them to events.

use std::collections::BTreeSet;
use std::fmt;

use hive_core::{DeviceEvent, DeviceScope, EventKind, SubscriptionId};
use serde::{Deserialize, Serialize};

use crate::error::{EventBusError, EventBusResult};

/// A registered recipient: where to deliver and under which correlation id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Caller-supplied handle of the logical subscription.
    pub id: SubscriptionId,
    /// Reply channel events are delivered to.
    pub reply_to: String,
    /// Correlation id of the subscribe request; events are replies to it.
    pub correlation_id: String,
}

impl Subscriber {
    /// Create a subscriber.
    #[must_use]
    pub fn new(
        id: SubscriptionId,
        reply_to: impl Into<String>,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            id,
            reply_to: reply_to.into(),
            correlation_id: correlation_id.into(),
        }
    }

    /// Build a subscriber from the optional parts of a subscribe request.
    ///
    /// # Errors
    ///
    /// - [`EventBusError::MissingSubscriptionId`] without an id
    /// - [`EventBusError::MissingReplyTo`] without a reply channel
    pub fn from_parts(
        id: Option<SubscriptionId>,
        reply_to: Option<&str>,
        correlation_id: &str,
    ) -> EventBusResult<Self> {
        let id = id.ok_or(EventBusError::MissingSubscriptionId)?;
        let reply_to = reply_to.ok_or(EventBusError::MissingReplyTo)?;
        Ok(Self::new(id, reply_to, correlation_id))
    }

    /// Identity used for deduplication.
    #[must_use]
    pub fn key(&self) -> SubscriberKey {
        SubscriberKey {
            reply_to: self.reply_to.clone(),
            id: self.id,
        }
    }
}

/// Deduplication identity of a [`Subscriber`]: `(reply_to, id)`.
///
/// The correlation id is deliberately absent, so one logical subscriber that
/// spans several name-scoped rows is counted once.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberKey {
    /// Reply channel.
    pub reply_to: String,
    /// Subscription handle.
    pub id: SubscriptionId,
}

impl SubscriberKey {
    /// Create a key.
    #[must_use]
    pub fn new(reply_to: impl Into<String>, id: SubscriptionId) -> Self {
        Self {
            reply_to: reply_to.into(),
            id,
        }
    }
}

impl fmt::Display for SubscriberKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.reply_to, self.id)
    }
}

/// Matchable attributes of one registered row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    /// Event category.
    pub kind: EventKind,
    /// Device, or the wildcard.
    pub entity: DeviceScope,
    /// Name to match; `None` matches every name.
    pub name: Option<String>,
}

impl Subscription {
    /// Create a row.
    #[must_use]
    pub fn new(kind: EventKind, entity: DeviceScope, name: Option<String>) -> Self {
        Self { kind, entity, name }
    }

    /// One row per name, or a single all-names row when `names` is absent or empty.
    #[must_use]
    pub fn expand(
        kind: EventKind,
        entity: &DeviceScope,
        names: Option<&BTreeSet<String>>,
    ) -> Vec<Self> {
        match names {
            Some(names) if !names.is_empty() => names
                .iter()
                .map(|name| Self::new(kind, entity.clone(), Some(name.clone())))
                .collect(),
            _ => vec![Self::new(kind, entity.clone(), None)],
        }
    }

    /// Every row shape that would match `event`.
    ///
    /// Publishing looks these up directly instead of scanning all rows.
    #[must_use]
    pub fn applicable_to(event: &DeviceEvent) -> [Self; 4] {
        let kind = event.kind();
        let device = DeviceScope::device(event.device_id());
        let name = event.name().into_owned();
        [
            Self::new(kind, device.clone(), Some(name.clone())),
            Self::new(kind, device, None),
            Self::new(kind, DeviceScope::Any, Some(name)),
            Self::new(kind, DeviceScope::Any, None),
        ]
    }

    /// Whether `event` satisfies this row.
    #[must_use]
    pub fn matches(&self, event: &DeviceEvent) -> bool {
        self.kind == event.kind()
            && self.entity.matches(event.device_id())
            && self
                .name
                .as_deref()
                .is_none_or(|name| name == event.name())
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.kind,
            self.entity,
            self.name.as_deref().unwrap_or("*")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::{DeviceCommand, DeviceNotification};

    fn notification(device: &str, name: &str) -> DeviceEvent {
        DeviceEvent::Notification(DeviceNotification::new(device, name))
    }

    #[test]
    fn test_key_ignores_correlation_id() {
        let a = Subscriber::new(SubscriptionId(1), "topic", "corr-a");
        let b = Subscriber::new(SubscriptionId(1), "topic", "corr-b");
        assert_ne!(a, b);
        assert_eq!(a.key(), b.key());
        assert_ne!(
            a.key(),
            Subscriber::new(SubscriptionId(2), "topic", "corr-a").key()
        );
    }

    #[test]
    fn test_from_parts_validation() {
        assert_eq!(
            Subscriber::from_parts(None, Some("t"), "c").unwrap_err(),
            EventBusError::MissingSubscriptionId
        );
        assert_eq!(
            Subscriber::from_parts(Some(SubscriptionId(1)), None, "c").unwrap_err(),
            EventBusError::MissingReplyTo
        );
        assert!(Subscriber::from_parts(Some(SubscriptionId(1)), Some("t"), "c").is_ok());
    }

    #[test]
    fn test_expand_one_row_per_name() {
        let names = BTreeSet::from(["a".to_owned(), "b".to_owned(), "c".to_owned()]);
        let rows = Subscription::expand(EventKind::Notification, &"d1".into(), Some(&names));
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.entity == DeviceScope::device("d1")));

        let all = Subscription::expand(EventKind::Notification, &"d1".into(), None);
        assert_eq!(all, vec![Subscription::new(
            EventKind::Notification,
            DeviceScope::device("d1"),
            None
        )]);

        let empty = Subscription::expand(EventKind::Command, &DeviceScope::Any, Some(&BTreeSet::new()));
        assert_eq!(empty.len(), 1);
        assert!(empty[0].name.is_none());
    }

    #[test]
    fn test_matching_rule() {
        let event = notification("d2", "temperature");

        assert!(Subscription::new(EventKind::Notification, "d2".into(), None).matches(&event));
        assert!(
            Subscription::new(EventKind::Notification, "d2".into(), Some("temperature".into()))
                .matches(&event)
        );
        assert!(Subscription::new(EventKind::Notification, DeviceScope::Any, None).matches(&event));

        assert!(
            !Subscription::new(EventKind::Notification, "d2".into(), Some("vibration".into()))
                .matches(&event)
        );
        assert!(!Subscription::new(EventKind::Notification, "d1".into(), None).matches(&event));
        assert!(!Subscription::new(EventKind::Command, "d2".into(), None).matches(&event));
    }

    #[test]
    fn test_applicable_rows_all_match() {
        let event = DeviceEvent::Command(DeviceCommand::new("d1", "go_offline"));
        for row in Subscription::applicable_to(&event) {
            assert!(row.matches(&event), "{row} should match");
        }
    }
}
