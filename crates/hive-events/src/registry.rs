//! Concurrent index of subscribers by subscription row.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::debug;

use crate::subscriber::{Subscriber, SubscriberKey, Subscription};

#[derive(Debug, Default)]
struct Index {
    /// Row -> subscribers registered for it.
    by_subscription: HashMap<Subscription, HashSet<SubscriberKey>>,
    /// Subscriber -> rows it registered.
    by_subscriber: HashMap<SubscriberKey, HashSet<Subscription>>,
    /// Delivery records, one per distinct subscriber.
    subscribers: HashMap<SubscriberKey, Subscriber>,
}

impl Index {
    fn detach(&mut self, key: &SubscriberKey, subscription: &Subscription) {
        if let Some(keys) = self.by_subscription.get_mut(subscription) {
            keys.remove(key);
            if keys.is_empty() {
                self.by_subscription.remove(subscription);
            }
        }
    }

    fn drop_if_orphaned(&mut self, key: &SubscriberKey) {
        if self.by_subscriber.get(key).is_some_and(HashSet::is_empty) {
            self.by_subscriber.remove(key);
            self.subscribers.remove(key);
        }
    }
}

/// Index of active subscribers by the rows they registered.
///
/// Every mutation happens under one write lock, so a concurrent lookup never
/// observes a row without its subscriber record.
#[derive(Debug, Default)]
pub struct SubscriberRegistry {
    index: RwLock<Index>,
}

impl SubscriberRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Index> {
        self.index.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Index> {
        self.index.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register `subscriber` for `subscription`.
    ///
    /// Re-registering the same `(reply_to, id)` refreshes its delivery record.
    pub fn register(&self, subscriber: Subscriber, subscription: Subscription) {
        let key = subscriber.key();
        let mut index = self.write();
        index
            .by_subscription
            .entry(subscription.clone())
            .or_default()
            .insert(key.clone());
        index
            .by_subscriber
            .entry(key.clone())
            .or_default()
            .insert(subscription);
        index.subscribers.insert(key, subscriber);
    }

    /// Remove a subscriber and every row it registered.
    ///
    /// Returns the number of rows removed; unknown keys remove nothing.
    pub fn unregister(&self, key: &SubscriberKey) -> usize {
        let mut index = self.write();
        let Some(rows) = index.by_subscriber.remove(key) else {
            return 0;
        };
        for row in &rows {
            index.detach(key, row);
        }
        index.subscribers.remove(key);
        debug!(subscriber = %key, rows = rows.len(), "Unregistered subscriber");
        rows.len()
    }

    /// Remove one row of a subscriber. The subscriber is dropped with its last row.
    pub fn unregister_subscription(&self, key: &SubscriberKey, subscription: &Subscription) -> bool {
        let mut index = self.write();
        let removed = index
            .by_subscriber
            .get_mut(key)
            .is_some_and(|rows| rows.remove(subscription));
        if removed {
            index.detach(key, subscription);
            index.drop_if_orphaned(key);
        }
        removed
    }

    /// Remove the rows of a subscriber whose name is one of `names`.
    ///
    /// All-names rows are left alone.
    pub fn unregister_names<'a, I>(&self, key: &SubscriberKey, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: HashSet<&str> = names.into_iter().collect();
        let mut index = self.write();
        let doomed: Vec<Subscription> = index
            .by_subscriber
            .get(key)
            .map(|rows| {
                rows.iter()
                    .filter(|row| row.name.as_deref().is_some_and(|n| names.contains(n)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();

        for row in &doomed {
            if let Some(rows) = index.by_subscriber.get_mut(key) {
                rows.remove(row);
            }
            index.detach(key, row);
        }
        index.drop_if_orphaned(key);
        doomed.len()
    }

    /// Remove every row bound to `device_id`. Wildcard rows are kept.
    ///
    /// Returns the number of rows removed.
    pub fn unregister_device(&self, device_id: &str) -> usize {
        let mut index = self.write();
        let doomed: Vec<Subscription> = index
            .by_subscription
            .keys()
            .filter(|row| row.entity.device_id() == Some(device_id))
            .cloned()
            .collect();

        let mut removed = 0usize;
        for row in doomed {
            let Some(keys) = index.by_subscription.remove(&row) else {
                continue;
            };
            for key in keys {
                if let Some(rows) = index.by_subscriber.get_mut(&key) {
                    rows.remove(&row);
                }
                index.drop_if_orphaned(&key);
                removed = removed.saturating_add(1);
            }
        }
        debug!(device_id, removed, "Unregistered device subscriptions");
        removed
    }

    /// Delivery records of everyone registered for exactly this row.
    #[must_use]
    pub fn subscribers_of(&self, subscription: &Subscription) -> Vec<Subscriber> {
        let index = self.read();
        index
            .by_subscription
            .get(subscription)
            .map(|keys| {
                keys.iter()
                    .filter_map(|key| index.subscribers.get(key).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Rows registered by a subscriber.
    #[must_use]
    pub fn subscriptions_of(&self, key: &SubscriberKey) -> Vec<Subscription> {
        let mut rows: Vec<_> = self
            .read()
            .by_subscriber
            .get(key)
            .map(|rows| rows.iter().cloned().collect())
            .unwrap_or_default();
        rows.sort();
        rows
    }

    /// Subscribers registered on a reply channel.
    #[must_use]
    pub fn subscribers_on(&self, reply_to: &str) -> Vec<SubscriberKey> {
        self.read()
            .subscribers
            .keys()
            .filter(|key| key.reply_to == reply_to)
            .cloned()
            .collect()
    }

    /// Number of distinct subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.read().subscribers.len()
    }

    /// Number of registered `(subscriber, row)` pairs.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.read()
            .by_subscriber
            .values()
            .map(HashSet::len)
            .fold(0usize, usize::saturating_add)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::{DeviceScope, EventKind, SubscriptionId};
    use std::sync::Arc;

    fn row(device: &str, name: Option<&str>) -> Subscription {
        Subscription::new(
            EventKind::Notification,
            DeviceScope::from(device),
            name.map(str::to_owned),
        )
    }

    #[test]
    fn test_three_names_one_subscriber() {
        let registry = SubscriberRegistry::new();
        let sub = Subscriber::new(SubscriptionId(1), "topic", "corr");
        for name in ["a", "b", "c"] {
            registry.register(sub.clone(), row("d1", Some(name)));
        }
        assert_eq!(registry.subscription_count(), 3);
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = SubscriberRegistry::new();
        let sub = Subscriber::new(SubscriptionId(1), "topic", "corr");
        registry.register(sub.clone(), row("d1", None));

        assert_eq!(registry.unregister(&sub.key()), 1);
        assert_eq!(registry.unregister(&sub.key()), 0);
        assert_eq!(registry.subscriber_count(), 0);
        assert!(registry.subscribers_of(&row("d1", None)).is_empty());
    }

    #[test]
    fn test_unregister_names_keeps_all_names_row() {
        let registry = SubscriberRegistry::new();
        let sub = Subscriber::new(SubscriptionId(1), "topic", "corr");
        registry.register(sub.clone(), row("d1", None));
        registry.register(sub.clone(), row("d1", Some("temperature")));
        registry.register(sub.clone(), row("d1", Some("humidity")));

        assert_eq!(registry.unregister_names(&sub.key(), ["temperature"]), 1);
        assert_eq!(registry.subscriptions_of(&sub.key()), vec![
            row("d1", None),
            row("d1", Some("humidity"))
        ]);
        assert_eq!(registry.subscriber_count(), 1);
    }

    #[test]
    fn test_removing_last_row_drops_subscriber() {
        let registry = SubscriberRegistry::new();
        let sub = Subscriber::new(SubscriptionId(1), "topic", "corr");
        registry.register(sub.clone(), row("d1", Some("a")));

        assert!(registry.unregister_subscription(&sub.key(), &row("d1", Some("a"))));
        assert!(!registry.unregister_subscription(&sub.key(), &row("d1", Some("a"))));
        assert_eq!(registry.subscriber_count(), 0);
    }

    #[test]
    fn test_unregister_device() {
        let registry = SubscriberRegistry::new();
        let a = Subscriber::new(SubscriptionId(1), "topic", "corr");
        let b = Subscriber::new(SubscriptionId(2), "topic", "corr");
        registry.register(a.clone(), row("d1", Some("x")));
        registry.register(a.clone(), row("d2", None));
        registry.register(b.clone(), row("d1", None));
        registry.register(b.clone(), row("*", None));

        assert_eq!(registry.unregister_device("d1"), 2);
        assert_eq!(registry.subscriptions_of(&a.key()), vec![row("d2", None)]);
        assert_eq!(registry.subscriptions_of(&b.key()), vec![row("*", None)]);
    }

    #[test]
    fn test_reregister_refreshes_correlation() {
        let registry = SubscriberRegistry::new();
        registry.register(Subscriber::new(SubscriptionId(1), "t", "old"), row("d1", None));
        registry.register(Subscriber::new(SubscriptionId(1), "t", "new"), row("d1", None));

        let subs = registry.subscribers_of(&row("d1", None));
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].correlation_id, "new");
    }

    #[test]
    fn test_concurrent_register_and_lookup() {
        let registry = Arc::new(SubscriberRegistry::new());
        let writers: Vec<_> = (0..4u64)
            .map(|t| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || {
                    for i in 0..100u64 {
                        let sub = Subscriber::new(SubscriptionId(t.saturating_mul(1000).saturating_add(i)), "t", "c");
                        registry.register(sub, row("d1", None));
                    }
                })
            })
            .collect();
        let reader = {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                for _ in 0..100 {
                    // every row observed has its delivery record
                    let subs = registry.subscribers_of(&row("d1", None));
                    assert!(subs.iter().all(|s| s.reply_to == "t"));
                }
            })
        };
        for w in writers {
            w.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(registry.subscriber_count(), 400);
    }
}
