//! In-memory, device-partitioned message store.

use std::collections::BTreeMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use hive_core::{
    CommandUpdate, DeviceCommand, DeviceNotification, EventKind, KeyedStore, SearchQuery,
    StoreResult, StoredEntity,
};
use tracing::trace;

#[derive(Debug, Default)]
struct DevicePartition {
    commands: BTreeMap<u64, DeviceCommand>,
    notifications: BTreeMap<u64, DeviceNotification>,
}

impl DevicePartition {
    fn get(&self, kind: EventKind, id: u64) -> Option<StoredEntity> {
        match kind {
            EventKind::Notification => self
                .notifications
                .get(&id)
                .cloned()
                .map(StoredEntity::Notification),
            EventKind::Command | EventKind::CommandUpdate => {
                self.commands.get(&id).cloned().map(StoredEntity::Command)
            },
        }
    }

    fn collect(&self, kind: EventKind, query: &SearchQuery, out: &mut Vec<StoredEntity>) {
        let entities: Box<dyn Iterator<Item = StoredEntity> + '_> = match kind {
            EventKind::Notification => Box::new(
                self.notifications
                    .values()
                    .cloned()
                    .map(StoredEntity::Notification),
            ),
            EventKind::Command | EventKind::CommandUpdate => {
                Box::new(self.commands.values().cloned().map(StoredEntity::Command))
            },
        };
        out.extend(entities.filter(|entity| query.matches(entity)));
    }
}

/// Keyed store backed by one map entry per device.
///
/// Search results come back oldest first, so a limited result never skips
/// past items a cursor has not reached yet.
#[derive(Debug, Default)]
pub struct MessageCache {
    devices: DashMap<String, DevicePartition>,
}

impl MessageCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of devices with stored items.
    #[must_use]
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Drop everything stored for a device. Returns whether it had anything.
    pub fn remove_device(&self, device_id: &str) -> bool {
        self.devices.remove(device_id).is_some()
    }
}

#[async_trait]
impl KeyedStore for MessageCache {
    async fn find(
        &self,
        id: u64,
        device_id: &str,
        kind: EventKind,
    ) -> StoreResult<Option<StoredEntity>> {
        Ok(self
            .devices
            .get(device_id)
            .and_then(|partition| partition.get(kind, id)))
    }

    async fn search(&self, kind: EventKind, query: &SearchQuery) -> StoreResult<Vec<StoredEntity>> {
        let mut found = Vec::new();
        match &query.device_ids {
            Some(devices) => {
                for device_id in devices {
                    if let Some(partition) = self.devices.get(device_id) {
                        partition.collect(kind, query, &mut found);
                    }
                }
            },
            None => {
                for partition in &self.devices {
                    partition.collect(kind, query, &mut found);
                }
            },
        }
        found.sort_by_key(|entity| (entity.timestamp(), entity.id()));
        if let Some(limit) = query.limit {
            found.truncate(limit);
        }
        trace!(%kind, found = found.len(), "Searched cache");
        Ok(found)
    }

    async fn put(&self, entity: StoredEntity) -> StoreResult<()> {
        let mut partition = self.devices.entry(entity.device_id().to_owned()).or_default();
        match entity {
            StoredEntity::Command(command) => {
                partition.commands.insert(command.id, command);
            },
            StoredEntity::Notification(notification) => {
                partition.notifications.insert(notification.id, notification);
            },
        }
        Ok(())
    }

    async fn merge(&self, update: &CommandUpdate) -> StoreResult<Option<DeviceCommand>> {
        let Some(mut partition) = self.devices.get_mut(&update.device_id) else {
            return Ok(None);
        };
        Ok(partition.commands.get_mut(&update.id).map(|command| {
            command.apply(update);
            command.clone()
        }))
    }
}

/// Hands out strictly increasing timestamps.
///
/// Wall-clock readings that do not move forward are bumped by one
/// microsecond, so no two stored items share a cursor position.
#[derive(Debug)]
pub struct MonotonicClock {
    last: Mutex<DateTime<Utc>>,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self {
            last: Mutex::new(DateTime::<Utc>::MIN_UTC),
        }
    }
}

impl MonotonicClock {
    /// Create a clock.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next timestamp, never earlier than or equal to the previous one.
    pub fn now(&self) -> DateTime<Utc> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let wall = Utc::now();
        let next = if wall > *last {
            wall
        } else {
            last.checked_add_signed(TimeDelta::microseconds(1))
                .unwrap_or(wall)
        };
        *last = next;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn notification(id: u64, device: &str, name: &str, ts: DateTime<Utc>) -> StoredEntity {
        let mut n = DeviceNotification::new(device, name).with_timestamp(ts);
        n.id = id;
        StoredEntity::Notification(n)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    #[tokio::test]
    async fn test_find_is_device_partitioned() {
        let cache = MessageCache::new();
        cache.put(notification(1, "d1", "t", at(10))).await.unwrap();

        assert!(cache.find(1, "d1", EventKind::Notification).await.unwrap().is_some());
        assert!(cache.find(1, "d2", EventKind::Notification).await.unwrap().is_none());
        assert!(cache.find(1, "d1", EventKind::Command).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_search_is_oldest_first_and_limited() {
        let cache = MessageCache::new();
        cache.put(notification(3, "d1", "t", at(30))).await.unwrap();
        cache.put(notification(1, "d1", "t", at(10))).await.unwrap();
        cache.put(notification(2, "d2", "h", at(20))).await.unwrap();

        let all = cache
            .search(EventKind::Notification, &SearchQuery::default())
            .await
            .unwrap();
        let ids: Vec<_> = all.iter().map(StoredEntity::id).collect();
        assert_eq!(ids, vec![1, 2, 3]);

        let query = SearchQuery {
            since: Some(at(10)),
            limit: Some(1),
            ..SearchQuery::default()
        };
        let page = cache.search(EventKind::Notification, &query).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id(), 2);

        let query = SearchQuery {
            device_ids: Some(BTreeSet::from(["d1".to_owned()])),
            names: Some(BTreeSet::from(["t".to_owned()])),
            ..SearchQuery::default()
        };
        assert_eq!(
            cache.search(EventKind::Notification, &query).await.unwrap().len(),
            2
        );
    }

    #[tokio::test]
    async fn test_merge_applies_delta() {
        let cache = MessageCache::new();
        let mut command = DeviceCommand::new("d1", "reboot");
        command.id = 5;
        cache.put(StoredEntity::Command(command)).await.unwrap();

        let merged = cache
            .merge(&CommandUpdate::new("d1", 5).with_status("done"))
            .await
            .unwrap()
            .unwrap();
        assert!(merged.is_updated);
        assert_eq!(merged.status.as_deref(), Some("done"));

        assert!(cache.merge(&CommandUpdate::new("d1", 6)).await.unwrap().is_none());
        assert!(cache.merge(&CommandUpdate::new("d9", 5)).await.unwrap().is_none());
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut previous = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > previous);
            previous = next;
        }
    }
}
