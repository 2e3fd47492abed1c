//! Keyed message store collaborator.
//!
//! Persistence is not owned by this platform. Handlers reach stored commands
//! and notifications through [`KeyedStore`], a device-partitioned lookup and
//! write service that may be eventually consistent.

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{CommandUpdate, DeviceCommand, DeviceNotification, EventKind};

/// Errors raised by a store implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Entity does not exist.
    #[error("{kind} {id} not found for device {device_id}")]
    NotFound {
        /// Entity category.
        kind: EventKind,
        /// Entity id.
        id: u64,
        /// Owning device.
        device_id: String,
    },

    /// Store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A stored command or notification.
#[derive(Debug, Clone, PartialEq)]
pub enum StoredEntity {
    /// A stored command.
    Command(DeviceCommand),
    /// A stored notification.
    Notification(DeviceNotification),
}

impl StoredEntity {
    /// Entity category.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Command(_) => EventKind::Command,
            Self::Notification(_) => EventKind::Notification,
        }
    }

    /// Entity id.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Command(c) => c.id,
            Self::Notification(n) => n.id,
        }
    }

    /// Owning device.
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::Command(c) => &c.device_id,
            Self::Notification(n) => &n.device_id,
        }
    }

    /// Command or notification name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Command(c) => &c.command,
            Self::Notification(n) => &n.notification,
        }
    }

    /// Insert timestamp.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Command(c) => c.timestamp,
            Self::Notification(n) => n.timestamp,
        }
    }

    /// The command, if this is one.
    #[must_use]
    pub fn into_command(self) -> Option<DeviceCommand> {
        match self {
            Self::Command(c) => Some(c),
            Self::Notification(_) => None,
        }
    }

    /// The notification, if this is one.
    #[must_use]
    pub fn into_notification(self) -> Option<DeviceNotification> {
        match self {
            Self::Notification(n) => Some(n),
            Self::Command(_) => None,
        }
    }
}

/// Search criteria. Absent fields do not constrain the result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchQuery {
    /// Exact entity id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Devices to search; `None` searches every device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_ids: Option<BTreeSet<String>>,
    /// Names to include; `None` includes every name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<BTreeSet<String>>,
    /// Only entities strictly newer than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<DateTime<Utc>>,
    /// Only entities at or before this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<DateTime<Utc>>,
    /// Maximum number of results, oldest first.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<usize>,
}

impl SearchQuery {
    /// Query for one entity of one device.
    #[must_use]
    pub fn by_id(device_id: impl Into<String>, id: u64) -> Self {
        Self {
            id: Some(id),
            device_ids: Some(BTreeSet::from([device_id.into()])),
            ..Self::default()
        }
    }

    /// Whether a stored entity satisfies every present criterion.
    #[must_use]
    pub fn matches(&self, entity: &StoredEntity) -> bool {
        if self.id.is_some_and(|id| id != entity.id()) {
            return false;
        }
        if let Some(devices) = &self.device_ids
            && !devices.contains(entity.device_id())
        {
            return false;
        }
        if let Some(names) = &self.names
            && !names.contains(entity.name())
        {
            return false;
        }
        if self.since.is_some_and(|since| entity.timestamp() <= since) {
            return false;
        }
        if self.until.is_some_and(|until| entity.timestamp() > until) {
            return false;
        }
        true
    }
}

/// Device-partitioned lookup and write service for commands and notifications.
///
/// `kind` selects the command or notification partition; `CommandUpdate` is
/// treated as `Command`.
#[async_trait]
pub trait KeyedStore: Send + Sync {
    /// Look up one entity.
    async fn find(
        &self,
        id: u64,
        device_id: &str,
        kind: EventKind,
    ) -> StoreResult<Option<StoredEntity>>;

    /// Entities matching `query`, oldest first.
    async fn search(&self, kind: EventKind, query: &SearchQuery) -> StoreResult<Vec<StoredEntity>>;

    /// Insert or replace an entity.
    async fn put(&self, entity: StoredEntity) -> StoreResult<()>;

    /// Fold an update into a stored command, returning the merged command.
    ///
    /// Returns `Ok(None)` when the command is unknown.
    async fn merge(&self, update: &CommandUpdate) -> StoreResult<Option<DeviceCommand>>;
}
