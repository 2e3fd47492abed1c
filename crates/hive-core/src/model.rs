//! Device messages and the events published when they change.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Category of a device event. Subscriptions match on this before anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A notification sent by a device.
    Notification,
    /// A command sent to a device.
    Command,
    /// A device reporting the outcome of a command.
    CommandUpdate,
}

impl EventKind {
    /// Stable lowercase name used in logs and on the wire.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notification => "notification",
            Self::Command => "command",
            Self::CommandUpdate => "command_update",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification emitted by a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceNotification {
    /// Identifier assigned on insert.
    #[serde(default)]
    pub id: u64,
    /// Device that produced the notification.
    pub device_id: String,
    /// Notification name, e.g. `temperature`.
    pub notification: String,
    /// Server timestamp assigned on insert.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Free-form payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

impl DeviceNotification {
    /// Create a notification stamped with the current time and no id.
    #[must_use]
    pub fn new(device_id: impl Into<String>, notification: impl Into<String>) -> Self {
        Self {
            id: 0,
            device_id: device_id.into(),
            notification: notification.into(),
            timestamp: Utc::now(),
            parameters: None,
        }
    }

    /// Attach a payload.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// A command addressed to a device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceCommand {
    /// Identifier assigned on insert.
    #[serde(default)]
    pub id: u64,
    /// Target device.
    pub device_id: String,
    /// Command name, e.g. `go_offline`.
    pub command: String,
    /// Server timestamp assigned on insert.
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// When the device last reported on this command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    /// Issuing user, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<u64>,
    /// Free-form arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Seconds the command stays relevant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u32>,
    /// Status reported by the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Result reported by the device.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Whether the device has reported on this command.
    #[serde(default)]
    pub is_updated: bool,
}

impl DeviceCommand {
    /// Create a command stamped with the current time and no id.
    #[must_use]
    pub fn new(device_id: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            id: 0,
            device_id: device_id.into(),
            command: command.into(),
            timestamp: Utc::now(),
            last_updated: None,
            user_id: None,
            parameters: None,
            lifetime: None,
            status: None,
            result: None,
            is_updated: false,
        }
    }

    /// Attach arguments.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Value) -> Self {
        self.parameters = Some(parameters);
        self
    }

    /// Override the timestamp.
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Fold a device-reported update into this command.
    ///
    /// Only fields present in the update are overwritten.
    pub fn apply(&mut self, update: &CommandUpdate) {
        if let Some(status) = &update.status {
            self.status = Some(status.clone());
        }
        if let Some(result) = &update.result {
            self.result = Some(result.clone());
        }
        if let Some(parameters) = &update.parameters {
            self.parameters = Some(parameters.clone());
        }
        if let Some(lifetime) = update.lifetime {
            self.lifetime = Some(lifetime);
        }
        self.last_updated = Some(Utc::now());
        self.is_updated = true;
    }
}

/// The delta a device reports for one of its commands.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandUpdate {
    /// Command being updated.
    pub id: u64,
    /// Device owning the command.
    pub device_id: String,
    /// New status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// New result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Replacement arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
    /// Replacement lifetime.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lifetime: Option<u32>,
}

impl CommandUpdate {
    /// Start an empty update for a command.
    #[must_use]
    pub fn new(device_id: impl Into<String>, id: u64) -> Self {
        Self {
            id,
            device_id: device_id.into(),
            ..Self::default()
        }
    }

    /// Set the reported status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }

    /// Set the reported result.
    #[must_use]
    pub fn with_result(mut self, result: Value) -> Self {
        self.result = Some(result);
        self
    }
}

/// Something that happened on a device and may be of interest to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum DeviceEvent {
    /// A notification was inserted.
    Notification(DeviceNotification),
    /// A command was inserted.
    Command(DeviceCommand),
    /// A command was updated by its device.
    CommandUpdate(DeviceCommand),
}

impl DeviceEvent {
    /// Event category.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Notification(_) => EventKind::Notification,
            Self::Command(_) => EventKind::Command,
            Self::CommandUpdate(_) => EventKind::CommandUpdate,
        }
    }

    /// Id of the stored entity.
    #[must_use]
    pub fn id(&self) -> u64 {
        match self {
            Self::Notification(n) => n.id,
            Self::Command(c) | Self::CommandUpdate(c) => c.id,
        }
    }

    /// Device the event belongs to.
    #[must_use]
    pub fn device_id(&self) -> &str {
        match self {
            Self::Notification(n) => &n.device_id,
            Self::Command(c) | Self::CommandUpdate(c) => &c.device_id,
        }
    }

    /// Name used for subscription matching.
    ///
    /// Command updates are matched on the command id, since waiters register
    /// for one specific command.
    #[must_use]
    pub fn name(&self) -> Cow<'_, str> {
        match self {
            Self::Notification(n) => Cow::Borrowed(n.notification.as_str()),
            Self::Command(c) => Cow::Borrowed(c.command.as_str()),
            Self::CommandUpdate(c) => Cow::Owned(c.id.to_string()),
        }
    }

    /// Timestamp that orders this event for cursor purposes.
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            Self::Notification(n) => n.timestamp,
            Self::Command(c) => c.timestamp,
            Self::CommandUpdate(c) => c.last_updated.unwrap_or(c.timestamp),
        }
    }
}
