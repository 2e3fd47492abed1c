//! Request and response payloads.
//!
//! [`Body`] is an internally tagged union: the `action` field is the
//! discriminator, and serde's tag dispatch is the registry that maps it back
//! to a concrete payload type.

use std::collections::BTreeSet;
use std::fmt;

use chrono::{DateTime, Utc};
use hive_core::{
    CommandUpdate, DeviceCommand, DeviceEvent, DeviceNotification, DeviceScope, SearchQuery,
    SubscriptionId,
};
use serde::{Deserialize, Serialize};

/// Every payload kind that may travel on the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Body {
    /// Liveness probe.
    Ping,
    /// Reply to [`Body::Ping`].
    Pong,
    /// Business or server failure.
    Error(ErrorBody),

    /// Store and publish a notification.
    NotificationInsert(NotificationInsertRequest),
    /// The stored notification.
    NotificationInsertResponse(NotificationInsertResponse),
    /// Look up notifications.
    NotificationSearch(SearchRequest),
    /// Matching notifications.
    NotificationSearchResponse(NotificationSearchResponse),
    /// Register for notification events.
    NotificationSubscribe(SubscribeRequest),
    /// Subscribe acknowledgement with any backlog.
    NotificationSubscribeResponse(NotificationSubscribeResponse),
    /// Drop notification subscriptions.
    NotificationUnsubscribe(UnsubscribeRequest),
    /// Subscriptions that were dropped.
    NotificationUnsubscribeResponse(UnsubscribeResponse),

    /// Store and publish a command.
    CommandInsert(CommandInsertRequest),
    /// The stored command.
    CommandInsertResponse(CommandInsertResponse),
    /// Look up commands.
    CommandSearch(SearchRequest),
    /// Matching commands.
    CommandSearchResponse(CommandSearchResponse),
    /// Apply a device-reported update to a command.
    CommandUpdate(CommandUpdateRequest),
    /// The merged command.
    CommandUpdateResponse(CommandUpdateResponse),
    /// Register for command events.
    CommandSubscribe(SubscribeRequest),
    /// Subscribe acknowledgement with any backlog.
    CommandSubscribeResponse(CommandSubscribeResponse),
    /// Drop command subscriptions.
    CommandUnsubscribe(UnsubscribeRequest),
    /// Subscriptions that were dropped.
    CommandUnsubscribeResponse(UnsubscribeResponse),
    /// Wait for one command to be updated.
    CommandUpdateSubscribe(CommandUpdateSubscribeRequest),
    /// Waiter acknowledgement, with the command if it is already updated.
    CommandUpdateSubscribeResponse(CommandUpdateSubscribeResponse),

    /// Drop every subscription bound to a device.
    DeviceDelete(DeviceDeleteRequest),
    /// Number of subscriptions removed.
    DeviceDeleteResponse(DeviceDeleteResponse),

    /// Pushed notification.
    NotificationEvent(NotificationEvent),
    /// Pushed command.
    CommandEvent(CommandEvent),
    /// Pushed command update.
    CommandUpdateEvent(CommandEvent),
}

impl Body {
    /// Discriminator of this payload.
    #[must_use]
    pub fn action(&self) -> Action {
        match self {
            Self::Ping => Action::Ping,
            Self::Pong => Action::Pong,
            Self::Error(_) => Action::Error,
            Self::NotificationInsert(_) => Action::NotificationInsert,
            Self::NotificationInsertResponse(_) => Action::NotificationInsertResponse,
            Self::NotificationSearch(_) => Action::NotificationSearch,
            Self::NotificationSearchResponse(_) => Action::NotificationSearchResponse,
            Self::NotificationSubscribe(_) => Action::NotificationSubscribe,
            Self::NotificationSubscribeResponse(_) => Action::NotificationSubscribeResponse,
            Self::NotificationUnsubscribe(_) => Action::NotificationUnsubscribe,
            Self::NotificationUnsubscribeResponse(_) => Action::NotificationUnsubscribeResponse,
            Self::CommandInsert(_) => Action::CommandInsert,
            Self::CommandInsertResponse(_) => Action::CommandInsertResponse,
            Self::CommandSearch(_) => Action::CommandSearch,
            Self::CommandSearchResponse(_) => Action::CommandSearchResponse,
            Self::CommandUpdate(_) => Action::CommandUpdate,
            Self::CommandUpdateResponse(_) => Action::CommandUpdateResponse,
            Self::CommandSubscribe(_) => Action::CommandSubscribe,
            Self::CommandSubscribeResponse(_) => Action::CommandSubscribeResponse,
            Self::CommandUnsubscribe(_) => Action::CommandUnsubscribe,
            Self::CommandUnsubscribeResponse(_) => Action::CommandUnsubscribeResponse,
            Self::CommandUpdateSubscribe(_) => Action::CommandUpdateSubscribe,
            Self::CommandUpdateSubscribeResponse(_) => Action::CommandUpdateSubscribeResponse,
            Self::DeviceDelete(_) => Action::DeviceDelete,
            Self::DeviceDeleteResponse(_) => Action::DeviceDeleteResponse,
            Self::NotificationEvent(_) => Action::NotificationEvent,
            Self::CommandEvent(_) => Action::CommandEvent,
            Self::CommandUpdateEvent(_) => Action::CommandUpdateEvent,
        }
    }

    /// Wrap a device event for delivery to one subscriber.
    #[must_use]
    pub fn event(subscription_id: SubscriptionId, event: DeviceEvent) -> Self {
        match event {
            DeviceEvent::Notification(notification) => Self::NotificationEvent(NotificationEvent {
                subscription_id,
                notification,
            }),
            DeviceEvent::Command(command) => Self::CommandEvent(CommandEvent {
                subscription_id,
                command,
            }),
            DeviceEvent::CommandUpdate(command) => Self::CommandUpdateEvent(CommandEvent {
                subscription_id,
                command,
            }),
        }
    }

    /// Whether this is a pushed event rather than a reply.
    #[must_use]
    pub fn is_event(&self) -> bool {
        matches!(
            self,
            Self::NotificationEvent(_) | Self::CommandEvent(_) | Self::CommandUpdateEvent(_)
        )
    }

    /// Unwrap a pushed event, if this is one.
    #[must_use]
    pub fn into_event(self) -> Option<(SubscriptionId, DeviceEvent)> {
        match self {
            Self::NotificationEvent(e) => {
                Some((e.subscription_id, DeviceEvent::Notification(e.notification)))
            },
            Self::CommandEvent(e) => Some((e.subscription_id, DeviceEvent::Command(e.command))),
            Self::CommandUpdateEvent(e) => {
                Some((e.subscription_id, DeviceEvent::CommandUpdate(e.command)))
            },
            _ => None,
        }
    }
}

/// Discriminator values of [`Body`], used to key handler lookups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[allow(missing_docs)]
pub enum Action {
    Ping,
    Pong,
    Error,
    NotificationInsert,
    NotificationInsertResponse,
    NotificationSearch,
    NotificationSearchResponse,
    NotificationSubscribe,
    NotificationSubscribeResponse,
    NotificationUnsubscribe,
    NotificationUnsubscribeResponse,
    CommandInsert,
    CommandInsertResponse,
    CommandSearch,
    CommandSearchResponse,
    CommandUpdate,
    CommandUpdateResponse,
    CommandSubscribe,
    CommandSubscribeResponse,
    CommandUnsubscribe,
    CommandUnsubscribeResponse,
    CommandUpdateSubscribe,
    CommandUpdateSubscribeResponse,
    DeviceDelete,
    DeviceDeleteResponse,
    NotificationEvent,
    CommandEvent,
    CommandUpdateEvent,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // serde's snake_case names are the canonical spelling
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(s)) => f.write_str(&s),
            _ => write!(f, "{self:?}"),
        }
    }
}

/// Error payload. `code` follows HTTP conventions: 4xx client, 5xx server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Status code.
    pub code: u16,
    /// Human-readable reason.
    pub message: String,
}

/// Notification to store and publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationInsertRequest {
    /// Notification as submitted; id and timestamp are assigned by the handler.
    pub notification: DeviceNotification,
}

/// Stored notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationInsertResponse {
    /// Notification with id and timestamp assigned.
    pub notification: DeviceNotification,
}

/// Command to store and publish.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInsertRequest {
    /// Command as submitted; id and timestamp are assigned by the handler.
    pub command: DeviceCommand,
}

/// Stored command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandInsertResponse {
    /// Command with id and timestamp assigned.
    pub command: DeviceCommand,
}

/// Command update to merge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandUpdateRequest {
    /// The delta.
    pub update: CommandUpdate,
}

/// Merged command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandUpdateResponse {
    /// Command after the update was applied.
    pub command: DeviceCommand,
}

/// Search criteria for commands or notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchRequest {
    /// Criteria.
    pub query: SearchQuery,
}

/// Notification search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NotificationSearchResponse {
    /// Matches, oldest first.
    pub notifications: Vec<DeviceNotification>,
}

/// Command search result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandSearchResponse {
    /// Matches, oldest first.
    pub commands: Vec<DeviceCommand>,
}

/// Subscribe to commands or notifications of one device scope.
///
/// The id and device are optional on the wire so a malformed request can be
/// rejected with a precise message instead of a decode failure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    /// Handle of the logical subscription.
    #[serde(default)]
    pub subscription_id: Option<SubscriptionId>,
    /// Device scope; `"*"` for every device.
    #[serde(default)]
    pub device: Option<DeviceScope>,
    /// Names to match; absent matches every name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<BTreeSet<String>>,
    /// Replay stored items newer than this.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

/// Notification subscribe acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationSubscribeResponse {
    /// Registered handle.
    pub subscription_id: SubscriptionId,
    /// Stored notifications newer than the requested timestamp.
    #[serde(default)]
    pub notifications: Vec<DeviceNotification>,
}

/// Command subscribe acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandSubscribeResponse {
    /// Registered handle.
    pub subscription_id: SubscriptionId,
    /// Stored commands newer than the requested timestamp.
    #[serde(default)]
    pub commands: Vec<DeviceCommand>,
}

/// Drop subscriptions, optionally only their rows for some names.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeRequest {
    /// Handles to drop.
    pub subscription_ids: BTreeSet<SubscriptionId>,
    /// When present, only rows for these names are removed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub names: Option<BTreeSet<String>>,
}

/// Handles that had registered rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnsubscribeResponse {
    /// Handles that were found and removed.
    pub subscription_ids: BTreeSet<SubscriptionId>,
}

/// Wait for a specific command to be updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandUpdateSubscribeRequest {
    /// Handle of the waiter.
    pub subscription_id: SubscriptionId,
    /// Device owning the command.
    pub device_id: String,
    /// Command to watch.
    pub command_id: u64,
}

/// Waiter acknowledgement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandUpdateSubscribeResponse {
    /// Registered handle.
    pub subscription_id: SubscriptionId,
    /// The command, if it has already been updated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<DeviceCommand>,
}

/// Device removed; purge its subscriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDeleteRequest {
    /// Removed device.
    pub device_id: String,
}

/// Purge result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDeleteResponse {
    /// Subscription rows removed.
    pub removed: usize,
}

/// A notification pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    /// Subscription that matched.
    pub subscription_id: SubscriptionId,
    /// The notification.
    pub notification: DeviceNotification,
}

/// A command (or command update) pushed to a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandEvent {
    /// Subscription that matched.
    pub subscription_id: SubscriptionId,
    /// The command.
    pub command: DeviceCommand,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_action_tag_is_discriminator() {
        let body = Body::NotificationSubscribe(SubscribeRequest {
            subscription_id: Some(SubscriptionId(7)),
            device: Some(DeviceScope::Any),
            names: None,
            timestamp: None,
        });
        let value = serde_json::to_value(&body).unwrap();
        assert_eq!(value["action"], "notification_subscribe");
        assert_eq!(value["subscriptionId"], 7);
        assert_eq!(value["device"], "*");
    }

    #[test]
    fn test_decode_dispatches_on_action() {
        let body: Body = serde_json::from_value(json!({
            "action": "command_update_subscribe",
            "subscriptionId": 3,
            "deviceId": "d1",
            "commandId": 9
        }))
        .unwrap();
        assert_eq!(body.action(), Action::CommandUpdateSubscribe);

        let ping: Body = serde_json::from_value(json!({"action": "ping"})).unwrap();
        assert_eq!(ping, Body::Ping);
    }

    #[test]
    fn test_unknown_action_is_rejected() {
        let result: Result<Body, _> = serde_json::from_value(json!({"action": "teleport"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_missing_subscription_fields_still_decode() {
        let body: Body =
            serde_json::from_value(json!({"action": "notification_subscribe"})).unwrap();
        match body {
            Body::NotificationSubscribe(req) => {
                assert!(req.subscription_id.is_none());
                assert!(req.device.is_none());
            },
            other => panic!("unexpected body {other:?}"),
        }
    }

    #[test]
    fn test_event_wrapping() {
        let n = DeviceNotification::new("d1", "temperature");
        let body = Body::event(SubscriptionId(1), DeviceEvent::Notification(n.clone()));
        assert_eq!(body.action(), Action::NotificationEvent);
        let (id, event) = body.into_event().unwrap();
        assert_eq!(id, SubscriptionId(1));
        assert_eq!(event, DeviceEvent::Notification(n));
        assert!(Body::Pong.into_event().is_none());
    }

    #[test]
    fn test_action_display_matches_tag() {
        assert_eq!(Action::CommandUpdateEvent.to_string(), "command_update_event");
    }
}
