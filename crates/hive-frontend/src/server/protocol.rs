//! JSON messages of the client socket protocol.
//!
//! Requests are objects with an `action` and an optional `requestId`.
//! Replies echo both and add `"status": "success"` plus result fields, or
//! `"status": "error"` with `code` and `error`. Pushed items carry the
//! `subscriptionId` they matched and no `requestId`.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use hive_core::{CommandUpdate, DeviceCommand, DeviceEvent, DeviceNotification, DeviceScope};
use serde::Deserialize;
use serde_json::{Map, Value, json};

use crate::filter::EventFilter;

/// Reply to a handled request.
pub(crate) fn success(action: &str, request_id: Option<Value>, fields: Map<String, Value>) -> Value {
    let mut reply = fields;
    reply.insert("action".to_owned(), Value::from(action));
    if let Some(id) = request_id {
        reply.insert("requestId".to_owned(), id);
    }
    reply.insert("status".to_owned(), Value::from("success"));
    Value::Object(reply)
}

/// Reply to a rejected or failed request.
pub(crate) fn failure(action: &str, request_id: Option<Value>, code: u16, error: &str) -> Value {
    let mut reply = json!({
        "action": action,
        "status": "error",
        "code": code,
        "error": error,
    });
    if let Some(id) = request_id {
        reply["requestId"] = id;
    }
    reply
}

/// Unsolicited delivery of a matched item.
pub(crate) fn push(subscription_id: u64, event: &DeviceEvent) -> Value {
    match event {
        DeviceEvent::Notification(n) => json!({
            "action": "notification/insert",
            "subscriptionId": subscription_id,
            "notification": n,
        }),
        DeviceEvent::Command(c) => json!({
            "action": "command/insert",
            "subscriptionId": subscription_id,
            "command": c,
        }),
        DeviceEvent::CommandUpdate(c) => json!({
            "action": "command/update",
            "subscriptionId": subscription_id,
            "command": c,
        }),
    }
}

/// `notification/subscribe` and `command/subscribe`.
///
/// `deviceIds` wins over `deviceId`; `"*"` or neither means every device.
/// An empty `names` list means every name.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubscribeMessage {
    #[serde(default)]
    device_id: Option<DeviceScope>,
    #[serde(default)]
    device_ids: Option<Vec<String>>,
    #[serde(default)]
    names: Option<BTreeSet<String>>,
    #[serde(default)]
    timestamp: Option<DateTime<Utc>>,
}

impl SubscribeMessage {
    pub(crate) fn into_filter(self) -> EventFilter {
        let device_ids = self.device_ids.or_else(|| match self.device_id {
            Some(DeviceScope::Device(id)) => Some(vec![id]),
            Some(DeviceScope::Any) | None => None,
        });
        EventFilter {
            device_ids,
            names: self.names.filter(|names| !names.is_empty()),
            since: self.timestamp,
        }
    }
}

/// `notification/unsubscribe` and `command/unsubscribe`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UnsubscribeMessage {
    pub(crate) subscription_id: u64,
}

#[derive(Debug, Deserialize)]
struct NotificationPayload {
    notification: String,
    #[serde(default)]
    parameters: Option<Value>,
}

/// `notification/insert`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct NotificationInsertMessage {
    pub(crate) device_id: String,
    notification: NotificationPayload,
}

impl NotificationInsertMessage {
    pub(crate) fn notification(self) -> (String, DeviceNotification) {
        let mut notification = DeviceNotification::new(&self.device_id, self.notification.notification);
        notification.parameters = self.notification.parameters;
        (self.device_id, notification)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommandPayload {
    command: String,
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    lifetime: Option<u32>,
    #[serde(default)]
    user_id: Option<u64>,
}

/// `command/insert`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommandInsertMessage {
    pub(crate) device_id: String,
    command: CommandPayload,
}

impl CommandInsertMessage {
    pub(crate) fn command(self) -> (String, DeviceCommand) {
        let mut command = DeviceCommand::new(&self.device_id, self.command.command);
        command.parameters = self.command.parameters;
        command.lifetime = self.command.lifetime;
        command.user_id = self.command.user_id;
        (self.device_id, command)
    }
}

#[derive(Debug, Default, Deserialize)]
struct UpdatePayload {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    parameters: Option<Value>,
    #[serde(default)]
    lifetime: Option<u32>,
}

/// `command/update`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CommandUpdateMessage {
    pub(crate) device_id: String,
    pub(crate) command_id: u64,
    #[serde(default)]
    command: UpdatePayload,
}

impl CommandUpdateMessage {
    pub(crate) fn update(self) -> (String, u64, CommandUpdate) {
        let mut update = CommandUpdate::new(&self.device_id, self.command_id);
        update.status = self.command.status;
        update.result = self.command.result;
        update.parameters = self.command.parameters;
        update.lifetime = self.command.lifetime;
        (self.device_id, self.command_id, update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_echoes_request() {
        let mut fields = Map::new();
        fields.insert("subscriptionId".into(), json!(3));
        let reply = success("notification/subscribe", Some(json!("r1")), fields);
        assert_eq!(reply["status"], "success");
        assert_eq!(reply["requestId"], "r1");
        assert_eq!(reply["subscriptionId"], 3);
    }

    #[test]
    fn test_failure_shape() {
        let reply = failure("command/update", None, 404, "not found");
        assert_eq!(reply["status"], "error");
        assert_eq!(reply["code"], 404);
        assert_eq!(reply["error"], "not found");
        assert!(reply.get("requestId").is_none());
    }

    #[test]
    fn test_subscribe_wildcard_and_names() {
        let msg: SubscribeMessage =
            serde_json::from_value(json!({"deviceId": "*", "names": []})).unwrap();
        let filter = msg.into_filter();
        assert_eq!(filter.device_ids, None);
        assert_eq!(filter.names, None);

        let msg: SubscribeMessage =
            serde_json::from_value(json!({"deviceId": "d1", "names": ["temp"]})).unwrap();
        let filter = msg.into_filter();
        assert_eq!(filter.device_ids, Some(vec!["d1".to_owned()]));
        assert_eq!(filter.names, Some(BTreeSet::from(["temp".to_owned()])));

        let msg: SubscribeMessage =
            serde_json::from_value(json!({"deviceId": "d1", "deviceIds": ["d2", "d3"]})).unwrap();
        assert_eq!(msg.into_filter().device_ids.unwrap().len(), 2);
    }

    #[test]
    fn test_push_actions() {
        let n = DeviceEvent::Notification(DeviceNotification::new("d1", "temp"));
        assert_eq!(push(7, &n)["action"], "notification/insert");
        assert_eq!(push(7, &n)["subscriptionId"], 7);
        let c = DeviceEvent::CommandUpdate(DeviceCommand::new("d1", "reboot"));
        assert_eq!(push(7, &c)["action"], "command/update");
    }

    #[test]
    fn test_insert_payloads() {
        let msg: NotificationInsertMessage = serde_json::from_value(json!({
            "deviceId": "d1",
            "notification": {"notification": "temp", "parameters": {"t": 21}}
        }))
        .unwrap();
        let (device, n) = msg.notification();
        assert_eq!(device, "d1");
        assert_eq!(n.device_id, "d1");
        assert_eq!(n.parameters, Some(json!({"t": 21})));

        let msg: CommandUpdateMessage = serde_json::from_value(json!({
            "deviceId": "d1", "commandId": 4, "command": {"status": "done"}
        }))
        .unwrap();
        let (_, id, update) = msg.update();
        assert_eq!(id, 4);
        assert_eq!(update.status.as_deref(), Some("done"));
    }
}
