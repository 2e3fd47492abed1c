//! User-supplied callbacks for delivered messages.

use async_trait::async_trait;
use hive_core::{DeviceCommand, DeviceEvent, DeviceNotification};

/// Receives commands and notifications from any subscription back end.
///
/// Calls for one subscription are made in delivery order and never overlap.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// A command matched a commands subscription.
    async fn on_command(&self, command: DeviceCommand);

    /// A notification matched a notifications subscription.
    async fn on_notification(&self, notification: DeviceNotification);
}

/// Route an event to the matching callback. Command updates are delivered as commands.
pub(crate) async fn deliver(handler: &dyn MessageHandler, event: DeviceEvent) {
    match event {
        DeviceEvent::Notification(notification) => handler.on_notification(notification).await,
        DeviceEvent::Command(command) | DeviceEvent::CommandUpdate(command) => {
            handler.on_command(command).await;
        },
    }
}
