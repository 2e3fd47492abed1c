//! Test fixtures for common types.

use chrono::{DateTime, Utc};
use hive_core::{DeviceCommand, DeviceEvent, DeviceNotification};

/// A notification with no id, stamped now.
#[must_use]
pub fn notification(device_id: &str, name: &str) -> DeviceNotification {
    DeviceNotification::new(device_id, name)
}

/// A notification at a fixed timestamp, as a device event.
#[must_use]
pub fn notification_at(device_id: &str, name: &str, timestamp: DateTime<Utc>) -> DeviceEvent {
    DeviceEvent::Notification(notification(device_id, name).with_timestamp(timestamp))
}

/// A command with no id, stamped now.
#[must_use]
pub fn command(device_id: &str, name: &str) -> DeviceCommand {
    DeviceCommand::new(device_id, name)
}

/// A command at a fixed timestamp, as a device event.
#[must_use]
pub fn command_at(device_id: &str, name: &str, timestamp: DateTime<Utc>) -> DeviceEvent {
    DeviceEvent::Command(command(device_id, name).with_timestamp(timestamp))
}

/// `secs` seconds after the Unix epoch.
///
/// # Panics
///
/// Panics if `secs` is out of chrono's range.
#[must_use]
#[allow(clippy::expect_used)]
pub fn at(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).expect("timestamp in range")
}

/// Route `tracing` output to the test harness. Safe to call from every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}
