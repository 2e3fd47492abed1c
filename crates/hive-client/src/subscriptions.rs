//! The interface both subscription back ends share.

use async_trait::async_trait;
use hive_core::EventKind;

use crate::error::SubscriptionResult;
use crate::filter::{SubscriptionFilter, SubscriptionKey};

/// Manages a client's active subscriptions.
///
/// A filter expands into one key per device (or one wildcard key).
/// Subscribing to a key that is already active is a no-op, and removing a
/// key that is not active is not an error.
#[async_trait]
pub trait Subscriptions: Send + Sync {
    /// Start delivering `kind` items matching `filter`.
    ///
    /// Returns the keys that were newly started.
    async fn subscribe(
        &self,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<Vec<SubscriptionKey>>;

    /// Stop the keys `filter` expands to. Returns how many were active.
    async fn unsubscribe(
        &self,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<usize>;

    /// Re-establish every active subscription from its last-seen cursor.
    async fn resubscribe_all(&self) -> SubscriptionResult<()>;

    /// Keys currently active, in key order.
    async fn active(&self) -> Vec<SubscriptionKey>;

    /// Stop everything. Safe to call more than once.
    async fn shutdown(&self);

    /// Subscribe to commands.
    async fn subscribe_commands(
        &self,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<Vec<SubscriptionKey>> {
        self.subscribe(EventKind::Command, filter).await
    }

    /// Subscribe to notifications.
    async fn subscribe_notifications(
        &self,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<Vec<SubscriptionKey>> {
        self.subscribe(EventKind::Notification, filter).await
    }

    /// Unsubscribe from commands.
    async fn unsubscribe_commands(&self, filter: &SubscriptionFilter) -> SubscriptionResult<usize> {
        self.unsubscribe(EventKind::Command, filter).await
    }

    /// Unsubscribe from notifications.
    async fn unsubscribe_notifications(
        &self,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<usize> {
        self.unsubscribe(EventKind::Notification, filter).await
    }
}
