//! Publish/subscribe router.

use std::sync::Arc;

use hive_core::{DeviceEvent, EventKind};
use hive_rpc::{Body, MessageDispatcher, Response, RpcError};
use tracing::{debug, trace, warn};

use crate::error::EventBusResult;
use crate::filter::Filter;
use crate::registry::SubscriberRegistry;
use crate::subscriber::{Subscriber, SubscriberKey, Subscription};

/// Matches published device events against registered rows and streams each
/// match to its subscriber's reply channel.
///
/// Matching runs inline on the publishing task.
pub struct EventBus {
    registry: Arc<SubscriberRegistry>,
    dispatcher: Arc<dyn MessageDispatcher>,
}

impl EventBus {
    /// Create a bus delivering through `dispatcher`.
    #[must_use]
    pub fn new(dispatcher: Arc<dyn MessageDispatcher>) -> Self {
        Self {
            registry: Arc::new(SubscriberRegistry::new()),
            dispatcher,
        }
    }

    /// The underlying registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Register one row.
    pub fn subscribe(&self, subscriber: Subscriber, subscription: Subscription) {
        debug!(
            subscriber = %subscriber.key(),
            subscription = %subscription,
            "Subscribing"
        );
        self.registry.register(subscriber, subscription);
    }

    /// Expand `filter` and register every resulting row.
    ///
    /// Returns the rows registered.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the filter has no device scope;
    /// nothing is registered in that case.
    pub fn subscribe_filter(
        &self,
        subscriber: &Subscriber,
        kind: EventKind,
        filter: &Filter,
    ) -> EventBusResult<Vec<Subscription>> {
        let rows = filter.expand(kind)?;
        for row in &rows {
            self.subscribe(subscriber.clone(), row.clone());
        }
        Ok(rows)
    }

    /// Remove a subscriber with all its rows. Unknown subscribers are a no-op.
    pub fn unsubscribe(&self, key: &SubscriberKey) -> usize {
        self.registry.unregister(key)
    }

    /// Remove a single row of a subscriber.
    pub fn unsubscribe_subscription(&self, key: &SubscriberKey, subscription: &Subscription) -> bool {
        self.registry.unregister_subscription(key, subscription)
    }

    /// Remove the name-scoped rows of a subscriber for `names`.
    pub fn unsubscribe_names<'a, I>(&self, key: &SubscriberKey, names: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        self.registry.unregister_names(key, names)
    }

    /// Drop every row bound to a device.
    pub fn unregister_device(&self, device_id: &str) -> usize {
        self.registry.unregister_device(device_id)
    }

    /// Rows registered by a subscriber.
    #[must_use]
    pub fn subscriptions_of(&self, key: &SubscriberKey) -> Vec<Subscription> {
        self.registry.subscriptions_of(key)
    }

    /// Number of distinct subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.registry.subscriber_count()
    }

    /// Number of registered rows.
    #[must_use]
    pub fn subscription_count(&self) -> usize {
        self.registry.subscription_count()
    }

    /// Deliver `event` to every matching row. Returns the number of deliveries.
    ///
    /// A subscriber whose reply channel is gone is unregistered on the spot.
    pub fn publish(&self, event: &DeviceEvent) -> usize {
        let mut delivered = 0usize;

        for subscription in Subscription::applicable_to(event) {
            for subscriber in self.registry.subscribers_of(&subscription) {
                let body = Body::event(subscriber.id, event.clone());
                let response = Response::stream(subscriber.correlation_id.clone(), body);

                match self.dispatcher.dispatch(&subscriber.reply_to, response) {
                    Ok(()) => {
                        trace!(
                            subscriber = %subscriber.key(),
                            subscription = %subscription,
                            "Delivered event"
                        );
                        delivered = delivered.saturating_add(1);
                    },
                    Err(RpcError::UnknownReplyTopic(topic)) => {
                        debug!(
                            subscriber = %subscriber.key(),
                            topic = %topic,
                            "Reply channel gone, dropping subscriber"
                        );
                        self.registry.unregister(&subscriber.key());
                    },
                    Err(e) => {
                        warn!(
                            subscriber = %subscriber.key(),
                            error = %e,
                            "Failed to deliver event"
                        );
                    },
                }
            }
        }

        debug!(
            kind = %event.kind(),
            device_id = event.device_id(),
            delivered,
            "Published event"
        );
        delivered
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("subscriptions", &self.subscription_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::{DeviceCommand, DeviceNotification, DeviceScope, SubscriptionId};
    use hive_test::RecordingDispatcher;

    fn notification(device: &str, name: &str) -> DeviceEvent {
        DeviceEvent::Notification(DeviceNotification::new(device, name))
    }

    fn bus() -> (EventBus, Arc<RecordingDispatcher>) {
        let dispatcher = Arc::new(RecordingDispatcher::new());
        (EventBus::new(dispatcher.clone()), dispatcher)
    }

    #[test]
    fn test_publish_reaches_only_matching_rows() {
        let (bus, dispatcher) = bus();
        let sub1 = Subscriber::new(SubscriptionId(1), "topic", "corr-1");
        let sub2 = Subscriber::new(SubscriptionId(2), "topic", "corr-2");
        let sub3 = Subscriber::new(SubscriptionId(3), "topic", "corr-3");
        let sub4 = Subscriber::new(SubscriptionId(4), "topic", "corr-4");

        bus.subscribe(sub1.clone(), Subscription::new(EventKind::Notification, "d1".into(), None));
        bus.subscribe(
            sub2.clone(),
            Subscription::new(EventKind::Notification, "d1".into(), Some("temperature".into())),
        );
        bus.subscribe(
            sub3,
            Subscription::new(EventKind::Notification, "d1".into(), Some("vibration".into())),
        );
        bus.subscribe(
            sub4,
            Subscription::new(EventKind::Command, "d1".into(), Some("go_offline".into())),
        );

        assert_eq!(bus.publish(&notification("d1", "temperature")), 2);

        let sent = dispatcher.take();
        let mut correlations: Vec<_> = sent
            .iter()
            .map(|(_, r)| r.correlation_id().to_owned())
            .collect();
        correlations.sort();
        assert_eq!(correlations, vec!["corr-1", "corr-2"]);
        for (reply_to, response) in &sent {
            assert_eq!(reply_to, "topic");
            assert!(!response.is_last());
            assert!(!response.is_failed());
        }

        bus.unsubscribe(&sub1.key());
        assert_eq!(bus.publish(&notification("d1", "temperature")), 1);
        assert_eq!(dispatcher.take()[0].1.correlation_id(), "corr-2");
    }

    #[test]
    fn test_one_delivery_per_matching_row() {
        let (bus, _dispatcher) = bus();
        let sub = Subscriber::new(SubscriptionId(1), "topic", "corr");
        bus.subscribe(sub.clone(), Subscription::new(EventKind::Notification, "d1".into(), None));
        bus.subscribe(
            sub.clone(),
            Subscription::new(EventKind::Notification, DeviceScope::Any, Some("t".into())),
        );
        bus.subscribe(sub, Subscription::new(EventKind::Notification, "d2".into(), None));

        // d1/t matches the first two rows, not the d2 row
        assert_eq!(bus.publish(&notification("d1", "t")), 2);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_event_carries_subscription_id() {
        let (bus, dispatcher) = bus();
        bus.subscribe(
            Subscriber::new(SubscriptionId(42), "topic", "corr"),
            Subscription::new(EventKind::Command, DeviceScope::Any, None),
        );
        bus.publish(&DeviceEvent::Command(DeviceCommand::new("d9", "reboot")));

        let (_, response) = dispatcher.take().remove(0);
        let (id, event) = response.body().clone().into_event().unwrap();
        assert_eq!(id, SubscriptionId(42));
        assert_eq!(event.device_id(), "d9");
    }

    #[test]
    fn test_subscribe_filter_validation_registers_nothing() {
        let (bus, _) = bus();
        let sub = Subscriber::new(SubscriptionId(1), "topic", "corr");
        assert!(bus
            .subscribe_filter(&sub, EventKind::Notification, &Filter::default())
            .is_err());
        assert_eq!(bus.subscription_count(), 0);

        let rows = bus
            .subscribe_filter(
                &sub,
                EventKind::Notification,
                &Filter::new("d1".into()).with_names(["a", "b", "c"]),
            )
            .unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(bus.subscription_count(), 3);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn test_gone_reply_channel_drops_subscriber() {
        let (bus, dispatcher) = bus();
        dispatcher.close_topic("gone");
        bus.subscribe(
            Subscriber::new(SubscriptionId(1), "gone", "corr"),
            Subscription::new(EventKind::Notification, DeviceScope::Any, None),
        );

        assert_eq!(bus.publish(&notification("d1", "x")), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
