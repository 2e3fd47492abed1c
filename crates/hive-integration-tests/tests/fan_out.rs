//! Subscriber identity and fan-out counts on the event bus.

use std::collections::BTreeMap;
use std::sync::Arc;

use hive_core::{DeviceEvent, DeviceScope, EventKind, SubscriptionId};
use hive_events::{EventBus, Filter, Subscriber, SubscriberKey};
use hive_test::prelude::*;

fn bus() -> (EventBus, RecordingDispatcher) {
    let dispatcher = RecordingDispatcher::new();
    (EventBus::new(Arc::new(dispatcher.clone())), dispatcher)
}

fn subscriber(reply_to: &str, id: u64, correlation: &str) -> Subscriber {
    Subscriber::new(SubscriptionId(id), reply_to, correlation)
}

fn notify(device: &str, name: &str) -> DeviceEvent {
    DeviceEvent::Notification(notification(device, name))
}

#[test]
fn test_three_names_one_subscriber() {
    let (bus, dispatcher) = bus();
    let sub = subscriber("frontend", 1, "c1");
    let rows = bus
        .subscribe_filter(
            &sub,
            EventKind::Notification,
            &Filter::new(DeviceScope::device("d1")).with_names(["a", "b", "c"]),
        )
        .unwrap();

    assert_eq!(rows.len(), 3);
    assert_eq!(bus.subscription_count(), 3);
    assert_eq!(bus.subscriber_count(), 1);

    // same identity under a different correlation id is still one subscriber
    bus.subscribe(
        subscriber("frontend", 1, "c2"),
        hive_events::Subscription::new(EventKind::Notification, DeviceScope::device("d2"), None),
    );
    assert_eq!(bus.subscriber_count(), 1);
    assert_eq!(bus.subscription_count(), 4);

    assert_eq!(bus.publish(&notify("d1", "b")), 1);
    assert_eq!(dispatcher.take().len(), 1);
}

#[test]
fn test_deliveries_equal_matching_rows() {
    let (bus, dispatcher) = bus();
    // (reply_to, id, device scope, names)
    let table: [(&str, u64, DeviceScope, Option<&[&str]>); 6] = [
        ("r1", 1, DeviceScope::device("d1"), None),
        ("r1", 2, DeviceScope::device("d1"), Some(&["temp"])),
        ("r2", 1, DeviceScope::device("d2"), Some(&["temp", "hum"])),
        ("r2", 2, DeviceScope::Any, Some(&["temp"])),
        ("r3", 1, DeviceScope::Any, None),
        ("r3", 2, DeviceScope::device("d3"), Some(&["hum"])),
    ];
    for (reply_to, id, scope, names) in &table {
        let mut filter = Filter::new(scope.clone());
        if let Some(names) = names {
            filter = filter.with_names(names.iter().copied());
        }
        bus.subscribe_filter(
            &subscriber(reply_to, *id, &format!("{reply_to}-{id}")),
            EventKind::Notification,
            &filter,
        )
        .unwrap();
    }
    // a command row never matches notifications
    bus.subscribe_filter(
        &subscriber("r4", 1, "cmd"),
        EventKind::Command,
        &Filter::new(DeviceScope::Any),
    )
    .unwrap();

    let events = [
        notify("d1", "temp"),
        notify("d2", "hum"),
        notify("d3", "temp"),
        notify("d4", "vibration"),
    ];
    let total: usize = events.iter().map(|event| bus.publish(event)).sum();

    // expected recipients, computed by hand from the table
    let expected: BTreeMap<(&str, u64), usize> = BTreeMap::from([
        (("r1", 1), 1), // d1 temp
        (("r1", 2), 1), // d1 temp
        (("r2", 1), 1), // d2 hum
        (("r2", 2), 2), // d1 temp, d3 temp
        (("r3", 1), 4), // everything
    ]);
    let m: usize = expected.values().sum();
    assert_eq!(total, m);

    let mut received: BTreeMap<(String, u64), usize> = BTreeMap::new();
    for (reply_to, response) in dispatcher.take() {
        let (id, event) = response.body().clone().into_event().unwrap();
        assert_eq!(event.kind(), EventKind::Notification);
        let count = received.entry((reply_to, id.0)).or_default();
        *count = count.saturating_add(1);
    }
    let received: BTreeMap<(&str, u64), usize> = received
        .iter()
        .map(|((r, id), n)| ((r.as_str(), *id), *n))
        .collect();
    assert_eq!(received, expected);
}

#[test]
fn test_unsubscribe_by_name_keeps_wildcard_row() {
    let (bus, _dispatcher) = bus();
    let sub = subscriber("r", 1, "c");
    bus.subscribe_filter(
        &sub,
        EventKind::Notification,
        &Filter::new(DeviceScope::device("d1")).with_names(["a", "b"]),
    )
    .unwrap();
    bus.subscribe_filter(&sub, EventKind::Notification, &Filter::new(DeviceScope::device("d1")))
        .unwrap();

    let key = SubscriberKey::new("r", SubscriptionId(1));
    assert_eq!(bus.unsubscribe_names(&key, ["a"]), 1);
    assert_eq!(bus.subscriptions_of(&key).len(), 2);

    assert_eq!(bus.unsubscribe(&key), 2);
    assert_eq!(bus.unsubscribe(&key), 0);
    assert_eq!(bus.publish(&notify("d1", "b")), 0);
}

#[test]
fn test_gone_reply_channel_is_unregistered() {
    let (bus, dispatcher) = bus();
    bus.subscribe_filter(
        &subscriber("gone", 1, "c"),
        EventKind::Notification,
        &Filter::new(DeviceScope::Any),
    )
    .unwrap();
    dispatcher.close_topic("gone");

    assert_eq!(bus.publish(&notify("d1", "t")), 0);
    assert_eq!(bus.subscriber_count(), 0);
}
