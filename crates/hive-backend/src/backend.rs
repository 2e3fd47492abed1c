//! Wiring of broker, server, bus and store.

use std::sync::Arc;
use std::time::Duration;

use hive_config::{HiveConfig, LoggingSection};
use hive_core::KeyedStore;
use hive_events::EventBus;
use hive_rpc::{LocalBroker, RpcClient, RpcServer};
use hive_telemetry::{LogConfig, LogFormat};
use tracing::info;

use crate::cache::MessageCache;
use crate::error::{BackendError, BackendResult};
use crate::handlers::{HandlerContext, request_handlers};

/// A running backend.
pub struct Backend {
    broker: Arc<LocalBroker>,
    bus: Arc<EventBus>,
    store: Arc<dyn KeyedStore>,
    server: RpcServer,
    request_timeout: Duration,
}

impl Backend {
    /// Start over a fresh [`MessageCache`].
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// See [`with_store`](Self::with_store).
    pub fn start(config: &HiveConfig) -> BackendResult<Self> {
        Self::with_store(config, Arc::new(MessageCache::new()))
    }

    /// Start over the given store.
    ///
    /// Must be called within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::PartitionsTaken`] if the broker already has a
    /// consumer, which cannot happen for the broker created here.
    pub fn with_store(config: &HiveConfig, store: Arc<dyn KeyedStore>) -> BackendResult<Self> {
        let broker = Arc::new(LocalBroker::new(config.rpc.workers));
        let bus = Arc::new(EventBus::new(broker.clone()));
        let ctx = Arc::new(HandlerContext::new(
            Arc::clone(&store),
            Arc::clone(&bus),
            config.cache.search_limit,
        ));

        let partitions = broker
            .take_partitions()
            .ok_or(BackendError::PartitionsTaken)?;
        let server = RpcServer::start(
            partitions,
            Arc::new(request_handlers(&ctx)),
            broker.clone(),
        );
        info!(
            workers = server.worker_count(),
            search_limit = config.cache.search_limit,
            "Backend started"
        );

        Ok(Self {
            broker,
            bus,
            store,
            server,
            request_timeout: config.rpc.request_timeout(),
        })
    }

    /// The transport, for clients to connect to.
    #[must_use]
    pub fn broker(&self) -> Arc<LocalBroker> {
        Arc::clone(&self.broker)
    }

    /// The event bus inserts are published through.
    #[must_use]
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The keyed store.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn KeyedStore> {
        &self.store
    }

    /// A client on its own reply channel, using the configured call timeout.
    ///
    /// Must be called within a Tokio runtime.
    #[must_use]
    pub fn client(&self, reply_to: impl Into<String>) -> RpcClient {
        RpcClient::connect(self.broker(), reply_to, self.request_timeout)
    }

    /// Stop the partition workers.
    pub async fn shutdown(self, grace: Duration) {
        self.server.shutdown(grace).await;
    }
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("server", &self.server)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

/// Logging settings as a subscriber config.
///
/// # Errors
///
/// Returns an error for an unknown format name.
pub fn log_config(section: &LoggingSection) -> BackendResult<LogConfig> {
    let format: LogFormat = section.format.parse()?;
    let config = LogConfig::new(section.level.to_ascii_lowercase()).with_format(format);
    Ok(match &section.directory {
        Some(dir) => config.with_file_logging(dir, "devicehive"),
        None => config,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    use chrono::Utc;
    use hive_core::{
        CommandUpdate, DeviceCommand, DeviceEvent, DeviceNotification, DeviceScope, SearchQuery,
        SubscriptionId,
    };
    use hive_rpc::body::{
        CommandInsertRequest, CommandUpdateRequest, CommandUpdateSubscribeRequest,
        DeviceDeleteRequest, NotificationInsertRequest, SearchRequest, SubscribeRequest,
        UnsubscribeRequest,
    };
    use hive_rpc::{Body, Request, RpcError};
    use hive_test::FlakyStore;

    fn config() -> HiveConfig {
        let mut config = HiveConfig::default();
        config.rpc.request_timeout_secs = 2;
        config
    }

    async fn call(client: &RpcClient, body: Body, key: &str) -> Body {
        client
            .call(Request::builder().body(body).partition_key(key).build())
            .await
            .unwrap()
            .into_result()
            .unwrap()
    }

    async fn insert_notification(client: &RpcClient, device: &str, name: &str) -> DeviceNotification {
        let body = Body::NotificationInsert(NotificationInsertRequest {
            notification: DeviceNotification::new(device, name),
        });
        match call(client, body, device).await {
            Body::NotificationInsertResponse(r) => r.notification,
            other => panic!("unexpected {other:?}"),
        }
    }

    fn subscribe_body(id: u64, device: DeviceScope, names: &[&str]) -> Body {
        Body::NotificationSubscribe(SubscribeRequest {
            subscription_id: Some(SubscriptionId(id)),
            device: Some(device),
            names: (!names.is_empty()).then(|| names.iter().map(|n| (*n).to_owned()).collect()),
            timestamp: None,
        })
    }

    #[tokio::test]
    async fn test_insert_assigns_increasing_ids_and_timestamps() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");

        let a = insert_notification(&client, "d1", "t").await;
        let b = insert_notification(&client, "d1", "t").await;
        assert!(b.id > a.id);
        assert!(b.timestamp > a.timestamp);

        let found = backend
            .store()
            .find(a.id, "d1", hive_core::EventKind::Notification)
            .await
            .unwrap();
        assert!(found.is_some());
    }

    #[tokio::test]
    async fn test_subscribe_streams_matching_inserts() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");

        let (ack, mut stream) = client
            .subscribe(
                Request::builder()
                    .body(subscribe_body(7, DeviceScope::device("d2"), &["temperature"]))
                    .build(),
            )
            .await
            .unwrap();
        assert!(matches!(ack, Body::NotificationSubscribeResponse(ref r) if r.subscription_id == SubscriptionId(7)));

        insert_notification(&client, "d2", "vibration").await;
        insert_notification(&client, "d2", "temperature").await;

        let pushed = stream.recv().await.unwrap();
        assert!(!pushed.is_last());
        let (id, event) = pushed.body().clone().into_event().unwrap();
        assert_eq!(id, SubscriptionId(7));
        assert_eq!(event.name(), "temperature");
    }

    #[tokio::test]
    async fn test_subscribe_without_id_is_rejected() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");

        let err = client
            .subscribe(
                Request::builder()
                    .body(Body::NotificationSubscribe(SubscribeRequest {
                        device: Some(DeviceScope::Any),
                        ..SubscribeRequest::default()
                    }))
                    .build(),
            )
            .await
            .unwrap_err();
        match err {
            RpcError::Remote { code, message, .. } => {
                assert_eq!(code, 400);
                assert!(message.contains("Subscription id not provided"));
            },
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(backend.bus().subscription_count(), 0);
    }

    #[tokio::test]
    async fn test_subscribe_returns_backlog_since_timestamp() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");

        let first = insert_notification(&client, "d1", "t").await;
        let second = insert_notification(&client, "d1", "t").await;
        insert_notification(&client, "d2", "t").await;

        let body = Body::NotificationSubscribe(SubscribeRequest {
            subscription_id: Some(SubscriptionId(1)),
            device: Some(DeviceScope::device("d1")),
            names: None,
            timestamp: Some(first.timestamp),
        });
        let (ack, _stream) = client
            .subscribe(Request::builder().body(body).build())
            .await
            .unwrap();
        let Body::NotificationSubscribeResponse(ack) = ack else {
            panic!("unexpected ack");
        };
        let ids: Vec<_> = ack.notifications.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![second.id]);
    }

    #[tokio::test]
    async fn test_unsubscribe_by_name_is_narrow_and_idempotent() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");

        let (_, _stream) = client
            .subscribe(
                Request::builder()
                    .body(subscribe_body(3, DeviceScope::device("d1"), &["a", "b"]))
                    .build(),
            )
            .await
            .unwrap();
        assert_eq!(backend.bus().subscription_count(), 2);

        let unsubscribe = |names: Option<&[&str]>| {
            Body::NotificationUnsubscribe(UnsubscribeRequest {
                subscription_ids: BTreeSet::from([SubscriptionId(3)]),
                names: names.map(|n| n.iter().map(|s| (*s).to_owned()).collect()),
            })
        };

        call(&client, unsubscribe(Some(&["a"][..])), "d1").await;
        assert_eq!(backend.bus().subscription_count(), 1);

        let Body::NotificationUnsubscribeResponse(first) = call(&client, unsubscribe(None), "d1").await
        else {
            panic!("unexpected reply");
        };
        assert_eq!(first.subscription_ids, BTreeSet::from([SubscriptionId(3)]));

        let Body::NotificationUnsubscribeResponse(second) = call(&client, unsubscribe(None), "d1").await
        else {
            panic!("unexpected reply");
        };
        assert!(second.subscription_ids.is_empty());
        assert_eq!(backend.bus().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_command_update_reaches_waiter_only() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");

        let command = match call(
            &client,
            Body::CommandInsert(CommandInsertRequest {
                command: DeviceCommand::new("d1", "reboot"),
            }),
            "d1",
        )
        .await
        {
            Body::CommandInsertResponse(r) => r.command,
            other => panic!("unexpected {other:?}"),
        };

        let (_, mut commands) = client
            .subscribe(
                Request::builder()
                    .body(Body::CommandSubscribe(SubscribeRequest {
                        subscription_id: Some(SubscriptionId(1)),
                        device: Some(DeviceScope::Any),
                        ..SubscribeRequest::default()
                    }))
                    .build(),
            )
            .await
            .unwrap();

        let (ack, mut waiter) = client
            .subscribe(
                Request::builder()
                    .body(Body::CommandUpdateSubscribe(CommandUpdateSubscribeRequest {
                        subscription_id: SubscriptionId(2),
                        device_id: "d1".to_owned(),
                        command_id: command.id,
                    }))
                    .build(),
            )
            .await
            .unwrap();
        assert!(matches!(ack, Body::CommandUpdateSubscribeResponse(ref r) if r.command.is_none()));

        call(
            &client,
            Body::CommandUpdate(CommandUpdateRequest {
                update: CommandUpdate::new("d1", command.id).with_status("done"),
            }),
            "d1",
        )
        .await;

        let (id, event) = waiter.recv().await.unwrap().body().clone().into_event().unwrap();
        assert_eq!(id, SubscriptionId(2));
        let DeviceEvent::CommandUpdate(updated) = event else {
            panic!("expected a command update");
        };
        assert_eq!(updated.status.as_deref(), Some("done"));

        // the plain command subscription saw nothing
        let quiet = tokio::time::timeout(Duration::from_millis(50), commands.recv()).await;
        assert!(quiet.is_err());
    }

    #[tokio::test]
    async fn test_update_of_unknown_command_is_not_found() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");

        let response = client
            .call(
                Request::builder()
                    .body(Body::CommandUpdate(CommandUpdateRequest {
                        update: CommandUpdate::new("d1", 99),
                    }))
                    .build(),
            )
            .await
            .unwrap();
        assert!(response.is_failed());
        assert!(matches!(
            response.into_result(),
            Err(RpcError::Remote { code: 404, .. })
        ));
    }

    #[tokio::test]
    async fn test_search_by_names_and_since() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");
        let before = Utc::now();
        insert_notification(&client, "d1", "t").await;
        insert_notification(&client, "d1", "h").await;

        let body = Body::NotificationSearch(SearchRequest {
            query: SearchQuery {
                names: Some(BTreeSet::from(["h".to_owned()])),
                since: Some(before),
                ..SearchQuery::default()
            },
        });
        let Body::NotificationSearchResponse(found) = call(&client, body, "d1").await else {
            panic!("unexpected reply");
        };
        assert_eq!(found.notifications.len(), 1);
        assert_eq!(found.notifications[0].notification, "h");
    }

    #[tokio::test]
    async fn test_device_delete_purges_rows() {
        let backend = Backend::start(&config()).unwrap();
        let client = backend.client("c");
        let (_, _a) = client
            .subscribe(
                Request::builder()
                    .body(subscribe_body(1, DeviceScope::device("d1"), &[]))
                    .build(),
            )
            .await
            .unwrap();
        let (_, _b) = client
            .subscribe(
                Request::builder()
                    .body(subscribe_body(2, DeviceScope::Any, &[]))
                    .build(),
            )
            .await
            .unwrap();

        let Body::DeviceDeleteResponse(r) = call(
            &client,
            Body::DeviceDelete(DeviceDeleteRequest {
                device_id: "d1".to_owned(),
            }),
            "d1",
        )
        .await
        else {
            panic!("unexpected reply");
        };
        assert_eq!(r.removed, 1);
        assert_eq!(backend.bus().subscription_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_backlog_leaves_nothing_registered() {
        let store = FlakyStore::new(Arc::new(MessageCache::new()));
        let backend = Backend::with_store(&config(), Arc::new(store.clone())).unwrap();
        let client = backend.client("c");
        let command = match call(
            &client,
            Body::CommandInsert(CommandInsertRequest {
                command: DeviceCommand::new("d1", "reboot"),
            }),
            "d1",
        )
        .await
        {
            Body::CommandInsertResponse(r) => r.command,
            other => panic!("unexpected {other:?}"),
        };
        store.fail_reads(true);

        for body in [
            Body::NotificationSubscribe(SubscribeRequest {
                subscription_id: Some(SubscriptionId(1)),
                device: Some(DeviceScope::device("d1")),
                names: Some(BTreeSet::from(["a".to_owned(), "b".to_owned()])),
                timestamp: Some(Utc::now()),
            }),
            Body::CommandSubscribe(SubscribeRequest {
                subscription_id: Some(SubscriptionId(2)),
                device: Some(DeviceScope::Any),
                names: None,
                timestamp: Some(Utc::now()),
            }),
            Body::CommandUpdateSubscribe(CommandUpdateSubscribeRequest {
                subscription_id: SubscriptionId(3),
                device_id: "d1".to_owned(),
                command_id: command.id,
            }),
        ] {
            let err = client
                .subscribe(Request::builder().body(body).build())
                .await
                .unwrap_err();
            assert!(matches!(err, RpcError::Remote { .. }), "{err:?}");
            assert_eq!(backend.bus().subscription_count(), 0);
            assert_eq!(backend.bus().subscriber_count(), 0);
        }
    }

    #[test]
    fn test_log_config_from_section() {
        let section = LoggingSection {
            level: "DEBUG".to_owned(),
            format: "json".to_owned(),
            directory: None,
        };
        let config = log_config(&section).unwrap();
        assert_eq!(config.level, "debug");
        assert_eq!(config.format, LogFormat::Json);

        let bad = LoggingSection {
            format: "xml".to_owned(),
            ..LoggingSection::default()
        };
        assert!(log_config(&bad).is_err());
    }
}
