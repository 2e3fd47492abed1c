//! Client-facing operations over the request/response bus.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use hive_config::RpcSection;
use hive_core::{
    CommandUpdate, DeviceCommand, DeviceEvent, DeviceNotification, DeviceScope, EventKind,
    IdGenerator, SearchQuery, SubscriptionId,
};
use hive_rpc::body::{
    CommandInsertRequest, CommandUpdateRequest, CommandUpdateSubscribeRequest,
    DeviceDeleteRequest, NotificationInsertRequest, SearchRequest, SubscribeRequest,
    UnsubscribeRequest,
};
use hive_rpc::{Action, Body, Request, RequestTransport, ResponseStream, RpcClient, RpcError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::error::{FrontendError, FrontendResult};
use crate::filter::EventFilter;

/// Items delivered to one subscription: the replayed backlog first, then live events.
#[derive(Debug)]
pub struct EventStream {
    id: SubscriptionId,
    rx: mpsc::UnboundedReceiver<DeviceEvent>,
}

impl EventStream {
    /// Handle to pass to [`HiveService::unsubscribe`].
    #[must_use]
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    /// Next item, or `None` once the subscription is gone.
    pub async fn recv(&mut self) -> Option<DeviceEvent> {
        self.rx.recv().await
    }

    /// Next item if one is already queued.
    pub fn try_recv(&mut self) -> Option<DeviceEvent> {
        self.rx.try_recv().ok()
    }
}

/// A logical subscription: one backend registration per device scope.
struct ActiveSubscription {
    kind: EventKind,
    /// Backend id of each part, with the partition key its subscribe used.
    parts: BTreeMap<SubscriptionId, Option<String>>,
    forwarders: Vec<JoinHandle<()>>,
}

/// Subscribe, insert, update, long-poll and command-update waits.
///
/// Each instance owns its reply channel and its subscription table, so
/// independent services can share one transport.
pub struct HiveService {
    rpc: RpcClient,
    ids: IdGenerator,
    active: DashMap<SubscriptionId, ActiveSubscription>,
}

impl HiveService {
    /// Wrap a connected client.
    #[must_use]
    pub fn new(rpc: RpcClient) -> Self {
        Self {
            rpc,
            ids: IdGenerator::starting_at(1),
            active: DashMap::new(),
        }
    }

    /// Connect on a fresh reply channel and wait for the backend to answer pings.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoResponse`] if the backend never answers.
    pub async fn start(
        transport: Arc<dyn RequestTransport>,
        config: &RpcSection,
    ) -> FrontendResult<Self> {
        let reply_to = format!("frontend-{}", Uuid::new_v4());
        let rpc = RpcClient::start(
            transport,
            reply_to,
            config.request_timeout(),
            config.ping_attempts,
            config.ping_timeout(),
        )
        .await?;
        info!(reply_to = %rpc.reply_to(), "Frontend service started");
        Ok(Self::new(rpc))
    }

    /// The underlying client.
    #[must_use]
    pub fn rpc(&self) -> &RpcClient {
        &self.rpc
    }

    /// Number of live subscriptions.
    #[must_use]
    pub fn active_count(&self) -> usize {
        self.active.len()
    }

    /// Whether `id` is a live subscription.
    #[must_use]
    pub fn is_active(&self, id: SubscriptionId) -> bool {
        self.active.contains_key(&id)
    }

    /// Subscribe to commands sent to the filtered devices.
    ///
    /// # Errors
    ///
    /// Validation errors for a malformed filter, or the first backend
    /// failure. Nothing stays registered on error.
    pub async fn subscribe_commands(&self, filter: &EventFilter) -> FrontendResult<EventStream> {
        self.subscribe(EventKind::Command, filter).await
    }

    /// Subscribe to notifications from the filtered devices.
    ///
    /// # Errors
    ///
    /// See [`subscribe_commands`](Self::subscribe_commands).
    pub async fn subscribe_notifications(
        &self,
        filter: &EventFilter,
    ) -> FrontendResult<EventStream> {
        self.subscribe(EventKind::Notification, filter).await
    }

    async fn subscribe(&self, kind: EventKind, filter: &EventFilter) -> FrontendResult<EventStream> {
        let scopes = filter.scopes()?;
        let id = self.ids.next_subscription();
        let (tx, rx) = mpsc::unbounded_channel();
        let mut active = ActiveSubscription {
            kind,
            parts: BTreeMap::new(),
            forwarders: Vec::with_capacity(scopes.len()),
        };

        for scope in scopes {
            let part = self.ids.next_subscription();
            let partition = scope.device_id().map(str::to_owned);
            // Tracked before the call: a failed reply may follow a registration.
            active.parts.insert(part, partition.clone());
            match self.open_part(kind, part, scope, partition, filter, &tx).await {
                Ok(forwarder) => active.forwarders.push(forwarder),
                Err(e) => {
                    self.release(active).await;
                    return Err(e);
                },
            }
        }

        debug!(subscription_id = %id, %kind, parts = active.parts.len(), "Subscribed");
        self.active.insert(id, active);
        Ok(EventStream { id, rx })
    }

    /// Register one device scope and start forwarding its events.
    async fn open_part(
        &self,
        kind: EventKind,
        part: SubscriptionId,
        scope: DeviceScope,
        partition: Option<String>,
        filter: &EventFilter,
        tx: &mpsc::UnboundedSender<DeviceEvent>,
    ) -> FrontendResult<JoinHandle<()>> {
        let request = SubscribeRequest {
            subscription_id: Some(part),
            device: Some(scope),
            names: filter.name_set(),
            timestamp: filter.since,
        };
        let body = match kind {
            EventKind::Notification => Body::NotificationSubscribe(request),
            EventKind::Command | EventKind::CommandUpdate => Body::CommandSubscribe(request),
        };
        let (ack, stream) = self.rpc.subscribe(build(body, partition.as_deref())).await?;

        let backlog: Vec<DeviceEvent> = match ack {
            Body::NotificationSubscribeResponse(r) => r
                .notifications
                .into_iter()
                .map(DeviceEvent::Notification)
                .collect(),
            Body::CommandSubscribeResponse(r) => {
                r.commands.into_iter().map(DeviceEvent::Command).collect()
            },
            other => {
                return Err(unexpected(
                    match kind {
                        EventKind::Notification => Action::NotificationSubscribeResponse,
                        EventKind::Command | EventKind::CommandUpdate => {
                            Action::CommandSubscribeResponse
                        },
                    },
                    &other,
                ));
            },
        };

        let replayed: HashSet<u64> = backlog.iter().map(DeviceEvent::id).collect();
        for event in backlog {
            if tx.send(event).is_err() {
                trace!(subscription_id = %part, "Stream receiver gone, backlog dropped");
                break;
            }
        }
        Ok(tokio::spawn(forward(stream, replayed, tx.clone())))
    }

    /// Drop a subscription. Unknown or already dropped handles are a no-op.
    ///
    /// Returns whether the handle was live.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let Some((_, active)) = self.active.remove(&id) else {
            trace!(subscription_id = %id, "Unsubscribe of unknown subscription");
            return false;
        };
        self.release(active).await;
        debug!(subscription_id = %id, "Unsubscribed");
        true
    }

    /// Unregister every part from the backend, then stop forwarding.
    ///
    /// Each unsubscribe rides the partition its subscribe used, so it is
    /// handled after that subscribe.
    async fn release(&self, active: ActiveSubscription) {
        let mut by_partition: BTreeMap<Option<String>, BTreeSet<SubscriptionId>> = BTreeMap::new();
        for (part, partition) in active.parts {
            by_partition.entry(partition).or_default().insert(part);
        }
        for (partition, parts) in by_partition {
            if let Err(e) = self.drop_remote(active.kind, parts, partition.as_deref()).await {
                warn!(error = %e, "Backend unsubscribe failed");
            }
        }
        for forwarder in &active.forwarders {
            forwarder.abort();
        }
        // Joined so each stream's correlation entry is gone on return.
        for forwarder in active.forwarders {
            let _ = forwarder.await;
        }
    }

    async fn drop_remote(
        &self,
        kind: EventKind,
        subscription_ids: BTreeSet<SubscriptionId>,
        partition: Option<&str>,
    ) -> FrontendResult<()> {
        let request = UnsubscribeRequest {
            subscription_ids,
            names: None,
        };
        let body = match kind {
            EventKind::Notification => Body::NotificationUnsubscribe(request),
            EventKind::Command | EventKind::CommandUpdate => Body::CommandUnsubscribe(request),
        };
        self.rpc.call(build(body, partition)).await?.into_result()?;
        Ok(())
    }

    /// Drop every live subscription.
    pub async fn unsubscribe_all(&self) {
        let ids: Vec<SubscriptionId> = self.active.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            self.unsubscribe(id).await;
        }
    }

    /// Store a notification for `device_id` and publish it.
    ///
    /// # Errors
    ///
    /// Validation errors for an empty device id or name; backend errors otherwise.
    pub async fn insert_notification(
        &self,
        device_id: &str,
        mut notification: DeviceNotification,
    ) -> FrontendResult<DeviceNotification> {
        require("device id", device_id)?;
        require("notification name", &notification.notification)?;
        device_id.clone_into(&mut notification.device_id);

        let body = Body::NotificationInsert(NotificationInsertRequest { notification });
        match self.rpc.call(build(body, Some(device_id))).await?.into_result()? {
            Body::NotificationInsertResponse(r) => Ok(r.notification),
            other => Err(unexpected(Action::NotificationInsertResponse, &other)),
        }
    }

    /// Store a command for `device_id` and publish it.
    ///
    /// # Errors
    ///
    /// Validation errors for an empty device id or name; backend errors otherwise.
    pub async fn insert_command(
        &self,
        device_id: &str,
        mut command: DeviceCommand,
    ) -> FrontendResult<DeviceCommand> {
        require("device id", device_id)?;
        require("command name", &command.command)?;
        device_id.clone_into(&mut command.device_id);

        let body = Body::CommandInsert(CommandInsertRequest { command });
        match self.rpc.call(build(body, Some(device_id))).await?.into_result()? {
            Body::CommandInsertResponse(r) => Ok(r.command),
            other => Err(unexpected(Action::CommandInsertResponse, &other)),
        }
    }

    /// Apply a device-reported update to command `id`.
    ///
    /// Wakes command-update waiters on that command; regular command
    /// subscribers are not notified.
    ///
    /// # Errors
    ///
    /// A `404` remote error if the command does not exist.
    pub async fn update_command(
        &self,
        device_id: &str,
        id: u64,
        mut update: CommandUpdate,
    ) -> FrontendResult<DeviceCommand> {
        require("device id", device_id)?;
        device_id.clone_into(&mut update.device_id);
        update.id = id;

        let body = Body::CommandUpdate(CommandUpdateRequest { update });
        match self.rpc.call(build(body, Some(device_id))).await?.into_result()? {
            Body::CommandUpdateResponse(r) => Ok(r.command),
            other => Err(unexpected(Action::CommandUpdateResponse, &other)),
        }
    }

    /// Stored notifications matching `query`, oldest first.
    ///
    /// # Errors
    ///
    /// Backend errors.
    pub async fn search_notifications(
        &self,
        query: SearchQuery,
    ) -> FrontendResult<Vec<DeviceNotification>> {
        let body = Body::NotificationSearch(SearchRequest { query });
        match self.rpc.call(build(body, None)).await?.into_result()? {
            Body::NotificationSearchResponse(r) => Ok(r.notifications),
            other => Err(unexpected(Action::NotificationSearchResponse, &other)),
        }
    }

    /// Stored commands matching `query`, oldest first.
    ///
    /// # Errors
    ///
    /// Backend errors.
    pub async fn search_commands(&self, query: SearchQuery) -> FrontendResult<Vec<DeviceCommand>> {
        let body = Body::CommandSearch(SearchRequest { query });
        match self.rpc.call(build(body, None)).await?.into_result()? {
            Body::CommandSearchResponse(r) => Ok(r.commands),
            other => Err(unexpected(Action::CommandSearchResponse, &other)),
        }
    }

    /// Long-poll for notifications newer than `filter.since`.
    ///
    /// Returns stored items if there are any; otherwise waits up to `wait`
    /// for the first live one. Cancellation ends the wait with an empty result.
    ///
    /// # Errors
    ///
    /// Validation and backend errors.
    pub async fn poll_notifications(
        &self,
        filter: &EventFilter,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> FrontendResult<Vec<DeviceNotification>> {
        let events = self
            .poll(EventKind::Notification, filter, wait, cancel)
            .await?;
        Ok(events
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::Notification(n) => Some(n),
                _ => None,
            })
            .collect())
    }

    /// Long-poll for commands newer than `filter.since`.
    ///
    /// # Errors
    ///
    /// See [`poll_notifications`](Self::poll_notifications).
    pub async fn poll_commands(
        &self,
        filter: &EventFilter,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> FrontendResult<Vec<DeviceCommand>> {
        let events = self.poll(EventKind::Command, filter, wait, cancel).await?;
        Ok(events
            .into_iter()
            .filter_map(|event| match event {
                DeviceEvent::Command(c) => Some(c),
                _ => None,
            })
            .collect())
    }

    async fn poll(
        &self,
        kind: EventKind,
        filter: &EventFilter,
        wait: Duration,
        cancel: &CancellationToken,
    ) -> FrontendResult<Vec<DeviceEvent>> {
        // Live registration first, so nothing inserted during the search is missed.
        let live = EventFilter {
            since: None,
            ..filter.clone()
        };
        let mut stream = self.subscribe(kind, &live).await?;
        let outcome = self.collect(kind, filter, wait, cancel, &mut stream).await;
        self.unsubscribe(stream.id()).await;
        outcome
    }

    async fn collect(
        &self,
        kind: EventKind,
        filter: &EventFilter,
        wait: Duration,
        cancel: &CancellationToken,
        stream: &mut EventStream,
    ) -> FrontendResult<Vec<DeviceEvent>> {
        if let Some(since) = filter.since {
            let query = filter.search_since(since);
            let stored: Vec<DeviceEvent> = match kind {
                EventKind::Notification => self
                    .search_notifications(query)
                    .await?
                    .into_iter()
                    .map(DeviceEvent::Notification)
                    .collect(),
                EventKind::Command | EventKind::CommandUpdate => self
                    .search_commands(query)
                    .await?
                    .into_iter()
                    .map(DeviceEvent::Command)
                    .collect(),
            };
            if !stored.is_empty() {
                return Ok(stored);
            }
        }

        let first = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Poll cancelled");
                return Ok(Vec::new());
            },
            first = tokio::time::timeout(wait, stream.recv()) => first,
        };
        let Ok(Some(first)) = first else {
            return Ok(Vec::new());
        };
        let mut events = vec![first];
        while let Some(next) = stream.try_recv() {
            events.push(next);
        }
        Ok(events)
    }

    /// Wait up to `timeout` for command `command_id` to be updated.
    ///
    /// Returns the command at once if it was already updated, and `None` if
    /// the wait elapsed.
    ///
    /// # Errors
    ///
    /// A `404` remote error if the command does not exist.
    pub async fn wait_command_update(
        &self,
        device_id: &str,
        command_id: u64,
        timeout: Duration,
    ) -> FrontendResult<Option<DeviceCommand>> {
        require("device id", device_id)?;
        let id = self.ids.next_subscription();
        let body = Body::CommandUpdateSubscribe(CommandUpdateSubscribeRequest {
            subscription_id: id,
            device_id: device_id.to_owned(),
            command_id,
        });
        let outcome = match self.rpc.subscribe(build(body, Some(device_id))).await {
            Ok((Body::CommandUpdateSubscribeResponse(r), _)) if r.command.is_some() => {
                Ok(r.command)
            },
            Ok((Body::CommandUpdateSubscribeResponse(_), mut stream)) => {
                Ok(tokio::time::timeout(timeout, next_update(&mut stream))
                    .await
                    .ok()
                    .flatten())
            },
            Ok((other, _)) => Err(unexpected(Action::CommandUpdateSubscribeResponse, &other)),
            Err(e) => Err(e.into()),
        };

        // Also sent after a failed subscribe; the waiter may be registered anyway.
        let waiter = BTreeSet::from([id]);
        if let Err(e) = self.drop_remote(EventKind::Command, waiter, Some(device_id)).await {
            warn!(error = %e, "Command update waiter not released");
        }
        outcome
    }

    /// Drop every subscription bound to a removed device.
    ///
    /// Returns the number of subscription rows removed.
    ///
    /// # Errors
    ///
    /// Backend errors.
    pub async fn delete_device(&self, device_id: &str) -> FrontendResult<usize> {
        require("device id", device_id)?;
        let body = Body::DeviceDelete(DeviceDeleteRequest {
            device_id: device_id.to_owned(),
        });
        match self.rpc.call(build(body, Some(device_id))).await?.into_result()? {
            Body::DeviceDeleteResponse(r) => Ok(r.removed),
            other => Err(unexpected(Action::DeviceDeleteResponse, &other)),
        }
    }
}

impl std::fmt::Debug for HiveService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HiveService")
            .field("rpc", &self.rpc)
            .field("active", &self.active.len())
            .finish_non_exhaustive()
    }
}

fn build(body: Body, partition_key: Option<&str>) -> Request {
    let builder = Request::builder().body(body);
    match partition_key {
        Some(key) => builder.partition_key(key),
        None => builder,
    }
    .build()
}

fn require(what: &str, value: &str) -> FrontendResult<()> {
    if value.is_empty() {
        return Err(FrontendError::Validation(format!("{what} is required")));
    }
    Ok(())
}

fn unexpected(expected: Action, actual: &Body) -> FrontendError {
    FrontendError::Rpc(RpcError::UnexpectedBody {
        expected,
        actual: actual.action(),
    })
}

/// Pump pushed events into the subscription's channel, skipping replayed ones.
async fn forward(
    mut stream: ResponseStream,
    replayed: HashSet<u64>,
    tx: mpsc::UnboundedSender<DeviceEvent>,
) {
    while let Some(response) = stream.recv().await {
        let event = match response.into_result() {
            Ok(body) => body.into_event(),
            Err(e) => {
                debug!(error = %e, "Error on subscription stream");
                None
            },
        };
        let Some((_, event)) = event else {
            continue;
        };
        if replayed.contains(&event.id()) {
            continue;
        }
        if tx.send(event).is_err() {
            break;
        }
    }
}

async fn next_update(stream: &mut ResponseStream) -> Option<DeviceCommand> {
    while let Some(response) = stream.recv().await {
        if let Ok(body) = response.into_result()
            && let Some((_, DeviceEvent::CommandUpdate(command))) = body.into_event()
        {
            return Some(command);
        }
    }
    None
}
