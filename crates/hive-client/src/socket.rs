//! Persistent-socket subscription back end.
//!
//! Subscriptions are registered with the server over one
//! [`HiveSocketConnector`]. Pushed items are routed by server subscription
//! id to a single dispatch task, which applies cursors and calls the
//! handler. A supervisor task reconnects with backoff when the connection
//! drops, re-authenticates, and resubscribes every key from its cursor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use hive_core::{DeviceEvent, EventKind};
use serde_json::{Value, json};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::connector::backoff::Backoff;
use crate::connector::{ConnectionEvent, ConnectorSettings, HiveSocketConnector, PushHandler};
use crate::cursor::Cursor;
use crate::error::{ConnectorResult, SubscriptionError, SubscriptionResult};
use crate::filter::{SubscriptionFilter, SubscriptionKey};
use crate::handler::{MessageHandler, deliver};
use crate::subscriptions::Subscriptions;

/// Pushes held per unknown subscription id until its route is known.
const ORPHAN_LIMIT: usize = 1024;

/// Unknown subscription ids with held pushes; the oldest is dropped first.
const ORPHAN_BUCKETS: usize = 16;

/// Retired subscription ids remembered so late pushes for them are dropped.
const RETIRED_LIMIT: usize = 256;

enum Inbound {
    Push(Value),
    Routed {
        server_id: u64,
        key: SubscriptionKey,
        cursor: Cursor,
    },
    Retired(u64),
}

struct PushForwarder(mpsc::UnboundedSender<Inbound>);

impl PushHandler for PushForwarder {
    fn on_push(&self, message: Value) {
        if self.0.send(Inbound::Push(message)).is_err() {
            trace!("Dispatch task gone, push dropped");
        }
    }
}

struct SocketEntry {
    server_id: u64,
    cursor: Cursor,
}

struct SocketInner {
    connector: HiveSocketConnector,
    entries: tokio::sync::Mutex<HashMap<SubscriptionKey, SocketEntry>>,
    control: mpsc::UnboundedSender<Inbound>,
    credential: Mutex<Option<String>>,
    shutdown: CancellationToken,
    grace: Duration,
}

fn segment(kind: EventKind) -> &'static str {
    match kind {
        EventKind::Notification => "notification",
        EventKind::Command | EventKind::CommandUpdate => "command",
    }
}

impl SocketInner {
    fn route(&self, item: Inbound) {
        if self.control.send(item).is_err() {
            trace!("Dispatch task gone, routing update dropped");
        }
    }

    /// Register `key` with the server and route its pushes.
    async fn open_remote(&self, key: &SubscriptionKey, cursor: &Cursor) -> ConnectorResult<u64> {
        let mut message = json!({
            "action": format!("{}/subscribe", segment(key.kind)),
            "deviceId": key.device,
            "names": key.names,
        });
        if let Some(since) = cursor.get() {
            message["timestamp"] = json!(since);
        }
        let server_id: u64 = self.connector.send_for(message, "subscriptionId").await?;
        self.route(Inbound::Routed {
            server_id,
            key: key.clone(),
            cursor: cursor.clone(),
        });
        trace!(%key, server_id, "Subscribed");
        Ok(server_id)
    }

    async fn close_remote(&self, kind: EventKind, server_id: u64) {
        self.route(Inbound::Retired(server_id));
        let message = json!({
            "action": format!("{}/unsubscribe", segment(kind)),
            "subscriptionId": server_id,
        });
        if let Err(e) = self.connector.request(message).await {
            debug!(server_id, error = %e, "Remote unsubscribe failed");
        }
    }

    async fn resubscribe_all(&self) -> SubscriptionResult<()> {
        let mut entries = self.entries.lock().await;
        for (key, entry) in entries.iter_mut() {
            self.route(Inbound::Retired(entry.server_id));
            entry.server_id = self.open_remote(key, &entry.cursor).await?;
        }
        info!(count = entries.len(), "Socket subscriptions restored");
        Ok(())
    }

    /// Reconnect, re-authenticate and resubscribe.
    async fn restore(&self) -> SubscriptionResult<()> {
        self.connector.reconnect().await?;
        let credential = self
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        if let Some(token) = credential {
            self.connector.authenticate(&token).await?;
        }
        self.resubscribe_all().await
    }
}

async fn supervise(inner: Arc<SocketInner>, mut events: broadcast::Receiver<ConnectionEvent>) {
    let settings = inner.connector.settings();
    let mut backoff = Backoff::new(settings.reconnect_base, settings.reconnect_max);
    loop {
        let event = tokio::select! {
            biased;
            () = inner.shutdown.cancelled() => return,
            event = events.recv() => event,
        };
        match event {
            Ok(ConnectionEvent::Established) => continue,
            Ok(ConnectionEvent::Lost) | Err(RecvError::Lagged(_)) => {},
            Err(RecvError::Closed) => return,
        }
        if inner.connector.is_connected() {
            continue;
        }

        loop {
            let delay = backoff.next_delay();
            tokio::select! {
                biased;
                () = inner.shutdown.cancelled() => return,
                () = tokio::time::sleep(delay) => {},
            }
            match inner.restore().await {
                Ok(()) => {
                    backoff.reset();
                    break;
                },
                Err(e) => warn!(error = %e, ?delay, "Reconnect attempt failed"),
            }
        }
    }
}

fn parse_push(message: &Value) -> Option<(u64, DeviceEvent)> {
    let server_id = message.get("subscriptionId")?.as_u64()?;
    let event = match message.get("action")?.as_str()? {
        "notification/insert" => DeviceEvent::Notification(
            serde_json::from_value(message.get("notification")?.clone()).ok()?,
        ),
        "command/insert" => {
            DeviceEvent::Command(serde_json::from_value(message.get("command")?.clone()).ok()?)
        },
        "command/update" => DeviceEvent::CommandUpdate(
            serde_json::from_value(message.get("command")?.clone()).ok()?,
        ),
        _ => return None,
    };
    Some((server_id, event))
}

async fn deliver_once(handler: &dyn MessageHandler, cursor: &Cursor, event: DeviceEvent) {
    if cursor.admit(&event) {
        deliver(handler, event).await;
    } else {
        trace!("Skipping already-seen item");
    }
}

/// Routing state of the dispatch task.
#[derive(Default)]
struct Router {
    routes: HashMap<u64, (SubscriptionKey, Cursor)>,
    orphans: HashMap<u64, Vec<DeviceEvent>>,
    orphan_order: VecDeque<u64>,
    retired: HashSet<u64>,
    retired_order: VecDeque<u64>,
}

impl Router {
    async fn handle(&mut self, handler: &dyn MessageHandler, item: Inbound) {
        match item {
            Inbound::Push(message) => {
                let Some((server_id, event)) = parse_push(&message) else {
                    debug!(?message, "Ignoring unrecognized push");
                    return;
                };
                self.push(handler, server_id, event).await;
            },
            Inbound::Routed {
                server_id,
                key,
                cursor,
            } => {
                for event in self.orphans.remove(&server_id).unwrap_or_default() {
                    if key.matches(event.device_id(), &event.name()) {
                        deliver_once(handler, &cursor, event).await;
                    }
                }
                self.orphan_order.retain(|id| *id != server_id);
                self.routes.insert(server_id, (key, cursor));
            },
            Inbound::Retired(server_id) => self.retire(server_id),
        }
    }

    async fn push(&mut self, handler: &dyn MessageHandler, server_id: u64, event: DeviceEvent) {
        if let Some((key, cursor)) = self.routes.get(&server_id) {
            if key.matches(event.device_id(), &event.name()) {
                deliver_once(handler, cursor, event).await;
            }
            return;
        }
        if self.retired.contains(&server_id) {
            trace!(server_id, "Dropping push for retired subscription");
            return;
        }
        // Pushes can overtake the subscribe reply; hold them until routed.
        if !self.orphans.contains_key(&server_id) {
            if self.orphan_order.len() >= ORPHAN_BUCKETS
                && let Some(stale) = self.orphan_order.pop_front()
                && let Some(dropped) = self.orphans.remove(&stale)
            {
                debug!(server_id = stale, dropped = dropped.len(), "Dropping unrouted pushes");
            }
            self.orphan_order.push_back(server_id);
        }
        let held = self.orphans.entry(server_id).or_default();
        if held.len() < ORPHAN_LIMIT {
            held.push(event);
        }
    }

    fn retire(&mut self, server_id: u64) {
        self.routes.remove(&server_id);
        self.orphans.remove(&server_id);
        self.orphan_order.retain(|id| *id != server_id);
        if self.retired.insert(server_id) {
            self.retired_order.push_back(server_id);
            if self.retired_order.len() > RETIRED_LIMIT
                && let Some(oldest) = self.retired_order.pop_front()
            {
                self.retired.remove(&oldest);
            }
        }
    }

    #[cfg(test)]
    fn held(&self) -> usize {
        self.orphans.values().map(Vec::len).sum()
    }
}

async fn dispatch_loop(
    handler: Arc<dyn MessageHandler>,
    mut inbound: mpsc::UnboundedReceiver<Inbound>,
    shutdown: CancellationToken,
) {
    let mut router = Router::default();
    loop {
        let item = tokio::select! {
            biased;
            () = shutdown.cancelled() => return,
            item = inbound.recv() => item,
        };
        let Some(item) = item else {
            return;
        };
        router.handle(handler.as_ref(), item).await;
    }
}

/// Subscriptions served over one persistent socket.
pub struct SocketSubscriptions {
    inner: Arc<SocketInner>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SocketSubscriptions {
    /// Connect and start the dispatch and reconnect tasks.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection fails.
    pub async fn connect(
        settings: ConnectorSettings,
        handler: Arc<dyn MessageHandler>,
        grace: Duration,
    ) -> SubscriptionResult<Self> {
        let (control, inbound) = mpsc::unbounded_channel();
        let connector =
            HiveSocketConnector::connect(settings, Arc::new(PushForwarder(control.clone())))
                .await?;
        let events = connector.events();
        let inner = Arc::new(SocketInner {
            connector,
            entries: tokio::sync::Mutex::new(HashMap::new()),
            control,
            credential: Mutex::new(None),
            shutdown: CancellationToken::new(),
            grace,
        });

        let span = info_span!("socket_subscriptions", url = %inner.connector.settings().url);
        let dispatch = tokio::spawn(
            dispatch_loop(handler, inbound, inner.shutdown.clone()).instrument(span.clone()),
        );
        let supervisor = tokio::spawn(supervise(Arc::clone(&inner), events).instrument(span));
        Ok(Self {
            inner,
            tasks: Mutex::new(vec![dispatch, supervisor]),
        })
    }

    /// The underlying connector.
    #[must_use]
    pub fn connector(&self) -> &HiveSocketConnector {
        &self.inner.connector
    }

    /// Authenticate now and again after every reconnect.
    ///
    /// # Errors
    ///
    /// Returns an error if the server rejects the token.
    pub async fn authenticate(&self, token: &str) -> SubscriptionResult<()> {
        self.inner.connector.authenticate(token).await?;
        *self
            .inner
            .credential
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(token.to_owned());
        Ok(())
    }
}

#[async_trait]
impl Subscriptions for SocketSubscriptions {
    async fn subscribe(
        &self,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<Vec<SubscriptionKey>> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SubscriptionError::ShutDown);
        }
        let mut entries = self.inner.entries.lock().await;
        let mut started = Vec::new();
        for key in filter.keys(kind) {
            if entries.contains_key(&key) {
                continue;
            }
            let cursor = Cursor::new(filter.since);
            let server_id = self.inner.open_remote(&key, &cursor).await?;
            entries.insert(key.clone(), SocketEntry { server_id, cursor });
            started.push(key);
        }
        Ok(started)
    }

    async fn unsubscribe(
        &self,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<usize> {
        let mut entries = self.inner.entries.lock().await;
        let mut removed = 0usize;
        for key in filter.keys(kind) {
            if let Some(entry) = entries.remove(&key) {
                self.inner.close_remote(kind, entry.server_id).await;
                removed = removed.saturating_add(1);
            }
        }
        Ok(removed)
    }

    async fn resubscribe_all(&self) -> SubscriptionResult<()> {
        if self.inner.shutdown.is_cancelled() {
            return Err(SubscriptionError::ShutDown);
        }
        self.inner.resubscribe_all().await
    }

    async fn active(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.inner.entries.lock().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn shutdown(&self) {
        if self.inner.shutdown.is_cancelled() {
            return;
        }
        self.inner.shutdown.cancel();

        let entries: Vec<(SubscriptionKey, SocketEntry)> =
            self.inner.entries.lock().await.drain().collect();
        let release = async {
            for (key, entry) in entries {
                self.inner.close_remote(key.kind, entry.server_id).await;
            }
        };
        if tokio::time::timeout(self.inner.grace, release).await.is_err() {
            warn!("Remote unsubscribe did not finish within the grace period");
        }
        self.inner.connector.close();

        let tasks = std::mem::take(&mut *self.tasks.lock().unwrap_or_else(PoisonError::into_inner));
        let aborts: Vec<_> = tasks.iter().map(JoinHandle::abort_handle).collect();
        if tokio::time::timeout(self.inner.grace, futures::future::join_all(tasks))
            .await
            .is_err()
        {
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Socket subscriptions shut down");
    }
}

impl std::fmt::Debug for SocketSubscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketSubscriptions")
            .field("connector", &self.inner.connector)
            .field("shut_down", &self.inner.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}
