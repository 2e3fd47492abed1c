//! Mock implementations for testing.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use hive_client::{MessageHandler, PollRequest, PollTransport, SubscriptionError, SubscriptionResult};
use hive_core::{
    AuthError, Authenticator, CommandUpdate, DeviceCommand, DeviceEvent, DeviceNotification,
    EventKind, HivePrincipal, KeyedStore, SearchQuery, StoreError, StoreResult, StoredEntity,
    bearer_token,
};
use hive_rpc::{MessageDispatcher, Response, RpcError, RpcResult};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Wait until `ready` holds, re-checking on every `notify`. Gives up after `timeout`.
async fn wait_until(notify: &Notify, timeout: Duration, ready: impl Fn() -> bool) -> bool {
    tokio::time::timeout(timeout, async {
        loop {
            let notified = notify.notified();
            if ready() {
                return;
            }
            notified.await;
        }
    })
    .await
    .is_ok()
}

/// Captures every response handed to the dispatcher.
#[derive(Debug, Clone, Default)]
pub struct RecordingDispatcher {
    sent: Arc<Mutex<Vec<(String, Response)>>>,
    closed: Arc<Mutex<HashSet<String>>>,
}

impl RecordingDispatcher {
    /// Create a dispatcher that accepts every topic.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make dispatches to `topic` fail as if the reply channel were gone.
    pub fn close_topic(&self, topic: &str) {
        self.closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic.to_owned());
    }

    /// Drain captured `(reply_to, response)` pairs.
    pub fn take(&self) -> Vec<(String, Response)> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Number of captured responses not yet taken.
    #[must_use]
    pub fn sent_count(&self) -> usize {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

impl MessageDispatcher for RecordingDispatcher {
    fn dispatch(&self, reply_to: &str, response: Response) -> RpcResult<()> {
        if self
            .closed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(reply_to)
        {
            return Err(RpcError::UnknownReplyTopic(reply_to.to_owned()));
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((reply_to.to_owned(), response));
        Ok(())
    }
}

/// Authenticator backed by a fixed token table.
#[derive(Debug, Clone, Default)]
pub struct StaticAuthenticator {
    tokens: HashMap<String, HivePrincipal>,
}

impl StaticAuthenticator {
    /// Create an authenticator that rejects everything.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Accept `token` as `principal`.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>, principal: HivePrincipal) -> Self {
        self.tokens.insert(token.into(), principal);
        self
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(&self, credential: &str) -> Result<HivePrincipal, AuthError> {
        let token = bearer_token(credential);
        if token.is_empty() {
            return Err(AuthError::Missing);
        }
        self.tokens.get(token).cloned().ok_or(AuthError::Invalid)
    }
}

/// Collects delivered messages and lets tests wait for them.
#[derive(Debug, Clone, Default)]
pub struct RecordingHandler {
    commands: Arc<Mutex<Vec<DeviceCommand>>>,
    notifications: Arc<Mutex<Vec<DeviceNotification>>>,
    delivered: Arc<Notify>,
}

impl RecordingHandler {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Commands delivered so far.
    #[must_use]
    pub fn commands(&self) -> Vec<DeviceCommand> {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Notifications delivered so far.
    #[must_use]
    pub fn notifications(&self) -> Vec<DeviceNotification> {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Wait for at least `count` notifications, then return all of them.
    pub async fn wait_for_notifications(
        &self,
        count: usize,
        timeout: Duration,
    ) -> Vec<DeviceNotification> {
        wait_until(&self.delivered, timeout, || self.notifications().len() >= count).await;
        self.notifications()
    }

    /// Wait for at least `count` commands, then return all of them.
    pub async fn wait_for_commands(&self, count: usize, timeout: Duration) -> Vec<DeviceCommand> {
        wait_until(&self.delivered, timeout, || self.commands().len() >= count).await;
        self.commands()
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    async fn on_command(&self, command: DeviceCommand) {
        self.commands
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(command);
        self.delivered.notify_waiters();
    }

    async fn on_notification(&self, notification: DeviceNotification) {
        self.notifications
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notification);
        self.delivered.notify_waiters();
    }
}

#[derive(Debug)]
enum PollOutcome {
    Items(Vec<DeviceEvent>),
    Fail(String),
}

/// Poll transport that answers from a script.
///
/// Each call takes the next scripted batch or failure. With the script
/// empty, a call behaves like an idle long poll: it waits for the request's
/// wait time, a newly queued batch, or cancellation.
#[derive(Debug, Clone, Default)]
pub struct MockPollTransport {
    script: Arc<Mutex<VecDeque<PollOutcome>>>,
    calls: Arc<Mutex<Vec<PollRequest>>>,
    queued: Arc<Notify>,
    called: Arc<Notify>,
}

impl MockPollTransport {
    /// Create a transport with an empty script.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a batch.
    #[must_use]
    pub fn with_batch(self, events: Vec<DeviceEvent>) -> Self {
        self.push_batch(events);
        self
    }

    /// Script a failed call.
    #[must_use]
    pub fn with_failure(self, message: impl Into<String>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(PollOutcome::Fail(message.into()));
        self
    }

    /// Queue a batch, waking an idle call.
    pub fn push_batch(&self, events: Vec<DeviceEvent>) {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(PollOutcome::Items(events));
        self.queued.notify_waiters();
    }

    /// Every request received so far.
    #[must_use]
    pub fn calls(&self) -> Vec<PollRequest> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The cursor sent with each request.
    #[must_use]
    pub fn cursors(&self) -> Vec<Option<DateTime<Utc>>> {
        self.calls().into_iter().map(|c| c.since).collect()
    }

    /// Wait until at least `count` calls were made.
    pub async fn wait_for_calls(&self, count: usize, timeout: Duration) -> bool {
        wait_until(&self.called, timeout, || self.calls().len() >= count).await
    }

    fn next_outcome(&self) -> Option<PollOutcome> {
        self.script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
    }
}

#[async_trait]
impl PollTransport for MockPollTransport {
    async fn poll(
        &self,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> SubscriptionResult<Vec<DeviceEvent>> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request.clone());
        self.called.notify_waiters();

        let queued = self.queued.notified();
        let outcome = match self.next_outcome() {
            Some(outcome) => outcome,
            None => {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => return Err(SubscriptionError::Cancelled),
                    () = queued => {},
                    () = tokio::time::sleep(request.wait) => {},
                }
                match self.next_outcome() {
                    Some(outcome) => outcome,
                    None => return Ok(Vec::new()),
                }
            },
        };
        match outcome {
            PollOutcome::Items(events) => Ok(events),
            PollOutcome::Fail(message) => Err(SubscriptionError::Status {
                code: 503,
                message,
            }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct ReadFault {
    fail: bool,
    delay: Option<Duration>,
}

/// Store wrapper whose reads (`find` and `search`) can be made to fail or stall.
///
/// Writes always go straight to the wrapped store.
#[derive(Clone)]
pub struct FlakyStore {
    inner: Arc<dyn KeyedStore>,
    fault: Arc<Mutex<ReadFault>>,
}

impl FlakyStore {
    /// Wrap `inner` with reads passing through.
    #[must_use]
    pub fn new(inner: Arc<dyn KeyedStore>) -> Self {
        Self {
            inner,
            fault: Arc::default(),
        }
    }

    /// Make every read fail with [`StoreError::Unavailable`], or stop failing.
    pub fn fail_reads(&self, fail: bool) {
        self.fault.lock().unwrap_or_else(PoisonError::into_inner).fail = fail;
    }

    /// Hold every read for `delay` before it runs, or stop holding.
    pub fn delay_reads(&self, delay: Option<Duration>) {
        self.fault.lock().unwrap_or_else(PoisonError::into_inner).delay = delay;
    }

    async fn read_gate(&self) -> StoreResult<()> {
        let fault = *self.fault.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = fault.delay {
            tokio::time::sleep(delay).await;
        }
        if fault.fail {
            return Err(StoreError::Unavailable("scripted read failure".to_owned()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for FlakyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyStore")
            .field("fault", &self.fault)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl KeyedStore for FlakyStore {
    async fn find(
        &self,
        id: u64,
        device_id: &str,
        kind: EventKind,
    ) -> StoreResult<Option<StoredEntity>> {
        self.read_gate().await?;
        self.inner.find(id, device_id, kind).await
    }

    async fn search(&self, kind: EventKind, query: &SearchQuery) -> StoreResult<Vec<StoredEntity>> {
        self.read_gate().await?;
        self.inner.search(kind, query).await
    }

    async fn put(&self, entity: StoredEntity) -> StoreResult<()> {
        self.inner.put(entity).await
    }

    async fn merge(&self, update: &CommandUpdate) -> StoreResult<Option<DeviceCommand>> {
        self.inner.merge(update).await
    }
}
