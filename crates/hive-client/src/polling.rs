//! Long-poll subscription back end.
//!
//! Each key gets its own task that polls in a loop, delivers what comes back
//! and advances the key's cursor. Tasks draw permits from a fixed-size pool,
//! so at most `max_poll_tasks` polls are in flight; the rest wait their turn.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hive_config::SubscriptionSection;
use hive_core::EventKind;
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};

use crate::cursor::Cursor;
use crate::error::{SubscriptionError, SubscriptionResult};
use crate::filter::{SubscriptionFilter, SubscriptionKey};
use crate::handler::{MessageHandler, deliver};
use crate::subscriptions::Subscriptions;
use crate::transport::{PollRequest, PollTransport};

/// Pause after a failed poll before trying again.
const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

struct PollEntry {
    cursor: Cursor,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Subscriptions served by repeated long-poll calls.
pub struct PollingSubscriptions {
    transport: Arc<dyn PollTransport>,
    handler: Arc<dyn MessageHandler>,
    permits: Arc<Semaphore>,
    wait: Duration,
    grace: Duration,
    retry_delay: Duration,
    entries: RwLock<HashMap<SubscriptionKey, PollEntry>>,
    shutdown: CancellationToken,
}

impl PollingSubscriptions {
    /// Create a manager. Nothing is polled until the first subscribe.
    #[must_use]
    pub fn new(
        transport: Arc<dyn PollTransport>,
        handler: Arc<dyn MessageHandler>,
        config: &SubscriptionSection,
    ) -> Self {
        Self {
            transport,
            handler,
            permits: Arc::new(Semaphore::new(config.max_poll_tasks)),
            wait: config.wait_timeout(),
            grace: config.shutdown_grace(),
            retry_delay: DEFAULT_RETRY_DELAY,
            entries: RwLock::new(HashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Override the pause after a failed poll.
    #[must_use]
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Last-seen timestamp for an active key.
    pub async fn cursor(&self, key: &SubscriptionKey) -> Option<Cursor> {
        self.entries.read().await.get(key).map(|e| e.cursor.clone())
    }

    fn start(&self, key: SubscriptionKey, cursor: Cursor) -> PollEntry {
        let cancel = self.shutdown.child_token();
        let span = info_span!("poll", key = %key);
        let task = tokio::spawn(
            PollLoop {
                transport: Arc::clone(&self.transport),
                handler: Arc::clone(&self.handler),
                permits: Arc::clone(&self.permits),
                key,
                cursor: cursor.clone(),
                wait: self.wait,
                retry_delay: self.retry_delay,
                cancel: cancel.clone(),
            }
            .run()
            .instrument(span),
        );
        PollEntry {
            cursor,
            cancel,
            task,
        }
    }
}

#[async_trait]
impl Subscriptions for PollingSubscriptions {
    async fn subscribe(
        &self,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<Vec<SubscriptionKey>> {
        if self.shutdown.is_cancelled() {
            return Err(SubscriptionError::ShutDown);
        }
        let mut entries = self.entries.write().await;
        let mut started = Vec::new();
        for key in filter.keys(kind) {
            if entries.get(&key).is_some_and(|e| !e.task.is_finished()) {
                trace!(%key, "Already polling");
                continue;
            }
            let entry = self.start(key.clone(), Cursor::new(filter.since));
            entries.insert(key.clone(), entry);
            started.push(key);
        }
        debug!(%kind, started = started.len(), "Poll subscriptions added");
        Ok(started)
    }

    async fn unsubscribe(
        &self,
        kind: EventKind,
        filter: &SubscriptionFilter,
    ) -> SubscriptionResult<usize> {
        let mut entries = self.entries.write().await;
        let mut removed = 0usize;
        for key in filter.keys(kind) {
            if let Some(entry) = entries.remove(&key) {
                entry.cancel.cancel();
                removed = removed.saturating_add(1);
            }
        }
        debug!(%kind, removed, "Poll subscriptions removed");
        Ok(removed)
    }

    async fn resubscribe_all(&self) -> SubscriptionResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(SubscriptionError::ShutDown);
        }
        let mut entries = self.entries.write().await;
        let keys: Vec<SubscriptionKey> = entries.keys().cloned().collect();
        for key in keys {
            if let Some(old) = entries.remove(&key) {
                old.cancel.cancel();
                let entry = self.start(key.clone(), old.cursor);
                entries.insert(key, entry);
            }
        }
        info!(count = entries.len(), "Poll subscriptions restarted");
        Ok(())
    }

    async fn active(&self) -> Vec<SubscriptionKey> {
        let mut keys: Vec<_> = self.entries.read().await.keys().cloned().collect();
        keys.sort();
        keys
    }

    async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        self.shutdown.cancel();
        let entries: Vec<PollEntry> = self.entries.write().await.drain().map(|(_, e)| e).collect();
        let aborts: Vec<_> = entries.iter().map(|e| e.task.abort_handle()).collect();
        let joined = futures::future::join_all(entries.into_iter().map(|e| e.task));
        if tokio::time::timeout(self.grace, joined).await.is_err() {
            warn!(grace = ?self.grace, "Poll tasks did not stop in time, aborting");
            for abort in aborts {
                abort.abort();
            }
        }
        info!("Polling subscriptions shut down");
    }
}

impl std::fmt::Debug for PollingSubscriptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingSubscriptions")
            .field("wait", &self.wait)
            .field("available_permits", &self.permits.available_permits())
            .field("shut_down", &self.shutdown.is_cancelled())
            .finish_non_exhaustive()
    }
}

struct PollLoop {
    transport: Arc<dyn PollTransport>,
    handler: Arc<dyn MessageHandler>,
    permits: Arc<Semaphore>,
    key: SubscriptionKey,
    cursor: Cursor,
    wait: Duration,
    retry_delay: Duration,
    cancel: CancellationToken,
}

impl PollLoop {
    async fn run(self) {
        let permit = tokio::select! {
            biased;
            () = self.cancel.cancelled() => return,
            permit = Arc::clone(&self.permits).acquire_owned() => permit,
        };
        let Ok(_permit) = permit else {
            return;
        };
        debug!("Poll loop started");

        while !self.cancel.is_cancelled() {
            let request = PollRequest::for_key(&self.key, self.cursor.get(), self.wait);
            match self.transport.poll(&request, &self.cancel).await {
                Ok(mut events) => {
                    events.sort_by_key(hive_core::DeviceEvent::timestamp);
                    for event in events {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        if !self.key.matches(event.device_id(), &event.name()) {
                            continue;
                        }
                        if !self.cursor.admit(&event) {
                            trace!("Skipping already-seen item");
                            continue;
                        }
                        deliver(self.handler.as_ref(), event).await;
                    }
                },
                Err(SubscriptionError::Cancelled) => break,
                Err(e) => {
                    warn!(error = %e, "Poll failed, retrying");
                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(self.retry_delay) => {},
                    }
                },
            }
        }
        debug!("Poll loop stopped");
    }
}
