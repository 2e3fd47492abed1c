//! Correlation table matching responses to waiting callers.

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, trace, warn};

use crate::message::Response;

/// Routes responses to the caller that issued the matching request.
///
/// Single-reply entries are removed on first delivery, so a duplicate
/// response with the same correlation id finds nothing and is dropped.
/// Streaming entries stay until [`remove`](Self::remove) is called, the
/// receiver is dropped, or a response marked last arrives.
#[derive(Debug, Default)]
pub struct RequestResponseMatcher {
    single: DashMap<String, oneshot::Sender<Response>>,
    streams: DashMap<String, mpsc::UnboundedSender<Response>>,
}

impl RequestResponseMatcher {
    /// Create an empty matcher.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a single-reply waiter.
    pub fn register_single(&self, correlation_id: &str) -> oneshot::Receiver<Response> {
        let (tx, rx) = oneshot::channel();
        self.single.insert(correlation_id.to_owned(), tx);
        rx
    }

    /// Register a streaming waiter.
    pub fn register_stream(&self, correlation_id: &str) -> mpsc::UnboundedReceiver<Response> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams.insert(correlation_id.to_owned(), tx);
        rx
    }

    /// Deliver a response. Returns `true` if a waiter received it.
    pub fn offer(&self, response: Response) -> bool {
        let id = response.correlation_id().to_owned();

        if let Some((_, tx)) = self.single.remove(&id) {
            trace!(correlation_id = %id, "Resolving single-reply request");
            return tx.send(response).is_ok();
        }

        let last = response.is_last();
        let delivered = self
            .streams
            .get(&id)
            .map(|tx| tx.send(response).is_ok());

        match delivered {
            Some(true) => {
                if last {
                    self.streams.remove(&id);
                }
                true
            },
            Some(false) => {
                debug!(correlation_id = %id, "Stream receiver dropped, releasing correlation");
                self.streams.remove(&id);
                false
            },
            None => {
                warn!(correlation_id = %id, "No pending request for response, dropping");
                false
            },
        }
    }

    /// Forget a correlation id. Returns `true` if it was pending.
    pub fn remove(&self, correlation_id: &str) -> bool {
        let single = self.single.remove(correlation_id).is_some();
        let stream = self.streams.remove(correlation_id).is_some();
        single || stream
    }

    /// Number of open correlation entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.single.len().saturating_add(self.streams.len())
    }
}
