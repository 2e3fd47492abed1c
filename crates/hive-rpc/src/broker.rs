//! In-process partitioned transport.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use crate::error::{RpcError, RpcResult};
use crate::message::{Request, Response};
use crate::transport::{MessageDispatcher, RequestTransport};

/// Partitioned request queues plus named reply channels, all in one process.
///
/// Requests with a partition key always land in the same partition, so the
/// single consumer of that partition sees them in submission order.
/// Key-less requests are spread round robin.
#[derive(Debug)]
pub struct LocalBroker {
    partitions: Vec<mpsc::UnboundedSender<Request>>,
    receivers: Mutex<Option<Vec<mpsc::UnboundedReceiver<Request>>>>,
    reply_topics: DashMap<String, mpsc::UnboundedSender<Response>>,
    round_robin: AtomicUsize,
}

impl LocalBroker {
    /// Create a broker with `partition_count` partitions (at least one).
    #[must_use]
    pub fn new(partition_count: usize) -> Self {
        let (partitions, receivers): (Vec<_>, Vec<_>) = (0..partition_count.max(1))
            .map(|_| mpsc::unbounded_channel())
            .unzip();
        Self {
            partitions,
            receivers: Mutex::new(Some(receivers)),
            reply_topics: DashMap::new(),
            round_robin: AtomicUsize::new(0),
        }
    }

    /// Number of partitions.
    #[must_use]
    pub fn partition_count(&self) -> usize {
        self.partitions.len()
    }

    /// Partition a request with this key is routed to.
    #[must_use]
    pub fn partition_for(&self, key: Option<&str>) -> usize {
        let count = self.partitions.len();
        let slot = match key {
            Some(key) => {
                let mut hasher = DefaultHasher::new();
                key.hash(&mut hasher);
                let count = u64::try_from(count).unwrap_or(1);
                let slot = hasher.finish().checked_rem(count).unwrap_or(0);
                usize::try_from(slot).unwrap_or(0)
            },
            None => self.round_robin.fetch_add(1, Ordering::Relaxed),
        };
        slot.checked_rem(count).unwrap_or(0)
    }

    /// Take the consumer ends of every partition. Returns `None` after the first call.
    pub fn take_partitions(&self) -> Option<Vec<mpsc::UnboundedReceiver<Request>>> {
        self.receivers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Whether a reply channel with this name is open.
    #[must_use]
    pub fn has_reply_topic(&self, topic: &str) -> bool {
        self.reply_topics.contains_key(topic)
    }
}

impl RequestTransport for LocalBroker {
    fn submit(&self, request: Request) -> RpcResult<()> {
        let slot = self.partition_for(request.partition_key());
        trace!(
            correlation_id = %request.correlation_id(),
            partition = slot,
            "Submitting request"
        );
        self.partitions
            .get(slot)
            .ok_or(RpcError::ChannelClosed)?
            .send(request)
            .map_err(|_| RpcError::ChannelClosed)
    }

    fn open_reply_topic(&self, topic: &str) -> mpsc::UnboundedReceiver<Response> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.reply_topics.insert(topic.to_owned(), tx);
        debug!(topic, "Opened reply topic");
        rx
    }

    fn close_reply_topic(&self, topic: &str) {
        if self.reply_topics.remove(topic).is_some() {
            debug!(topic, "Closed reply topic");
        }
    }
}

impl MessageDispatcher for LocalBroker {
    fn dispatch(&self, reply_to: &str, response: Response) -> RpcResult<()> {
        let Some(tx) = self.reply_topics.get(reply_to) else {
            return Err(RpcError::UnknownReplyTopic(reply_to.to_owned()));
        };
        tx.send(response).map_err(|_| RpcError::ChannelClosed)
    }
}
