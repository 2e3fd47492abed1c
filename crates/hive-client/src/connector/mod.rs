//! Persistent `WebSocket` connector with request/response correlation.
//!
//! Every outgoing request gets a fresh `requestId`. The reader task hands
//! replies to whoever is waiting on that id and passes everything else
//! (server pushes) to the [`PushHandler`]. Three tasks run per connection:
//! a writer fed by a channel, a reader, and a heartbeat.
//!
//! Connection loss is reported as [`ConnectionEvent::Lost`]. The connector
//! never reconnects on its own; owners call [`HiveSocketConnector::reconnect`].

pub(crate) mod backoff;
mod heartbeat;

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use hive_config::SocketSection;
use hive_core::codes;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, trace, warn};
use uuid::Uuid;

use crate::error::{ConnectorError, ConnectorResult};
use heartbeat::Liveness;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection parameters.
#[derive(Debug, Clone)]
pub struct ConnectorSettings {
    /// `ws://` or `wss://` endpoint.
    pub url: String,
    /// How long [`HiveSocketConnector::request`] waits for a reply.
    pub response_timeout: Duration,
    /// Ping period.
    pub heartbeat_interval: Duration,
    /// Silent intervals tolerated before the connection is dropped.
    pub heartbeat_miss_limit: u32,
    /// First reconnect delay ceiling.
    pub reconnect_base: Duration,
    /// Largest reconnect delay ceiling.
    pub reconnect_max: Duration,
}

impl ConnectorSettings {
    /// Defaults for everything but the endpoint.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Self::from(&SocketSection::default())
        }
    }

    /// Override the reply timeout.
    #[must_use]
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Override heartbeat timing.
    #[must_use]
    pub fn with_heartbeat(mut self, interval: Duration, miss_limit: u32) -> Self {
        self.heartbeat_interval = interval;
        self.heartbeat_miss_limit = miss_limit;
        self
    }

    /// Override reconnect delays.
    #[must_use]
    pub fn with_reconnect(mut self, base: Duration, max: Duration) -> Self {
        self.reconnect_base = base;
        self.reconnect_max = max;
        self
    }
}

impl From<&SocketSection> for ConnectorSettings {
    fn from(section: &SocketSection) -> Self {
        Self {
            url: section.url.clone(),
            response_timeout: section.response_timeout(),
            heartbeat_interval: section.heartbeat_interval(),
            heartbeat_miss_limit: section.heartbeat_miss_limit,
            reconnect_base: section.reconnect_base(),
            reconnect_max: section.reconnect_max(),
        }
    }
}

/// Receives server messages that are not replies to a request.
///
/// Called on the reader task, so implementations must not block.
pub trait PushHandler: Send + Sync {
    /// Handle one pushed message.
    fn on_push(&self, message: Value);
}

impl PushHandler for mpsc::UnboundedSender<Value> {
    fn on_push(&self, message: Value) {
        if self.send(message).is_err() {
            trace!("Push receiver gone");
        }
    }
}

/// Connection state changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection was opened.
    Established,
    /// The current connection dropped without [`HiveSocketConnector::close`].
    Lost,
}

struct Link {
    generation: u64,
    outbound: mpsc::UnboundedSender<Message>,
    cancel: CancellationToken,
}

pub(crate) struct Shared {
    settings: ConnectorSettings,
    push: Arc<dyn PushHandler>,
    pending: DashMap<String, oneshot::Sender<Value>>,
    link: Mutex<Option<Link>>,
    generation: AtomicU64,
    liveness: Liveness,
    events: broadcast::Sender<ConnectionEvent>,
    closed: AtomicBool,
}

impl Shared {
    fn outbound(&self) -> ConnectorResult<mpsc::UnboundedSender<Message>> {
        self.link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(|link| link.outbound.clone())
            .ok_or(ConnectorError::NotConnected)
    }

    async fn open(self: &Arc<Self>) -> ConnectorResult<()> {
        let (ws, _) = connect_async(self.settings.url.as_str()).await?;
        let (sink, stream) = ws.split();
        let (outbound, inbound) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let generation = self.generation.fetch_add(1, Ordering::SeqCst).wrapping_add(1);

        {
            let mut link = self.link.lock().unwrap_or_else(PoisonError::into_inner);
            if self.closed.load(Ordering::SeqCst) {
                return Err(ConnectorError::Closed);
            }
            if let Some(previous) = link.replace(Link {
                generation,
                outbound: outbound.clone(),
                cancel: cancel.clone(),
            }) {
                previous.cancel.cancel();
            }
        }
        self.liveness.touch();

        let span = info_span!("hive_socket", url = %self.settings.url, generation);
        tokio::spawn(
            write_loop(Arc::clone(self), sink, inbound, cancel.clone(), generation)
                .instrument(span.clone()),
        );
        tokio::spawn(
            read_loop(Arc::clone(self), stream, cancel.clone(), generation)
                .instrument(span.clone()),
        );
        tokio::spawn(heartbeat::run(Arc::clone(self), outbound, cancel, generation).instrument(span));

        info!(url = %self.settings.url, generation, "Socket connected");
        let _ = self.events.send(ConnectionEvent::Established);
        Ok(())
    }

    /// Tear down connection `generation` if it is still current.
    ///
    /// Waiting requests fail with [`ConnectorError::NoResponse`] when their
    /// reply senders are dropped here.
    fn lost(&self, generation: u64, reason: &str) {
        let link = {
            let mut guard = self.link.lock().unwrap_or_else(PoisonError::into_inner);
            if guard.as_ref().is_some_and(|l| l.generation == generation) {
                guard.take()
            } else {
                None
            }
        };
        let Some(link) = link else {
            return;
        };
        link.cancel.cancel();
        self.pending.clear();
        if !self.closed.load(Ordering::SeqCst) {
            warn!(generation, reason, "Socket connection lost");
            let _ = self.events.send(ConnectionEvent::Lost);
        }
    }

    fn route(&self, text: &str) {
        let message: Value = match serde_json::from_str(text) {
            Ok(message) => message,
            Err(e) => {
                warn!(error = %e, "Dropping unparseable frame");
                return;
            },
        };
        match message.get("requestId").and_then(Value::as_str).map(str::to_owned) {
            Some(request_id) => match self.pending.remove(&request_id) {
                Some((_, waiter)) => {
                    if waiter.send(message).is_err() {
                        trace!(request_id, "Requester gone, reply dropped");
                    }
                },
                None => debug!(request_id, "Dropping reply nobody is waiting for"),
            },
            None => self.push.on_push(message),
        }
    }
}

async fn write_loop(
    shared: Arc<Shared>,
    mut sink: SplitSink<WsStream, Message>,
    mut inbound: mpsc::UnboundedReceiver<Message>,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        // Queued frames go out before cancellation is honored, so a close
        // frame enqueued just before cancel still reaches the peer.
        let message = tokio::select! {
            biased;
            message = inbound.recv() => message,
            () = cancel.cancelled() => None,
        };
        let Some(message) = message else {
            break;
        };
        if let Err(e) = sink.send(message).await {
            debug!(error = %e, "Write failed");
            shared.lost(generation, "write failed");
            break;
        }
    }
    let _ = sink.close().await;
}

async fn read_loop(
    shared: Arc<Shared>,
    mut stream: SplitStream<WsStream>,
    cancel: CancellationToken,
    generation: u64,
) {
    loop {
        let frame = tokio::select! {
            biased;
            () = cancel.cancelled() => return,
            frame = stream.next() => frame,
        };
        match frame {
            Some(Ok(message)) => {
                shared.liveness.touch();
                match message {
                    Message::Text(text) => shared.route(text.as_str()),
                    Message::Close(frame) => {
                        debug!(?frame, "Peer closed connection");
                        break;
                    },
                    _ => {},
                }
            },
            Some(Err(e)) => {
                debug!(error = %e, "Read failed");
                break;
            },
            None => break,
        }
    }
    shared.lost(generation, "connection closed");
}

fn check_status(reply: Value) -> ConnectorResult<Value> {
    if reply.get("status").and_then(Value::as_str) != Some("error") {
        return Ok(reply);
    }
    let code = reply
        .get("code")
        .and_then(Value::as_u64)
        .and_then(|c| u16::try_from(c).ok())
        .unwrap_or(codes::INTERNAL);
    let message = reply
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error");
    Err(ConnectorError::from_status(code, message))
}

/// Client end of the persistent socket.
pub struct HiveSocketConnector {
    shared: Arc<Shared>,
}

impl HiveSocketConnector {
    /// Connect to `settings.url`.
    ///
    /// # Errors
    ///
    /// Returns an error if the initial connection cannot be opened.
    pub async fn connect(
        settings: ConnectorSettings,
        push: Arc<dyn PushHandler>,
    ) -> ConnectorResult<Self> {
        let (events, _) = broadcast::channel(16);
        let shared = Arc::new(Shared {
            settings,
            push,
            pending: DashMap::new(),
            link: Mutex::new(None),
            generation: AtomicU64::new(0),
            liveness: Liveness::new(),
            events,
            closed: AtomicBool::new(false),
        });
        shared.open().await?;
        Ok(Self { shared })
    }

    /// Connection parameters.
    #[must_use]
    pub fn settings(&self) -> &ConnectorSettings {
        &self.shared.settings
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }

    /// Whether a connection is currently open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Number of requests awaiting a reply.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        self.shared.pending.len()
    }

    fn dispatch(&self, mut message: Value) -> ConnectorResult<(String, oneshot::Receiver<Value>)> {
        let Some(object) = message.as_object_mut() else {
            return Err(ConnectorError::InvalidMessage(
                "expected a JSON object".to_owned(),
            ));
        };
        let request_id = Uuid::new_v4().to_string();
        object.insert("requestId".to_owned(), Value::String(request_id.clone()));
        let text = serde_json::to_string(&message)?;
        let outbound = self.shared.outbound()?;

        let (waiter, reply) = oneshot::channel();
        self.shared.pending.insert(request_id.clone(), waiter);
        if outbound.send(Message::Text(text.into())).is_err() {
            self.shared.pending.remove(&request_id);
            return Err(ConnectorError::NotConnected);
        }
        trace!(%request_id, "Request sent");
        Ok((request_id, reply))
    }

    /// Send `message` and wait for the correlated reply.
    ///
    /// # Errors
    ///
    /// - [`ConnectorError::NoResponse`] if no reply arrives within the
    ///   response timeout or the connection drops first.
    /// - [`ConnectorError::Client`] / [`ConnectorError::Server`] if the
    ///   reply carries an error status.
    pub async fn request(&self, message: Value) -> ConnectorResult<Value> {
        let (request_id, reply) = self.dispatch(message)?;
        let timeout = self.shared.settings.response_timeout;
        match tokio::time::timeout(timeout, reply).await {
            Ok(Ok(reply)) => check_status(reply),
            Ok(Err(_)) | Err(_) => {
                self.shared.pending.remove(&request_id);
                Err(ConnectorError::NoResponse {
                    request_id,
                    timeout,
                })
            },
        }
    }

    /// Send `message` and deserialize one field of the reply.
    ///
    /// # Errors
    ///
    /// Same as [`request`](Self::request), plus [`ConnectorError::MissingField`]
    /// and [`ConnectorError::Json`] for a reply of the wrong shape.
    pub async fn send_for<T: DeserializeOwned>(
        &self,
        message: Value,
        field: &str,
    ) -> ConnectorResult<T> {
        let mut reply = self.request(message).await?;
        let value = reply
            .get_mut(field)
            .map(Value::take)
            .ok_or_else(|| ConnectorError::MissingField(field.to_owned()))?;
        Ok(serde_json::from_value(value)?)
    }

    /// Send `message` without waiting. A failed or missing reply is logged.
    ///
    /// Returns the request id.
    ///
    /// # Errors
    ///
    /// Returns an error if there is no connection or the message is not an object.
    pub fn send(&self, message: Value) -> ConnectorResult<String> {
        let (request_id, reply) = self.dispatch(message)?;
        let shared = Arc::clone(&self.shared);
        let id = request_id.clone();
        tokio::spawn(async move {
            let timeout = shared.settings.response_timeout;
            match tokio::time::timeout(timeout, reply).await {
                Ok(Ok(reply)) => {
                    if let Err(e) = check_status(reply) {
                        warn!(request_id = %id, error = %e, "Request rejected");
                    }
                },
                Ok(Err(_)) | Err(_) => {
                    shared.pending.remove(&id);
                    warn!(request_id = %id, ?timeout, "No response to request");
                },
            }
        });
        Ok(request_id)
    }

    /// Authenticate the session with a bearer token.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Client`] with 401 for a rejected token.
    pub async fn authenticate(&self, token: &str) -> ConnectorResult<()> {
        self.request(json!({ "action": "authenticate", "token": token }))
            .await
            .map(drop)
    }

    /// Drop the current connection, if any, and open a new one.
    ///
    /// # Errors
    ///
    /// Returns [`ConnectorError::Closed`] after [`close`](Self::close), or
    /// the connect error.
    pub async fn reconnect(&self) -> ConnectorResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(ConnectorError::Closed);
        }
        let previous = self
            .shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(previous) = previous {
            previous.cancel.cancel();
        }
        self.shared.pending.clear();
        self.shared.open().await
    }

    /// Close the connection for good. Idempotent.
    pub fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let link = self
            .shared
            .link
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(link) = link {
            let _ = link.outbound.send(Message::Close(Some(CloseFrame {
                code: CloseCode::Normal,
                reason: "closing".into(),
            })));
            link.cancel.cancel();
        }
        self.shared.pending.clear();
        info!("Socket connector closed");
    }
}

impl Drop for HiveSocketConnector {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for HiveSocketConnector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HiveSocketConnector")
            .field("url", &self.shared.settings.url)
            .field("connected", &self.is_connected())
            .field("pending", &self.shared.pending.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_from_section() {
        let section = SocketSection::default();
        let settings = ConnectorSettings::from(&section);
        assert_eq!(settings.url, section.url);
        assert_eq!(settings.heartbeat_miss_limit, section.heartbeat_miss_limit);
        let custom = ConnectorSettings::new("ws://other:1/ws")
            .with_response_timeout(Duration::from_millis(50));
        assert_eq!(custom.url, "ws://other:1/ws");
        assert_eq!(custom.response_timeout, Duration::from_millis(50));
    }

    #[test]
    fn test_error_status_becomes_business_error() {
        let err = check_status(json!({"status": "error", "code": 404, "error": "missing"}))
            .unwrap_err();
        assert!(matches!(err, ConnectorError::Client { code: 404, .. }));

        let err = check_status(json!({"status": "error", "error": "boom"})).unwrap_err();
        assert!(matches!(err, ConnectorError::Server { code: 500, .. }));

        let ok = check_status(json!({"status": "success", "subscriptionId": 3})).unwrap();
        assert_eq!(ok["subscriptionId"], 3);
    }

    #[test]
    fn test_channel_push_handler_forwards() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_push(json!({"action": "notification/insert"}));
        assert_eq!(rx.try_recv().unwrap()["action"], "notification/insert");
    }
}
