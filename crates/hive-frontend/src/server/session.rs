//! One client connection.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{SinkExt, StreamExt};
use hive_core::{AuthError, Authenticator, HivePrincipal, SubscriptionId};
use hive_telemetry::RequestContext;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value, json};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, trace, warn};
use uuid::Uuid;

use super::protocol::{
    self, CommandInsertMessage, CommandUpdateMessage, NotificationInsertMessage,
    SubscribeMessage, UnsubscribeMessage,
};
use crate::error::{FrontendError, FrontendResult};
use crate::filter::EventFilter;
use crate::service::{EventStream, HiveService};

/// Protocol version reported by `server/info`.
pub const API_VERSION: &str = "3.5.0";

const WRITER_DRAIN: Duration = Duration::from_secs(1);

/// Result of a handled request: reply fields, and a stream to start
/// pumping once the reply is on its way.
#[derive(Default)]
struct Outcome {
    fields: Map<String, Value>,
    stream: Option<EventStream>,
}

impl Outcome {
    fn with(key: &str, value: Value) -> Self {
        let mut fields = Map::new();
        fields.insert(key.to_owned(), value);
        Self {
            fields,
            stream: None,
        }
    }
}

struct Session {
    id: String,
    service: Arc<HiveService>,
    auth: Arc<dyn Authenticator>,
    outbound: mpsc::UnboundedSender<Message>,
    principal: Option<HivePrincipal>,
    pumps: HashMap<SubscriptionId, JoinHandle<()>>,
}

impl Session {
    fn send(&self, message: &Value) {
        if self.outbound.send(Message::Text(message.to_string().into())).is_err() {
            trace!(session_id = %self.id, "Writer gone, message dropped");
        }
    }

    async fn handle(&mut self, text: &str) {
        let request: Value = match serde_json::from_str(text) {
            Ok(value @ Value::Object(_)) => value,
            _ => {
                self.send(&protocol::failure("", None, 400, "malformed message"));
                return;
            },
        };
        let action = request
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let request_id = request.get("requestId").cloned();

        let span = RequestContext::new("socket")
            .with_action(action.clone())
            .with_session(self.id.clone())
            .span();
        let outcome = self.dispatch(&action, request).instrument(span).await;

        match outcome {
            Ok(outcome) => {
                self.send(&protocol::success(&action, request_id, outcome.fields));
                if let Some(stream) = outcome.stream {
                    self.start_pump(stream);
                }
            },
            Err(e) => {
                debug!(session_id = %self.id, %action, error = %e, "Request failed");
                self.send(&protocol::failure(&action, request_id, e.code(), &e.reason()));
            },
        }
    }

    async fn dispatch(&mut self, action: &str, request: Value) -> FrontendResult<Outcome> {
        match action {
            "authenticate" => {
                let token = request
                    .get("token")
                    .and_then(Value::as_str)
                    .ok_or(AuthError::Missing)?;
                let principal = self.auth.authenticate(token).await?;
                info!(session_id = %self.id, subject = %principal.subject, "Session authenticated");
                self.principal = Some(principal);
                Ok(Outcome::default())
            },
            "server/info" => Ok(Outcome::with(
                "info",
                json!({ "apiVersion": API_VERSION, "serverTimestamp": Utc::now() }),
            )),
            _ => {
                let principal = self.principal.clone().ok_or(AuthError::Missing)?;
                self.dispatch_authorized(action, request, &principal).await
            },
        }
    }

    async fn dispatch_authorized(
        &mut self,
        action: &str,
        request: Value,
        principal: &HivePrincipal,
    ) -> FrontendResult<Outcome> {
        match action {
            "notification/subscribe" | "command/subscribe" => {
                let filter = parse::<SubscribeMessage>(request)?.into_filter();
                authorize_filter(principal, &filter)?;
                let stream = if action == "notification/subscribe" {
                    self.service.subscribe_notifications(&filter).await?
                } else {
                    self.service.subscribe_commands(&filter).await?
                };
                let mut outcome = Outcome::with("subscriptionId", json!(stream.id().0));
                outcome.stream = Some(stream);
                Ok(outcome)
            },
            "notification/unsubscribe" | "command/unsubscribe" => {
                let id = SubscriptionId(parse::<UnsubscribeMessage>(request)?.subscription_id);
                // Handles owned by other sessions are left alone.
                if let Some(pump) = self.pumps.remove(&id) {
                    self.service.unsubscribe(id).await;
                    pump.abort();
                }
                Ok(Outcome::default())
            },
            "notification/insert" => {
                let (device_id, notification) =
                    parse::<NotificationInsertMessage>(request)?.notification();
                authorize_device(principal, &device_id)?;
                let stored = self
                    .service
                    .insert_notification(&device_id, notification)
                    .await?;
                Ok(Outcome::with("notification", serde_json::to_value(stored).map_err(invalid)?))
            },
            "command/insert" => {
                let (device_id, command) = parse::<CommandInsertMessage>(request)?.command();
                authorize_device(principal, &device_id)?;
                let stored = self.service.insert_command(&device_id, command).await?;
                Ok(Outcome::with("command", serde_json::to_value(stored).map_err(invalid)?))
            },
            "command/update" => {
                let (device_id, id, update) = parse::<CommandUpdateMessage>(request)?.update();
                authorize_device(principal, &device_id)?;
                let merged = self.service.update_command(&device_id, id, update).await?;
                Ok(Outcome::with("command", serde_json::to_value(merged).map_err(invalid)?))
            },
            other => Err(FrontendError::Validation(format!("unknown action '{other}'"))),
        }
    }

    /// Forward a subscription's items to the socket until it is dropped.
    fn start_pump(&mut self, mut stream: EventStream) {
        let id = stream.id();
        let outbound = self.outbound.clone();
        let pump = tokio::spawn(async move {
            while let Some(event) = stream.recv().await {
                let message = protocol::push(id.0, &event);
                if outbound.send(Message::Text(message.to_string().into())).is_err() {
                    break;
                }
            }
            trace!(subscription_id = %id, "Pump finished");
        });
        self.pumps.insert(id, pump);
    }

    /// Drop every subscription this session opened.
    async fn close(&mut self) {
        let count = self.pumps.len();
        for (id, pump) in self.pumps.drain() {
            self.service.unsubscribe(id).await;
            pump.abort();
        }
        debug!(session_id = %self.id, subscriptions = count, "Session closed");
    }
}

fn parse<T: DeserializeOwned>(request: Value) -> FrontendResult<T> {
    serde_json::from_value(request).map_err(invalid)
}

#[allow(clippy::needless_pass_by_value)]
fn invalid(err: serde_json::Error) -> FrontendError {
    FrontendError::Validation(err.to_string())
}

fn authorize_device(principal: &HivePrincipal, device_id: &str) -> FrontendResult<()> {
    if principal.can_access(device_id) {
        Ok(())
    } else {
        Err(AuthError::Forbidden(device_id.to_owned()).into())
    }
}

fn authorize_filter(principal: &HivePrincipal, filter: &EventFilter) -> FrontendResult<()> {
    match &filter.device_ids {
        None if principal.device_ids.is_some() => {
            Err(AuthError::Forbidden("all devices".to_owned()).into())
        },
        None => Ok(()),
        Some(devices) => devices
            .iter()
            .try_for_each(|device_id| authorize_device(principal, device_id)),
    }
}

/// Serve one accepted connection until the peer leaves or `shutdown` fires.
pub(crate) async fn run(
    stream: TcpStream,
    service: Arc<HiveService>,
    auth: Arc<dyn Authenticator>,
    shutdown: CancellationToken,
) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!(error = %e, "WebSocket handshake failed");
            return;
        },
    };
    let (mut sink, mut source) = ws.split();
    let (outbound, mut queue) = mpsc::unbounded_channel::<Message>();

    let writer = tokio::spawn(async move {
        while let Some(message) = queue.recv().await {
            if let Err(e) = sink.send(message).await {
                debug!(error = %e, "Socket write failed");
                return;
            }
        }
        let _ = sink.close().await;
    });

    let mut session = Session {
        id: Uuid::new_v4().to_string(),
        service,
        auth,
        outbound,
        principal: None,
        pumps: HashMap::new(),
    };
    debug!(session_id = %session.id, "Session opened");

    loop {
        let frame = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            frame = source.next() => frame,
        };
        match frame {
            Some(Ok(Message::Text(text))) => session.handle(text.as_str()).await,
            Some(Ok(Message::Ping(payload))) => {
                if session.outbound.send(Message::Pong(payload)).is_err() {
                    trace!(session_id = %session.id, "Writer gone, pong dropped");
                }
            },
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {},
            Some(Err(e)) => {
                debug!(session_id = %session.id, error = %e, "Socket read failed");
                break;
            },
        }
    }

    session.close().await;
    drop(session);
    if tokio::time::timeout(WRITER_DRAIN, writer).await.is_err() {
        debug!("Socket writer did not drain in time");
    }
}
