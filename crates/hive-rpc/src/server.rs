//! Server side of the bus: partition consumers dispatching to handlers.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hive_core::{ErrorFamily, HiveError, HiveResult, codes};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::body::{Action, Body};
use crate::message::{Request, Response};
use crate::transport::MessageDispatcher;

/// Handles one kind of request.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    /// Produce the reply body for `request`.
    ///
    /// Returned errors are sent back as error responses; they never
    /// propagate past the server.
    async fn handle(&self, request: &Request) -> HiveResult<Body>;
}

/// Handler lookup keyed by request action.
#[derive(Default)]
pub struct RequestHandlers {
    handlers: HashMap<Action, Arc<dyn RequestHandler>>,
}

impl RequestHandlers {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for `action`, replacing any previous one.
    pub fn register(&mut self, action: Action, handler: Arc<dyn RequestHandler>) {
        self.handlers.insert(action, handler);
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with(mut self, action: Action, handler: Arc<dyn RequestHandler>) -> Self {
        self.register(action, handler);
        self
    }

    /// Handler for `action`.
    #[must_use]
    pub fn get(&self, action: Action) -> Option<&Arc<dyn RequestHandler>> {
        self.handlers.get(&action)
    }

    /// Registered actions.
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        let mut actions: Vec<_> = self.handlers.keys().copied().collect();
        actions.sort();
        actions
    }

    /// Turn a request into its response.
    pub async fn process(&self, request: &Request) -> Response {
        let correlation_id = request.correlation_id();
        let Some(body) = request.body() else {
            return Response::error(correlation_id, codes::BAD_REQUEST, "Request body is null");
        };

        let action = body.action();
        if action == Action::Ping {
            return Response::reply(correlation_id, Body::Pong);
        }

        let Some(handler) = self.get(action) else {
            warn!(%action, "No handler registered");
            return Response::error(
                correlation_id,
                codes::INTERNAL,
                format!("no handler registered for action {action}"),
            );
        };

        match handler.handle(request).await {
            Ok(body) => Response::reply(correlation_id, body).with_last(request.is_single_reply()),
            Err(err) => {
                log_handler_error(action, correlation_id, &err);
                Response::from_error(correlation_id, &err)
            },
        }
    }
}

impl std::fmt::Debug for RequestHandlers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestHandlers")
            .field("actions", &self.actions())
            .finish()
    }
}

fn log_handler_error(action: Action, correlation_id: &str, err: &HiveError) {
    match err.family() {
        ErrorFamily::Client => {
            debug!(%action, correlation_id, error = %err, "Request rejected");
        },
        ErrorFamily::Server => {
            error!(%action, correlation_id, error = %err, "Request failed");
        },
    }
}

/// Consumer pool: one worker per partition, each processing its partition
/// sequentially so same-key requests keep their submission order.
pub struct RpcServer {
    workers: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl RpcServer {
    /// Spawn one worker per partition receiver.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(
        partitions: Vec<mpsc::UnboundedReceiver<Request>>,
        handlers: Arc<RequestHandlers>,
        dispatcher: Arc<dyn MessageDispatcher>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let workers = partitions
            .into_iter()
            .enumerate()
            .map(|(partition, rx)| {
                tokio::spawn(run_worker(
                    partition,
                    rx,
                    Arc::clone(&handlers),
                    Arc::clone(&dispatcher),
                    cancel.child_token(),
                ))
            })
            .collect::<Vec<_>>();
        info!(workers = workers.len(), "RPC server started");
        Self { workers, cancel }
    }

    /// Number of partition workers.
    #[must_use]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Stop every worker, waiting up to `grace` before aborting stragglers.
    pub async fn shutdown(mut self, grace: Duration) {
        self.cancel.cancel();
        let workers = std::mem::take(&mut self.workers);
        for mut worker in workers {
            if tokio::time::timeout(grace, &mut worker).await.is_err() {
                warn!("RPC worker did not stop in time, aborting");
                worker.abort();
            }
        }
        info!("RPC server stopped");
    }
}

impl Drop for RpcServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl std::fmt::Debug for RpcServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcServer")
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}

async fn run_worker(
    partition: usize,
    mut rx: mpsc::UnboundedReceiver<Request>,
    handlers: Arc<RequestHandlers>,
    dispatcher: Arc<dyn MessageDispatcher>,
    cancel: CancellationToken,
) {
    debug!(partition, "RPC worker started");
    loop {
        let request = tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(request) => request,
                None => break,
            },
        };

        trace!(
            partition,
            correlation_id = %request.correlation_id(),
            action = ?request.action(),
            "Processing request"
        );
        let response = handlers.process(&request).await;

        if let Some(reply_to) = request.reply_to()
            && let Err(e) = dispatcher.dispatch(reply_to, response)
        {
            warn!(partition, reply_to, error = %e, "Failed to deliver response");
        }
    }
    debug!(partition, "RPC worker stopped");
}
