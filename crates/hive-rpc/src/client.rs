//! Client side of the bus.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::body::{Action, Body};
use crate::error::{RpcError, RpcResult};
use crate::matcher::RequestResponseMatcher;
use crate::message::{Request, Response};
use crate::transport::RequestTransport;

/// Issues requests and waits for their correlated responses.
///
/// Owns one reply channel on the transport. A listener task drains that
/// channel into the [`RequestResponseMatcher`].
pub struct RpcClient {
    transport: Arc<dyn RequestTransport>,
    matcher: Arc<RequestResponseMatcher>,
    reply_to: String,
    timeout: Duration,
    listener: JoinHandle<()>,
}

impl RpcClient {
    /// Open `reply_to` on the transport and start the response listener.
    ///
    /// Must be called within a Tokio runtime.
    pub fn connect(
        transport: Arc<dyn RequestTransport>,
        reply_to: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        let reply_to = reply_to.into();
        let matcher = Arc::new(RequestResponseMatcher::new());
        let responses = transport.open_reply_topic(&reply_to);
        let listener = tokio::spawn(listen(responses, Arc::clone(&matcher)));
        debug!(reply_to = %reply_to, "RPC client connected");
        Self {
            transport,
            matcher,
            reply_to,
            timeout,
            listener,
        }
    }

    /// [`connect`](Self::connect), then [`ping`](Self::ping) until the server answers.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoResponse`] if no ping attempt succeeds.
    pub async fn start(
        transport: Arc<dyn RequestTransport>,
        reply_to: impl Into<String>,
        timeout: Duration,
        ping_attempts: u32,
        ping_timeout: Duration,
    ) -> RpcResult<Self> {
        let client = Self::connect(transport, reply_to, timeout);
        client.ping(ping_attempts, ping_timeout).await?;
        Ok(client)
    }

    /// Reply channel this client listens on.
    #[must_use]
    pub fn reply_to(&self) -> &str {
        &self.reply_to
    }

    /// Default bound for [`call`](Self::call).
    #[must_use]
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The correlation table.
    #[must_use]
    pub fn matcher(&self) -> &Arc<RequestResponseMatcher> {
        &self.matcher
    }

    /// Send a single-reply request and wait for its response.
    ///
    /// Error responses are returned as `Ok`; use [`Response::into_result`]
    /// to turn them into errors.
    ///
    /// # Errors
    ///
    /// - [`RpcError::MissingBody`] before anything is submitted
    /// - [`RpcError::NoResponse`] when the default timeout elapses
    pub async fn call(&self, request: Request) -> RpcResult<Response> {
        self.call_with_timeout(request, self.timeout).await
    }

    /// [`call`](Self::call) with an explicit bound.
    ///
    /// # Errors
    ///
    /// See [`call`](Self::call).
    pub async fn call_with_timeout(
        &self,
        request: Request,
        timeout: Duration,
    ) -> RpcResult<Response> {
        let request = self.address(request, true)?;
        let correlation_id = request.correlation_id().to_owned();
        let rx = self.matcher.register_single(&correlation_id);

        if let Err(e) = self.transport.submit(request) {
            self.matcher.remove(&correlation_id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(RpcError::ChannelClosed),
            Err(_) => {
                self.matcher.remove(&correlation_id);
                warn!(correlation_id = %correlation_id, ?timeout, "Request timed out");
                Err(RpcError::NoResponse {
                    correlation_id,
                    timeout,
                })
            },
        }
    }

    /// Send a streaming request, wait for its acknowledgement and return the
    /// open stream of later responses.
    ///
    /// # Errors
    ///
    /// - [`RpcError::MissingBody`] before anything is submitted
    /// - [`RpcError::NoResponse`] when no acknowledgement arrives in time
    /// - [`RpcError::Remote`] when the acknowledgement is an error response
    pub async fn subscribe(&self, request: Request) -> RpcResult<(Body, ResponseStream)> {
        let request = self.address(request, false)?;
        let correlation_id = request.correlation_id().to_owned();
        let rx = self.matcher.register_stream(&correlation_id);
        let mut stream = ResponseStream {
            correlation_id: correlation_id.clone(),
            rx,
            early: VecDeque::new(),
            matcher: Arc::clone(&self.matcher),
        };

        self.transport.submit(request)?;

        // Events published on another partition can overtake the ack.
        let deadline = tokio::time::Instant::now()
            .checked_add(self.timeout)
            .unwrap_or_else(tokio::time::Instant::now);
        loop {
            match tokio::time::timeout_at(deadline, stream.rx.recv()).await {
                Ok(Some(response)) if response.body().is_event() => {
                    stream.early.push_back(response);
                },
                Ok(Some(ack)) => return Ok((ack.into_result()?, stream)),
                Ok(None) => return Err(RpcError::ChannelClosed),
                Err(_) => {
                    return Err(RpcError::NoResponse {
                        correlation_id,
                        timeout: self.timeout,
                    });
                },
            }
        }
    }

    /// Send a request without waiting for, or accepting, any response.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::MissingBody`] if the request has no body, or a
    /// transport error if submission fails.
    pub fn push(&self, request: Request) -> RpcResult<()> {
        if request.body().is_none() {
            return Err(RpcError::MissingBody);
        }
        self.transport.submit(request.addressed(None, true))
    }

    /// Probe the server until it answers, up to `attempts` times.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::NoResponse`] if no attempt got a pong.
    pub async fn ping(&self, attempts: u32, timeout: Duration) -> RpcResult<()> {
        for attempt in 1..=attempts {
            let request = Request::builder().body(Body::Ping).build();
            match self.call_with_timeout(request, timeout).await {
                Ok(response) if response.body().action() == Action::Pong => {
                    info!(attempt, "Server answered ping");
                    return Ok(());
                },
                Ok(response) => {
                    warn!(attempt, action = %response.body().action(), "Unexpected ping reply");
                },
                Err(e) => warn!(attempt, error = %e, "Ping failed"),
            }
        }
        Err(RpcError::NoResponse {
            correlation_id: "ping".to_owned(),
            timeout,
        })
    }

    fn address(&self, request: Request, single_reply: bool) -> RpcResult<Request> {
        if request.body().is_none() {
            return Err(RpcError::MissingBody);
        }
        Ok(request.addressed(Some(self.reply_to.clone()), single_reply))
    }
}

impl Drop for RpcClient {
    fn drop(&mut self) {
        self.listener.abort();
        self.transport.close_reply_topic(&self.reply_to);
    }
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("reply_to", &self.reply_to)
            .field("timeout", &self.timeout)
            .field("pending", &self.matcher.pending_count())
            .finish_non_exhaustive()
    }
}

async fn listen(
    mut responses: mpsc::UnboundedReceiver<Response>,
    matcher: Arc<RequestResponseMatcher>,
) {
    while let Some(response) = responses.recv().await {
        matcher.offer(response);
    }
    debug!("Reply topic closed, response listener exiting");
}

/// Responses to one streaming request. Dropping it releases the correlation entry.
#[derive(Debug)]
pub struct ResponseStream {
    correlation_id: String,
    rx: mpsc::UnboundedReceiver<Response>,
    early: VecDeque<Response>,
    matcher: Arc<RequestResponseMatcher>,
}

impl ResponseStream {
    /// Correlation id shared by every response on this stream.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Next response, or `None` once the stream is closed.
    pub async fn recv(&mut self) -> Option<Response> {
        if let Some(response) = self.early.pop_front() {
            return Some(response);
        }
        self.rx.recv().await
    }
}

impl Drop for ResponseStream {
    fn drop(&mut self) {
        self.matcher.remove(&self.correlation_id);
    }
}
