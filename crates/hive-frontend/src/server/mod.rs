//! Persistent-socket server speaking the client wire protocol.

mod protocol;
mod session;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use hive_core::Authenticator;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::FrontendResult;
use crate::service::HiveService;

pub use session::API_VERSION;

/// Accepts `WebSocket` connections and serves one session per connection.
///
/// Every session shares the same [`HiveService`], so subscription ids are
/// unique across connections.
pub struct SocketServer {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    acceptor: JoinHandle<JoinSet<()>>,
}

impl SocketServer {
    /// Bind `addr` and start accepting.
    ///
    /// # Errors
    ///
    /// Returns [`FrontendError::Io`](crate::FrontendError::Io) if the address cannot be bound.
    pub async fn bind(
        addr: &str,
        service: Arc<HiveService>,
        auth: Arc<dyn Authenticator>,
    ) -> FrontendResult<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let shutdown = CancellationToken::new();
        let acceptor = tokio::spawn(accept_loop(listener, service, auth, shutdown.clone()));
        info!(%local_addr, "Socket server listening");
        Ok(Self {
            local_addr,
            shutdown,
            acceptor,
        })
    }

    /// Address actually bound, useful with port `0`.
    #[must_use]
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// `ws://` URL of this server.
    #[must_use]
    pub fn url(&self) -> String {
        format!("ws://{}/", self.local_addr)
    }

    /// Stop accepting, end every session and wait up to `grace` for them to
    /// release their subscriptions.
    pub async fn shutdown(self, grace: Duration) {
        self.shutdown.cancel();
        let Ok(mut sessions) = self.acceptor.await else {
            return;
        };
        let drained = tokio::time::timeout(grace, async {
            while sessions.join_next().await.is_some() {}
        })
        .await;
        if drained.is_err() {
            warn!(remaining = sessions.len(), "Sessions did not close in time, aborting");
            sessions.shutdown().await;
        }
        info!("Socket server stopped");
    }
}

impl std::fmt::Debug for SocketServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SocketServer")
            .field("local_addr", &self.local_addr)
            .finish_non_exhaustive()
    }
}

async fn accept_loop(
    listener: TcpListener,
    service: Arc<HiveService>,
    auth: Arc<dyn Authenticator>,
    shutdown: CancellationToken,
) -> JoinSet<()> {
    let mut sessions = JoinSet::new();
    loop {
        let accepted = tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            accepted = listener.accept() => accepted,
        };
        match accepted {
            Ok((stream, peer)) => {
                tracing::debug!(%peer, "Connection accepted");
                sessions.spawn(session::run(
                    stream,
                    Arc::clone(&service),
                    Arc::clone(&auth),
                    shutdown.child_token(),
                ));
            },
            Err(e) => warn!(error = %e, "Failed to accept connection"),
        }
        // reap finished sessions
        while sessions.try_join_next().is_some() {}
    }
    sessions
}
