//! Shared harness for integration tests.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hive_backend::Backend;
use hive_client::{PollRequest, PollTransport, SubscriptionError, SubscriptionResult};
use hive_config::HiveConfig;
use hive_core::{DeviceEvent, EventKind, HivePrincipal};
use hive_frontend::{EventFilter, FrontendError, HiveService, SocketServer};
use hive_test::prelude::*;
use tokio_util::sync::CancellationToken;

/// Token accepted by every platform's socket server.
#[allow(dead_code)]
pub const ADMIN_TOKEN: &str = "admin-token";

/// Backend, frontend service and socket server on an ephemeral port.
#[allow(dead_code)]
pub struct Platform {
    /// Handlers, bus and store.
    pub backend: Backend,
    /// Client-facing operations.
    pub service: Arc<HiveService>,
    /// `WebSocket` endpoint.
    pub server: SocketServer,
}

#[allow(dead_code)]
impl Platform {
    /// Start everything with default configuration.
    pub async fn start() -> Self {
        init_test_logging();
        let backend = Backend::start(&HiveConfig::default()).expect("backend starts");
        let service = Arc::new(
            HiveService::start(backend.broker(), &HiveConfig::default().rpc)
                .await
                .expect("backend answers pings"),
        );
        let auth = StaticAuthenticator::new()
            .with_token(ADMIN_TOKEN, HivePrincipal::unrestricted("admin"));
        let server = SocketServer::bind("127.0.0.1:0", Arc::clone(&service), Arc::new(auth))
            .await
            .expect("ephemeral port binds");
        Self {
            backend,
            service,
            server,
        }
    }

    /// Poll transport answering from this platform's service.
    pub fn poll_transport(&self) -> Arc<ServicePollTransport> {
        Arc::new(ServicePollTransport {
            service: Arc::clone(&self.service),
        })
    }

    /// Stop the socket server and the backend workers.
    pub async fn stop(self) {
        self.server.shutdown(Duration::from_secs(2)).await;
        self.service.unsubscribe_all().await;
        self.backend.shutdown(Duration::from_secs(2)).await;
    }
}

/// Long-poll transport that calls the frontend service in-process,
/// standing in for the REST poll endpoints.
pub struct ServicePollTransport {
    service: Arc<HiveService>,
}

#[async_trait]
impl PollTransport for ServicePollTransport {
    async fn poll(
        &self,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> SubscriptionResult<Vec<DeviceEvent>> {
        if cancel.is_cancelled() {
            return Err(SubscriptionError::Cancelled);
        }
        let filter = EventFilter {
            device_ids: request.device.device_id().map(|d| vec![d.to_owned()]),
            names: Some(request.names.clone()),
            since: request.since,
        };
        let events = match request.kind {
            EventKind::Notification => self
                .service
                .poll_notifications(&filter, request.wait, cancel)
                .await
                .map(|found| found.into_iter().map(DeviceEvent::Notification).collect()),
            EventKind::Command | EventKind::CommandUpdate => self
                .service
                .poll_commands(&filter, request.wait, cancel)
                .await
                .map(|found| found.into_iter().map(DeviceEvent::Command).collect()),
        }
        .map_err(status)?;
        if cancel.is_cancelled() {
            return Err(SubscriptionError::Cancelled);
        }
        Ok(events)
    }
}

fn status(err: FrontendError) -> SubscriptionError {
    SubscriptionError::Status {
        code: err.code(),
        message: err.reason(),
    }
}
