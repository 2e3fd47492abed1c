use std::sync::Arc;

use async_trait::async_trait;
use hive_core::HiveResult;
use hive_rpc::body::DeviceDeleteResponse;
use hive_rpc::{Body, Request, RequestHandler};
use tracing::{Instrument, info};

use super::{HandlerContext, body_of, request_span, unexpected};

/// Device lifecycle: purges subscriptions of a removed device.
#[derive(Debug)]
pub struct DeviceHandler {
    ctx: Arc<HandlerContext>,
}

impl DeviceHandler {
    /// Create a handler over shared state.
    #[must_use]
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }
}

#[async_trait]
impl RequestHandler for DeviceHandler {
    async fn handle(&self, request: &Request) -> HiveResult<Body> {
        let body = body_of(request)?;
        let Body::DeviceDelete(delete) = body else {
            return Err(unexpected(body));
        };
        let span = request_span(request, Some(&delete.device_id));
        async {
            let removed = self.ctx.bus.unregister_device(&delete.device_id);
            info!(removed, "Purged device subscriptions");
            Ok(Body::DeviceDeleteResponse(DeviceDeleteResponse { removed }))
        }
        .instrument(span)
        .await
    }
}
