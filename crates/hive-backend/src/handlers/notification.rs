use std::sync::Arc;

use async_trait::async_trait;
use hive_core::{DeviceEvent, EventKind, HiveResult, StoredEntity};
use hive_rpc::body::{
    NotificationInsertRequest, NotificationInsertResponse, NotificationSearchResponse,
    NotificationSubscribeResponse, SubscribeRequest, UnsubscribeResponse,
};
use hive_rpc::{Body, Request, RequestHandler};
use tracing::{Instrument, debug};

use super::{HandlerContext, body_of, request_span, unexpected};

/// Notification insert, search, subscribe and unsubscribe.
#[derive(Debug)]
pub struct NotificationHandler {
    ctx: Arc<HandlerContext>,
}

impl NotificationHandler {
    /// Create a handler over shared state.
    #[must_use]
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    async fn insert(&self, body: &NotificationInsertRequest) -> HiveResult<Body> {
        let mut notification = body.notification.clone();
        (notification.id, notification.timestamp) = self.ctx.stamp();

        self.ctx
            .store
            .put(StoredEntity::Notification(notification.clone()))
            .await?;
        let delivered = self
            .ctx
            .bus
            .publish(&DeviceEvent::Notification(notification.clone()));
        debug!(
            id = notification.id,
            name = %notification.notification,
            delivered,
            "Notification inserted"
        );
        Ok(Body::NotificationInsertResponse(NotificationInsertResponse { notification }))
    }

    async fn subscribe(&self, request: &Request, body: &SubscribeRequest) -> HiveResult<Body> {
        let (subscription_id, backlog) =
            self.ctx.subscribe(request, EventKind::Notification, body).await?;
        let notifications = backlog
            .into_iter()
            .filter_map(StoredEntity::into_notification)
            .collect();
        Ok(Body::NotificationSubscribeResponse(NotificationSubscribeResponse {
            subscription_id,
            notifications,
        }))
    }

    async fn dispatch(&self, request: &Request) -> HiveResult<Body> {
        match body_of(request)? {
            Body::NotificationInsert(body) => self.insert(body).await,
            Body::NotificationSearch(body) => {
                let found = self
                    .ctx
                    .store
                    .search(EventKind::Notification, &self.ctx.bounded(body.query.clone()))
                    .await?;
                Ok(Body::NotificationSearchResponse(NotificationSearchResponse {
                    notifications: found
                        .into_iter()
                        .filter_map(StoredEntity::into_notification)
                        .collect(),
                }))
            },
            Body::NotificationSubscribe(body) => self.subscribe(request, body).await,
            Body::NotificationUnsubscribe(body) => {
                let removed = self.ctx.unregister(request, body)?;
                Ok(Body::NotificationUnsubscribeResponse(UnsubscribeResponse {
                    subscription_ids: removed.into_iter().map(|key| key.id).collect(),
                }))
            },
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl RequestHandler for NotificationHandler {
    async fn handle(&self, request: &Request) -> HiveResult<Body> {
        let device_id = match request.body() {
            Some(Body::NotificationInsert(b)) => Some(b.notification.device_id.as_str()),
            _ => None,
        };
        let span = request_span(request, device_id);
        self.dispatch(request).instrument(span).await
    }
}
