use std::sync::Arc;

use async_trait::async_trait;
use hive_core::{DeviceEvent, DeviceScope, EventKind, HiveResult, StoreError, StoredEntity};
use hive_events::{Subscriber, Subscription};
use hive_rpc::body::{
    CommandInsertRequest, CommandInsertResponse, CommandSearchResponse, CommandSubscribeResponse,
    CommandUpdateRequest, CommandUpdateResponse, CommandUpdateSubscribeRequest,
    CommandUpdateSubscribeResponse, SubscribeRequest, UnsubscribeResponse,
};
use hive_rpc::{Body, Request, RequestHandler};
use tracing::{Instrument, debug};

use super::{HandlerContext, body_of, request_span, unexpected};

/// Command insert, search, update and the two subscription flavors.
#[derive(Debug)]
pub struct CommandHandler {
    ctx: Arc<HandlerContext>,
}

impl CommandHandler {
    /// Create a handler over shared state.
    #[must_use]
    pub fn new(ctx: Arc<HandlerContext>) -> Self {
        Self { ctx }
    }

    async fn insert(&self, body: &CommandInsertRequest) -> HiveResult<Body> {
        let mut command = body.command.clone();
        (command.id, command.timestamp) = self.ctx.stamp();
        command.is_updated = false;

        self.ctx
            .store
            .put(StoredEntity::Command(command.clone()))
            .await?;
        let delivered = self.ctx.bus.publish(&DeviceEvent::Command(command.clone()));
        debug!(id = command.id, name = %command.command, delivered, "Command inserted");
        Ok(Body::CommandInsertResponse(CommandInsertResponse { command }))
    }

    /// Merge the delta and wake waiters on this command.
    ///
    /// Only command-update rows match the published event, so regular
    /// command subscribers never see it.
    async fn update(&self, body: &CommandUpdateRequest) -> HiveResult<Body> {
        let update = &body.update;
        let command = self
            .ctx
            .store
            .merge(update)
            .await?
            .ok_or_else(|| StoreError::NotFound {
                kind: EventKind::Command,
                id: update.id,
                device_id: update.device_id.clone(),
            })?;
        let delivered = self
            .ctx
            .bus
            .publish(&DeviceEvent::CommandUpdate(command.clone()));
        debug!(id = command.id, delivered, "Command updated");
        Ok(Body::CommandUpdateResponse(CommandUpdateResponse { command }))
    }

    async fn subscribe(&self, request: &Request, body: &SubscribeRequest) -> HiveResult<Body> {
        let (subscription_id, backlog) =
            self.ctx.subscribe(request, EventKind::Command, body).await?;
        let commands = backlog
            .into_iter()
            .filter_map(StoredEntity::into_command)
            .collect();
        Ok(Body::CommandSubscribeResponse(CommandSubscribeResponse {
            subscription_id,
            commands,
        }))
    }

    /// Register a waiter for one command's update.
    ///
    /// The waiter is registered before the store is consulted, so an update
    /// landing in between is still delivered.
    async fn update_subscribe(
        &self,
        request: &Request,
        body: &CommandUpdateSubscribeRequest,
    ) -> HiveResult<Body> {
        let subscriber = Subscriber::from_parts(
            Some(body.subscription_id),
            request.reply_to(),
            request.correlation_id(),
        )?;
        let row = Subscription::new(
            EventKind::CommandUpdate,
            DeviceScope::device(&body.device_id),
            Some(body.command_id.to_string()),
        );
        self.ctx.bus.subscribe(subscriber.clone(), row);

        let stored = match self
            .ctx
            .store
            .find(body.command_id, &body.device_id, EventKind::Command)
            .await
        {
            Ok(found) => found.and_then(StoredEntity::into_command),
            Err(e) => {
                self.ctx.bus.unsubscribe(&subscriber.key());
                return Err(e.into());
            },
        };
        let Some(command) = stored else {
            self.ctx.bus.unsubscribe(&subscriber.key());
            return Err(StoreError::NotFound {
                kind: EventKind::Command,
                id: body.command_id,
                device_id: body.device_id.clone(),
            }
            .into());
        };

        Ok(Body::CommandUpdateSubscribeResponse(
            CommandUpdateSubscribeResponse {
                subscription_id: body.subscription_id,
                command: command.is_updated.then_some(command),
            },
        ))
    }

    async fn dispatch(&self, request: &Request) -> HiveResult<Body> {
        match body_of(request)? {
            Body::CommandInsert(body) => self.insert(body).await,
            Body::CommandSearch(body) => {
                let found = self
                    .ctx
                    .store
                    .search(EventKind::Command, &self.ctx.bounded(body.query.clone()))
                    .await?;
                Ok(Body::CommandSearchResponse(CommandSearchResponse {
                    commands: found
                        .into_iter()
                        .filter_map(StoredEntity::into_command)
                        .collect(),
                }))
            },
            Body::CommandUpdate(body) => self.update(body).await,
            Body::CommandSubscribe(body) => self.subscribe(request, body).await,
            Body::CommandUnsubscribe(body) => {
                let removed = self.ctx.unregister(request, body)?;
                Ok(Body::CommandUnsubscribeResponse(UnsubscribeResponse {
                    subscription_ids: removed.into_iter().map(|key| key.id).collect(),
                }))
            },
            Body::CommandUpdateSubscribe(body) => self.update_subscribe(request, body).await,
            other => Err(unexpected(other)),
        }
    }
}

#[async_trait]
impl RequestHandler for CommandHandler {
    async fn handle(&self, request: &Request) -> HiveResult<Body> {
        let device_id = match request.body() {
            Some(Body::CommandInsert(b)) => Some(b.command.device_id.as_str()),
            Some(Body::CommandUpdate(b)) => Some(b.update.device_id.as_str()),
            Some(Body::CommandUpdateSubscribe(b)) => Some(b.device_id.as_str()),
            _ => None,
        };
        let span = request_span(request, device_id);
        self.dispatch(request).instrument(span).await
    }
}
