//! Request handlers, one group per entity.

mod command;
mod device;
mod notification;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use hive_core::{
    EventKind, HiveError, HiveResult, IdGenerator, KeyedStore, SearchQuery, StoredEntity,
    SubscriptionId,
};
use hive_events::{EventBus, Filter, Subscriber, SubscriberKey};
use hive_rpc::body::{SubscribeRequest, UnsubscribeRequest};
use hive_rpc::{Action, Body, Request, RequestHandlers};
use hive_telemetry::RequestContext;
use tracing::{Span, warn};

use crate::cache::MonotonicClock;

pub use command::CommandHandler;
pub use device::DeviceHandler;
pub use notification::NotificationHandler;

/// State shared by every handler.
pub struct HandlerContext {
    /// Where commands and notifications live.
    pub store: Arc<dyn KeyedStore>,
    /// Where inserts are published.
    pub bus: Arc<EventBus>,
    /// Entity ids.
    pub ids: IdGenerator,
    /// Insert timestamps.
    pub clock: MonotonicClock,
    /// Cap on search and subscribe backlog sizes.
    pub search_limit: usize,
}

impl HandlerContext {
    /// Create a context.
    #[must_use]
    pub fn new(store: Arc<dyn KeyedStore>, bus: Arc<EventBus>, search_limit: usize) -> Self {
        Self {
            store,
            bus,
            ids: IdGenerator::default(),
            clock: MonotonicClock::new(),
            search_limit,
        }
    }

    /// Cap a query at the configured limit.
    fn bounded(&self, mut query: SearchQuery) -> SearchQuery {
        let limit = query.limit.map_or(self.search_limit, |l| l.min(self.search_limit));
        query.limit = Some(limit);
        query
    }

    /// Register the rows of a subscribe request and fetch its backlog.
    ///
    /// The rows are removed again if the backlog cannot be read.
    async fn subscribe(
        &self,
        request: &Request,
        kind: EventKind,
        body: &SubscribeRequest,
    ) -> HiveResult<(SubscriptionId, Vec<StoredEntity>)> {
        let subscriber = Subscriber::from_parts(
            body.subscription_id,
            request.reply_to(),
            request.correlation_id(),
        )?;
        let filter = Filter {
            device: body.device.clone(),
            names: body.names.clone(),
            since: body.timestamp,
        };
        let rows = self.bus.subscribe_filter(&subscriber, kind, &filter)?;
        match self.backlog(kind, &filter).await {
            Ok(backlog) => Ok((subscriber.id, backlog)),
            Err(e) => {
                let key = subscriber.key();
                for row in &rows {
                    self.bus.unsubscribe_subscription(&key, row);
                }
                warn!(
                    subscription_id = %subscriber.id,
                    error = %e,
                    "Backlog failed, subscription dropped"
                );
                Err(e)
            },
        }
    }

    /// Stored items of `kind` newer than the filter's cursor, if it has one.
    async fn backlog(&self, kind: EventKind, filter: &Filter) -> HiveResult<Vec<StoredEntity>> {
        let Some(since) = filter.since else {
            return Ok(Vec::new());
        };
        let query = SearchQuery {
            device_ids: filter
                .device
                .as_ref()
                .and_then(|d| d.device_id())
                .map(|d| [d.to_owned()].into()),
            names: filter.names.clone().filter(|n| !n.is_empty()),
            since: Some(since),
            ..SearchQuery::default()
        };
        Ok(self.store.search(kind, &self.bounded(query)).await?)
    }

    /// Drop subscriptions named in an unsubscribe request. Unknown ids are skipped.
    fn unregister(
        &self,
        request: &Request,
        body: &UnsubscribeRequest,
    ) -> HiveResult<Vec<SubscriberKey>> {
        let reply_to = request
            .reply_to()
            .ok_or_else(|| HiveError::Validation("reply channel not provided".to_owned()))?;
        let mut removed = Vec::new();
        for id in &body.subscription_ids {
            let key = SubscriberKey::new(reply_to, *id);
            let rows = match &body.names {
                Some(names) if !names.is_empty() => {
                    self.bus.unsubscribe_names(&key, names.iter().map(String::as_str))
                },
                _ => self.bus.unsubscribe(&key),
            };
            if rows > 0 {
                removed.push(key);
            }
        }
        Ok(removed)
    }

    fn stamp(&self) -> (u64, DateTime<Utc>) {
        (self.ids.next_id(), self.clock.now())
    }
}

impl std::fmt::Debug for HandlerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerContext")
            .field("bus", &self.bus)
            .field("search_limit", &self.search_limit)
            .finish_non_exhaustive()
    }
}

/// Span for one handled request.
fn request_span(request: &Request, device_id: Option<&str>) -> Span {
    let mut ctx = RequestContext::with_correlation("backend", request.correlation_id());
    if let Some(action) = request.action() {
        ctx = ctx.with_action(action.to_string());
    }
    if let Some(device_id) = device_id {
        ctx = ctx.with_device(device_id);
    }
    ctx.span()
}

fn body_of(request: &Request) -> HiveResult<&Body> {
    request
        .body()
        .ok_or_else(|| HiveError::Validation("Request body is null".to_owned()))
}

fn unexpected(body: &Body) -> HiveError {
    HiveError::Server {
        code: hive_core::codes::INTERNAL,
        message: format!("handler cannot process {}", body.action()),
    }
}

/// Registry with every backend action wired to its handler.
#[must_use]
pub fn request_handlers(ctx: &Arc<HandlerContext>) -> RequestHandlers {
    let notifications = Arc::new(NotificationHandler::new(Arc::clone(ctx)));
    let commands = Arc::new(CommandHandler::new(Arc::clone(ctx)));
    let devices = Arc::new(DeviceHandler::new(Arc::clone(ctx)));

    RequestHandlers::new()
        .with(Action::NotificationInsert, notifications.clone())
        .with(Action::NotificationSearch, notifications.clone())
        .with(Action::NotificationSubscribe, notifications.clone())
        .with(Action::NotificationUnsubscribe, notifications)
        .with(Action::CommandInsert, commands.clone())
        .with(Action::CommandSearch, commands.clone())
        .with(Action::CommandUpdate, commands.clone())
        .with(Action::CommandSubscribe, commands.clone())
        .with(Action::CommandUnsubscribe, commands.clone())
        .with(Action::CommandUpdateSubscribe, commands)
        .with(Action::DeviceDelete, devices)
}
