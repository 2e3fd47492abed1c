//! Long-poll transports used by the polling back end.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use hive_core::{DeviceCommand, DeviceEvent, DeviceNotification, DeviceScope, EventKind};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};
use url::Url;

use crate::error::{SubscriptionError, SubscriptionResult};
use crate::filter::SubscriptionKey;

/// Extra time allowed on top of the server-side wait before an HTTP poll is abandoned.
const HTTP_SLACK: Duration = Duration::from_secs(10);

/// One long-poll call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollRequest {
    /// Commands or notifications.
    pub kind: EventKind,
    /// Device polled, or every device.
    pub device: DeviceScope,
    /// Names polled. Empty means every name.
    pub names: BTreeSet<String>,
    /// Return only items strictly newer than this.
    pub since: Option<DateTime<Utc>>,
    /// How long the server may hold the call open.
    pub wait: Duration,
}

impl PollRequest {
    /// Request for `key` starting after `since`.
    #[must_use]
    pub fn for_key(key: &SubscriptionKey, since: Option<DateTime<Utc>>, wait: Duration) -> Self {
        Self {
            kind: key.kind,
            device: key.device.clone(),
            names: key.names.clone(),
            since,
            wait,
        }
    }
}

/// Something that can answer long-poll calls.
///
/// Implementations should return early with [`SubscriptionError::Cancelled`]
/// once `cancel` fires.
#[async_trait]
pub trait PollTransport: Send + Sync {
    /// Wait for items matching `request`, or return empty after the wait elapses.
    async fn poll(
        &self,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> SubscriptionResult<Vec<DeviceEvent>>;
}

/// Polls the REST API's `/device/.../poll` endpoints.
#[derive(Debug, Clone)]
pub struct RestPollTransport {
    client: Client,
    base: Url,
    token: Option<String>,
}

impl RestPollTransport {
    /// Transport rooted at `base`, e.g. `http://localhost/api/rest/`.
    ///
    /// # Errors
    ///
    /// Returns an error if `base` is not a valid URL.
    pub fn new(base: &str) -> SubscriptionResult<Self> {
        Ok(Self {
            client: Client::new(),
            base: Url::parse(base)?,
            token: None,
        })
    }

    /// Send `token` as a bearer credential on every call.
    #[must_use]
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Full URL for a poll call, query included.
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL cannot carry a path.
    pub fn poll_url(&self, request: &PollRequest) -> SubscriptionResult<Url> {
        let segment = match request.kind {
            EventKind::Notification => "notification",
            EventKind::Command | EventKind::CommandUpdate => "command",
        };
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|()| {
                SubscriptionError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase)
            })?;
            segments.pop_if_empty().push("device");
            if let Some(device_id) = request.device.device_id() {
                segments.push(device_id);
            }
            segments.push(segment).push("poll");
        }
        {
            let mut query = url.query_pairs_mut();
            if !request.names.is_empty() {
                let names: Vec<&str> = request.names.iter().map(String::as_str).collect();
                query.append_pair("names", &names.join(","));
            }
            if let Some(since) = request.since {
                query.append_pair(
                    "timestamp",
                    &since.to_rfc3339_opts(SecondsFormat::Micros, true),
                );
            }
            query.append_pair("waitTimeout", &request.wait.as_secs().to_string());
        }
        Ok(url)
    }

    async fn fetch<T: DeserializeOwned>(&self, url: Url, wait: Duration) -> SubscriptionResult<Vec<T>> {
        let mut call = self.client.get(url).timeout(wait.saturating_add(HTTP_SLACK));
        if let Some(token) = &self.token {
            call = call.bearer_auth(token);
        }
        let response = call.send().await?;
        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            return Ok(Vec::new());
        }
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            debug!(%status, "Poll rejected");
            return Err(SubscriptionError::Status {
                code: status.as_u16(),
                message,
            });
        }
        Ok(response.json().await?)
    }
}

#[async_trait]
impl PollTransport for RestPollTransport {
    async fn poll(
        &self,
        request: &PollRequest,
        cancel: &CancellationToken,
    ) -> SubscriptionResult<Vec<DeviceEvent>> {
        let url = self.poll_url(request)?;
        trace!(%url, "Polling");
        let call = async {
            Ok::<_, SubscriptionError>(match request.kind {
                EventKind::Notification => self
                    .fetch::<DeviceNotification>(url, request.wait)
                    .await?
                    .into_iter()
                    .map(DeviceEvent::Notification)
                    .collect(),
                EventKind::Command | EventKind::CommandUpdate => self
                    .fetch::<DeviceCommand>(url, request.wait)
                    .await?
                    .into_iter()
                    .map(DeviceEvent::Command)
                    .collect(),
            })
        };
        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(SubscriptionError::Cancelled),
            result = call => result,
        }
    }
}
