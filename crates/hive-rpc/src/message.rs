//! Request and response envelopes.

use hive_core::{ErrorFamily, HiveError};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::body::{Action, Body, ErrorBody};
use crate::error::{RpcError, RpcResult};

/// A unit of work on the bus. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    correlation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    partition_key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reply_to: Option<String>,
    single_reply: bool,
    #[serde(default)]
    body: Option<Body>,
}

impl Request {
    /// Start building a request.
    #[must_use]
    pub fn builder() -> RequestBuilder {
        RequestBuilder::default()
    }

    /// Correlation id linking this request to its responses.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Routing key for ordered processing.
    #[must_use]
    pub fn partition_key(&self) -> Option<&str> {
        self.partition_key.as_deref()
    }

    /// Reply channel, if the sender expects responses.
    #[must_use]
    pub fn reply_to(&self) -> Option<&str> {
        self.reply_to.as_deref()
    }

    /// Whether the response channel closes after one response.
    #[must_use]
    pub fn is_single_reply(&self) -> bool {
        self.single_reply
    }

    /// Payload.
    #[must_use]
    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    /// Discriminator of the payload.
    #[must_use]
    pub fn action(&self) -> Option<Action> {
        self.body.as_ref().map(Body::action)
    }

    /// Rebuild with a reply channel and reply mode. Used by the client at submission.
    pub(crate) fn addressed(mut self, reply_to: Option<String>, single_reply: bool) -> Self {
        self.reply_to = reply_to;
        self.single_reply = single_reply;
        self
    }
}

/// Builder for [`Request`].
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    correlation_id: Option<String>,
    partition_key: Option<String>,
    single_reply: bool,
    body: Option<Body>,
}

impl Default for RequestBuilder {
    fn default() -> Self {
        Self {
            correlation_id: None,
            partition_key: None,
            single_reply: true,
            body: None,
        }
    }
}

impl RequestBuilder {
    /// Set the payload.
    #[must_use]
    pub fn body(mut self, body: Body) -> Self {
        self.body = Some(body);
        self
    }

    /// Pin the request to a partition, typically by device id.
    #[must_use]
    pub fn partition_key(mut self, key: impl Into<String>) -> Self {
        self.partition_key = Some(key.into());
        self
    }

    /// Use a caller-chosen correlation id instead of a generated one.
    #[must_use]
    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Choose between one terminating response and an open stream.
    #[must_use]
    pub fn single_reply(mut self, single: bool) -> Self {
        self.single_reply = single;
        self
    }

    /// Finish the request, generating a correlation id if none was given.
    #[must_use]
    pub fn build(self) -> Request {
        Request {
            correlation_id: self
                .correlation_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            partition_key: self.partition_key,
            reply_to: None,
            single_reply: self.single_reply,
            body: self.body,
        }
    }
}

/// Counterpart of a [`Request`], matched by correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    correlation_id: String,
    body: Body,
    last: bool,
    failed: bool,
}

impl Response {
    /// A terminating reply.
    #[must_use]
    pub fn reply(correlation_id: impl Into<String>, body: Body) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            body,
            last: true,
            failed: false,
        }
    }

    /// A reply that keeps the stream open.
    #[must_use]
    pub fn stream(correlation_id: impl Into<String>, body: Body) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            body,
            last: false,
            failed: false,
        }
    }

    /// A failed, terminating reply.
    #[must_use]
    pub fn error(correlation_id: impl Into<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            body: Body::Error(ErrorBody {
                code,
                message: message.into(),
            }),
            last: true,
            failed: true,
        }
    }

    /// A failed reply built from a domain error.
    #[must_use]
    pub fn from_error(correlation_id: impl Into<String>, err: &HiveError) -> Self {
        Self::error(correlation_id, err.code(), err.to_string())
    }

    /// Override the terminating flag.
    #[must_use]
    pub fn with_last(mut self, last: bool) -> Self {
        self.last = last;
        self
    }

    /// Correlation id.
    #[must_use]
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    /// Payload.
    #[must_use]
    pub fn body(&self) -> &Body {
        &self.body
    }

    /// Whether no further responses follow.
    #[must_use]
    pub fn is_last(&self) -> bool {
        self.last
    }

    /// Whether this reports a failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Take the payload, turning error responses into [`RpcError::Remote`].
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::Remote`] when the response is failed.
    pub fn into_result(self) -> RpcResult<Body> {
        if !self.failed {
            return Ok(self.body);
        }
        match self.body {
            Body::Error(ErrorBody { code, message }) => Err(RpcError::Remote {
                family: ErrorFamily::from_code(code),
                code,
                message,
            }),
            other => Err(RpcError::Remote {
                family: ErrorFamily::Server,
                code: hive_core::codes::INTERNAL,
                message: format!("failed response with {} body", other.action()),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_generates_correlation_id() {
        let a = Request::builder().body(Body::Ping).build();
        let b = Request::builder().body(Body::Ping).build();
        assert!(!a.correlation_id().is_empty());
        assert_ne!(a.correlation_id(), b.correlation_id());
        assert!(a.is_single_reply());
        assert!(a.reply_to().is_none());
    }

    #[test]
    fn test_builder_keeps_explicit_fields() {
        let req = Request::builder()
            .correlation_id("c-1")
            .partition_key("d1")
            .single_reply(false)
            .build();
        assert_eq!(req.correlation_id(), "c-1");
        assert_eq!(req.partition_key(), Some("d1"));
        assert!(!req.is_single_reply());
        assert!(req.body().is_none());
        assert!(req.action().is_none());
    }

    #[test]
    fn test_error_response_into_result() {
        let resp = Response::error("c", 404, "Device not found");
        assert!(resp.is_failed());
        assert!(resp.is_last());
        match resp.into_result() {
            Err(RpcError::Remote {
                family,
                code,
                message,
            }) => {
                assert_eq!(family, ErrorFamily::Client);
                assert_eq!(code, 404);
                assert_eq!(message, "Device not found");
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_from_error_uses_family_code() {
        let resp = Response::from_error("c", &HiveError::Validation("Device id is null".into()));
        match resp.body() {
            Body::Error(e) => assert_eq!(e.code, 400),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_stream_response_is_not_last() {
        let resp = Response::stream("c", Body::Pong);
        assert!(!resp.is_last());
        assert!(resp.with_last(true).is_last());
    }
}
