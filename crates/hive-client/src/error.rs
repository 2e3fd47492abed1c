//! Client error types.

use std::time::Duration;

use hive_core::ErrorFamily;
use thiserror::Error;

/// Errors from the persistent-socket connector.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// No correlated reply arrived in time, or the connection dropped while waiting.
    #[error("no response to request {request_id} within {timeout:?}")]
    NoResponse {
        /// Correlation id of the unanswered request.
        request_id: String,
        /// The bound that elapsed.
        timeout: Duration,
    },

    /// The server rejected the request (4xx).
    #[error("request rejected ({code}): {message}")]
    Client {
        /// Status code.
        code: u16,
        /// Server-provided reason.
        message: String,
    },

    /// The server failed to process the request (5xx).
    #[error("server error ({code}): {message}")]
    Server {
        /// Status code.
        code: u16,
        /// Server-provided reason.
        message: String,
    },

    /// There is no live connection.
    #[error("not connected")]
    NotConnected,

    /// The connector was closed and cannot be reused.
    #[error("connector closed")]
    Closed,

    /// `WebSocket` transport error.
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// JSON encoding or decoding failed.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A successful reply lacked the requested field.
    #[error("response has no '{0}' field")]
    MissingField(String),

    /// Outgoing messages must be JSON objects.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for ConnectorError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl ConnectorError {
    /// Business error from a status code and reason.
    #[must_use]
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorFamily::from_code(code) {
            ErrorFamily::Client => Self::Client { code, message },
            ErrorFamily::Server => Self::Server { code, message },
        }
    }

    /// Whether this is a transport-level failure that a reconnect may cure.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::NoResponse { .. } | Self::NotConnected | Self::WebSocket(_)
        )
    }
}

/// Result type for connector operations.
pub type ConnectorResult<T> = Result<T, ConnectorError>;

/// Errors from the subscription managers and poll transports.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success HTTP status.
    #[error("poll failed with status {code}: {message}")]
    Status {
        /// HTTP status code.
        code: u16,
        /// Response body or reason.
        message: String,
    },

    /// Invalid base URL.
    #[error("invalid URL: {0}")]
    Url(#[from] url::ParseError),

    /// Socket connector failure.
    #[error(transparent)]
    Connector(#[from] ConnectorError),

    /// The operation was cancelled by unsubscribe or shutdown.
    #[error("cancelled")]
    Cancelled,

    /// The manager has been shut down.
    #[error("subscription manager is shut down")]
    ShutDown,
}

/// Result type for subscription operations.
pub type SubscriptionResult<T> = Result<T, SubscriptionError>;
