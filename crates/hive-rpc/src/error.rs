use std::time::Duration;

use hive_core::ErrorFamily;
use thiserror::Error;

use crate::body::Action;

/// Request/response bus errors.
#[derive(Debug, Error)]
pub enum RpcError {
    /// The request carried no body. Rejected before submission.
    #[error("Request body is null")]
    MissingBody,

    /// No response arrived within the bound.
    #[error("no response for request {correlation_id} within {timeout:?}")]
    NoResponse {
        /// Correlation id of the abandoned request.
        correlation_id: String,
        /// Bound that elapsed.
        timeout: Duration,
    },

    /// A transport channel closed underneath the caller.
    #[error("transport channel closed")]
    ChannelClosed,

    /// The named reply channel does not exist.
    #[error("reply topic '{0}' is not open")]
    UnknownReplyTopic(String),

    /// The remote side answered with an error response.
    #[error("{family:?} error {code}: {message}")]
    Remote {
        /// Whether the client or the server is at fault.
        family: ErrorFamily,
        /// Status code.
        code: u16,
        /// Reason reported by the remote side.
        message: String,
    },

    /// The remote side answered with a payload of the wrong kind.
    #[error("unexpected response body: expected {expected}, got {actual}")]
    UnexpectedBody {
        /// Expected discriminator.
        expected: Action,
        /// Received discriminator.
        actual: Action,
    },
}

impl RpcError {
    /// Whether this is a transport-level "no response" failure.
    #[must_use]
    pub fn is_no_response(&self) -> bool {
        matches!(self, Self::NoResponse { .. } | Self::ChannelClosed)
    }
}

/// Result type for bus operations.
pub type RpcResult<T> = Result<T, RpcError>;
