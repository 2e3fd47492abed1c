//! Frontend error types.

use hive_core::{AuthError, codes};
use hive_rpc::RpcError;
use thiserror::Error;

/// Errors from the subscription service and the socket server.
#[derive(Debug, Error)]
pub enum FrontendError {
    /// Malformed input, rejected before anything is sent to the backend.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Request/response bus failure, including error replies from the backend.
    #[error(transparent)]
    Rpc(#[from] RpcError),

    /// Credential missing, rejected or lacking access.
    #[error(transparent)]
    Auth(#[from] AuthError),

    /// Listener could not be bound.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrontendError {
    /// Status code reported to socket clients.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) | Self::Rpc(RpcError::MissingBody) => codes::BAD_REQUEST,
            Self::Rpc(RpcError::Remote { code, .. }) => *code,
            Self::Rpc(e) if e.is_no_response() => codes::SERVICE_UNAVAILABLE,
            Self::Auth(AuthError::Forbidden(_)) => codes::FORBIDDEN,
            Self::Auth(_) => codes::UNAUTHORIZED,
            Self::Rpc(_) | Self::Io(_) => codes::INTERNAL,
        }
    }

    /// Message reported to socket clients.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Rpc(RpcError::Remote { message, .. }) => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Result type for frontend operations.
pub type FrontendResult<T> = Result<T, FrontendError>;

#[cfg(test)]
mod tests {
    use super::*;
    use hive_core::ErrorFamily;
    use std::time::Duration;

    #[test]
    fn test_codes() {
        assert_eq!(FrontendError::Validation("x".into()).code(), 400);
        assert_eq!(FrontendError::Auth(AuthError::Invalid).code(), 401);
        assert_eq!(
            FrontendError::Auth(AuthError::Forbidden("d2".into())).code(),
            403
        );
        let timeout = RpcError::NoResponse {
            correlation_id: "c".into(),
            timeout: Duration::from_secs(1),
        };
        assert_eq!(FrontendError::from(timeout).code(), 503);
    }

    #[test]
    fn test_remote_error_keeps_code_and_message() {
        let err = FrontendError::from(RpcError::Remote {
            family: ErrorFamily::Client,
            code: 404,
            message: "command 7 not found".into(),
        });
        assert_eq!(err.code(), 404);
        assert_eq!(err.reason(), "command 7 not found");
    }
}
