//! Error families shared across the platform.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// HTTP-style status codes carried by error responses.
pub mod codes {
    /// Malformed request.
    pub const BAD_REQUEST: u16 = 400;
    /// Missing or invalid credential.
    pub const UNAUTHORIZED: u16 = 401;
    /// Principal may not touch the device.
    pub const FORBIDDEN: u16 = 403;
    /// Entity or subscription does not exist.
    pub const NOT_FOUND: u16 = 404;
    /// Unexpected processing failure.
    pub const INTERNAL: u16 = 500;
    /// No response arrived in time.
    pub const SERVICE_UNAVAILABLE: u16 = 503;
}

/// Which side of the conversation an error response blames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorFamily {
    /// The request was well formed but rejected (4xx).
    Client,
    /// Processing failed unexpectedly (5xx).
    Server,
}

impl ErrorFamily {
    /// Classify a status code. Anything outside 4xx counts as a server failure.
    #[must_use]
    pub fn from_code(code: u16) -> Self {
        if (400..500).contains(&code) {
            Self::Client
        } else {
            Self::Server
        }
    }
}

/// Errors raised by domain logic.
#[derive(Debug, Error)]
pub enum HiveError {
    /// Request is malformed; rejected before any async work.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Referenced entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Well-formed request rejected by domain rules.
    #[error("client error {code}: {message}")]
    Client {
        /// Status code (4xx).
        code: u16,
        /// Human-readable reason.
        message: String,
    },

    /// Unexpected processing failure.
    #[error("server error {code}: {message}")]
    Server {
        /// Status code (5xx).
        code: u16,
        /// Human-readable reason.
        message: String,
    },

    /// Keyed store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Authentication failure.
    #[error(transparent)]
    Auth(#[from] AuthError),
}

impl HiveError {
    /// Rebuild an error from a status code and message received off the wire.
    #[must_use]
    pub fn from_code(code: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        match ErrorFamily::from_code(code) {
            ErrorFamily::Client => Self::Client { code, message },
            ErrorFamily::Server => Self::Server { code, message },
        }
    }

    /// Status code to report for this error.
    #[must_use]
    pub fn code(&self) -> u16 {
        match self {
            Self::Validation(_) => codes::BAD_REQUEST,
            Self::NotFound(_) => codes::NOT_FOUND,
            Self::Client { code, .. } | Self::Server { code, .. } => *code,
            Self::Store(StoreError::NotFound { .. }) => codes::NOT_FOUND,
            Self::Store(_) => codes::INTERNAL,
            Self::Auth(AuthError::Forbidden(_)) => codes::FORBIDDEN,
            Self::Auth(_) => codes::UNAUTHORIZED,
        }
    }

    /// Error family derived from the status code.
    #[must_use]
    pub fn family(&self) -> ErrorFamily {
        ErrorFamily::from_code(self.code())
    }
}

/// Result type for domain operations.
pub type HiveResult<T> = Result<T, HiveError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_family_from_code() {
        assert_eq!(ErrorFamily::from_code(400), ErrorFamily::Client);
        assert_eq!(ErrorFamily::from_code(404), ErrorFamily::Client);
        assert_eq!(ErrorFamily::from_code(500), ErrorFamily::Server);
        assert_eq!(ErrorFamily::from_code(503), ErrorFamily::Server);
    }

    #[test]
    fn test_validation_is_client_family() {
        let err = HiveError::Validation("Device id is null".into());
        assert_eq!(err.code(), codes::BAD_REQUEST);
        assert_eq!(err.family(), ErrorFamily::Client);
        assert_eq!(err.to_string(), "validation failed: Device id is null");
    }

    #[test]
    fn test_from_code_picks_variant() {
        assert!(matches!(
            HiveError::from_code(404, "gone"),
            HiveError::Client { code: 404, .. }
        ));
        assert!(matches!(
            HiveError::from_code(500, "boom"),
            HiveError::Server { code: 500, .. }
        ));
    }
}
