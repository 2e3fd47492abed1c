//! Request correlation context.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::Span;
use uuid::Uuid;

/// Identifies one unit of work across log lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// Correlation id; a fresh UUID unless the caller already has one.
    pub correlation_id: String,
    /// Component handling the request (`socket`, `backend`, ...).
    pub component: String,
    /// Action name, if known.
    pub action: Option<String>,
    /// Device the request concerns, if any.
    pub device_id: Option<String>,
    /// Session or client the request came from.
    pub session_id: Option<String>,
    /// When the context was created.
    pub started_at: DateTime<Utc>,
}

impl RequestContext {
    /// New context with a generated correlation id.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        Self::with_correlation(component, Uuid::new_v4().to_string())
    }

    /// New context reusing an existing correlation id.
    #[must_use]
    pub fn with_correlation(component: impl Into<String>, correlation_id: impl Into<String>) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            component: component.into(),
            action: None,
            device_id: None,
            session_id: None,
            started_at: Utc::now(),
        }
    }

    /// Set the action.
    #[must_use]
    pub fn with_action(mut self, action: impl Into<String>) -> Self {
        self.action = Some(action.into());
        self
    }

    /// Set the device.
    #[must_use]
    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// Set the session.
    #[must_use]
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Milliseconds since the context was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// An `info` span carrying the context fields.
    #[must_use]
    pub fn span(&self) -> Span {
        tracing::info_span!(
            "request",
            correlation_id = %self.correlation_id,
            component = %self.component,
            action = self.action.as_deref().unwrap_or(""),
            device_id = self.device_id.as_deref().unwrap_or(""),
            session_id = self.session_id.as_deref().unwrap_or(""),
        )
    }
}
