use hive_core::HiveError;
use thiserror::Error;

/// Errors raised while registering subscriptions.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EventBusError {
    /// The subscription handle was not provided.
    #[error("Subscription id not provided")]
    MissingSubscriptionId,

    /// The device scope was not provided.
    #[error("Device id is null")]
    MissingEntity,

    /// The request carries no reply channel to deliver events to.
    #[error("Reply channel not provided")]
    MissingReplyTo,
}

impl From<EventBusError> for HiveError {
    fn from(err: EventBusError) -> Self {
        HiveError::Validation(err.to_string())
    }
}

/// Result type for event bus operations.
pub type EventBusResult<T> = Result<T, EventBusError>;
