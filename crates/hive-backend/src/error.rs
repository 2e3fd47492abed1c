use thiserror::Error;

/// Backend startup failures.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The broker's partition queues already have a consumer.
    #[error("broker partitions are already being consumed")]
    PartitionsTaken,

    /// Logging settings could not be turned into a subscriber config.
    #[error(transparent)]
    Telemetry(#[from] hive_telemetry::TelemetryError),
}

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;
