use thiserror::Error;

/// Telemetry setup errors.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// Invalid filter, directive or format.
    #[error("invalid logging configuration: {0}")]
    Config(String),

    /// A global subscriber is already installed or could not be installed.
    #[error("failed to initialize logging: {0}")]
    Init(String),

    /// Log directory could not be prepared.
    #[error("log directory error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
