//! Monitor error types.

use thiserror::Error;

pub type MonitorResult<T> = Result<T, MonitorError>;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Scaling history unavailable: {0}")]
    Scaling(String),

    #[error("Report failed: {0}")]
    ReportFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Unknown cluster: {0}")]
    UnknownCluster(String),

    #[error("Monitor task failed: {0}")]
    TaskFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] dsa_store::StoreError),

    #[error("Queue error: {0}")]
    Queue(#[from] dsa_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MonitorError {
    pub fn scaling(msg: impl Into<String>) -> Self {
        Self::Scaling(msg.into())
    }

    pub fn report_failed(msg: impl Into<String>) -> Self {
        Self::ReportFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Errors the next monitor cycle may clear on its own.
    pub fn is_retryable(&self) -> bool {
        match self {
            MonitorError::Scaling(_) | MonitorError::Io(_) => true,
            MonitorError::Store(e) => e.is_retryable(),
            MonitorError::Queue(e) => e.is_retryable(),
            _ => false,
        }
    }
}

impl From<config::ConfigError> for MonitorError {
    fn from(e: config::ConfigError) -> Self {
        Self::ConfigError(e.to_string())
    }
}
