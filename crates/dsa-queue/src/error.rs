//! Queue error types.

use thiserror::Error;

use dsa_store::StoreError;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Poll failed: {0}")]
    PollFailed(String),

    #[error("Queue depth unavailable: {0}")]
    DepthFailed(String),

    #[error("Send failed: {0}")]
    SendFailed(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn poll_failed(msg: impl Into<String>) -> Self {
        Self::PollFailed(msg.into())
    }

    pub fn depth_failed(msg: impl Into<String>) -> Self {
        Self::DepthFailed(msg.into())
    }

    pub fn send_failed(msg: impl Into<String>) -> Self {
        Self::SendFailed(msg.into())
    }

    pub fn config_error(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Collaborator failures are transient: the next cycle simply tries again.
    pub fn is_retryable(&self) -> bool {
        match self {
            QueueError::PollFailed(_) | QueueError::DepthFailed(_) | QueueError::SendFailed(_) => true,
            QueueError::Store(e) => e.is_retryable(),
            _ => false,
        }
    }
}
