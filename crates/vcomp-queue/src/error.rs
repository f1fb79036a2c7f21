//! Queue error types.

use std::time::Duration;

use redis::ErrorKind;
use thiserror::Error;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Broker rejected request: {0}")]
    Rejected(String),

    #[error("Broker call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Malformed record: {0}")]
    MalformedRecord(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl QueueError {
    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::ConnectionFailed(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        Self::Rejected(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedRecord(msg.into())
    }

    /// Whether retrying the same call may succeed: the broker was
    /// unreachable, busy or slow, not wrong.
    pub fn is_transient(&self) -> bool {
        match self {
            QueueError::ConnectionFailed(_) | QueueError::Timeout(_) => true,
            QueueError::Redis(e) => {
                e.is_timeout()
                    || e.is_connection_dropped()
                    || e.is_connection_refusal()
                    || matches!(
                        e.kind(),
                        ErrorKind::IoError
                            | ErrorKind::TryAgain
                            | ErrorKind::BusyLoadingError
                            | ErrorKind::ClusterDown
                            | ErrorKind::MasterDown
                    )
            }
            QueueError::Rejected(_) | QueueError::MalformedRecord(_) | QueueError::Json(_) => {
                false
            }
        }
    }
}
