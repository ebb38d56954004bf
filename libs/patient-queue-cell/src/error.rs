use thiserror::Error;
use uuid::Uuid;

use shared_database::DatabaseError;
use shared_models::error::AppError;

use crate::models::QueueStatus;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("Queue entry not found: {0}")]
    NotFound(String),

    #[error("Queue conflict: {0}")]
    Conflict(String),

    #[error("No waiting patients in queue for organization {organization_id}")]
    EmptyQueue { organization_id: Uuid },

    #[error("Invalid queue status transition from {from} to {to}")]
    InvalidTransition { from: QueueStatus, to: QueueStatus },

    #[error("Queue persistence failed during {operation}: {source}")]
    Io {
        operation: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("Timed out after {timeout_ms} ms waiting for the queue lock of organization {organization_id}")]
    LockTimeout { organization_id: Uuid, timeout_ms: u64 },

    #[error("Validation error: {0}")]
    Validation(String),
}

impl QueueError {
    pub fn io(operation: &'static str, source: impl Into<BoxError>) -> Self {
        QueueError::Io {
            operation,
            source: source.into(),
        }
    }

    /// Maps a store-level database failure, keeping not-found and conflict
    /// distinct from plain persistence errors.
    pub fn from_database(operation: &'static str, error: DatabaseError) -> Self {
        match error {
            DatabaseError::NotFound(msg) => QueueError::NotFound(msg),
            DatabaseError::Conflict(msg) => QueueError::Conflict(msg),
            other => QueueError::io(operation, other),
        }
    }

    /// Prefixes a `NotFound` with business context; other kinds pass through.
    pub fn context(self, message: &str) -> Self {
        match self {
            QueueError::NotFound(detail) => QueueError::NotFound(format!("{}: {}", message, detail)),
            other => other,
        }
    }

    pub fn is_io(&self) -> bool {
        matches!(self, QueueError::Io { .. } | QueueError::LockTimeout { .. })
    }
}

impl From<QueueError> for AppError {
    fn from(error: QueueError) -> Self {
        match &error {
            QueueError::NotFound(_) => AppError::NotFound(error.to_string()),
            QueueError::Conflict(_) | QueueError::EmptyQueue { .. } => {
                AppError::Conflict(error.to_string())
            }
            QueueError::InvalidTransition { .. } => AppError::BadRequest(error.to_string()),
            QueueError::Validation(msg) => AppError::ValidationError(msg.clone()),
            QueueError::Io { .. } => AppError::Database(error.to_string()),
            QueueError::LockTimeout { .. } => AppError::Internal(error.to_string()),
        }
    }
}
