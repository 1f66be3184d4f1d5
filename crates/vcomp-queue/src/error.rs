//! Queue error types.

use thiserror::Error;

use vcomp_models::JobId;

pub type QueueResult<T> = Result<T, QueueError>;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum QueueError {
    #[error("Job already exists: {0}")]
    DuplicateJob(JobId),

    #[error("Job not found: {0}")]
    JobNotFound(JobId),

    #[error("Queue is shutting down")]
    ShuttingDown,
}

impl QueueError {
    pub fn duplicate(id: &JobId) -> Self {
        Self::DuplicateJob(id.clone())
    }

    pub fn not_found(id: &JobId) -> Self {
        Self::JobNotFound(id.clone())
    }
}
