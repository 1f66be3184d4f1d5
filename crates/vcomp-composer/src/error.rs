//! Composer error types.

use thiserror::Error;

use vcomp_models::ValidationError;

pub type ComposerResult<T> = Result<T, ComposerError>;

#[derive(Debug, Error)]
pub enum ComposerError {
    #[error("Invalid composition: {0}")]
    Validation(#[from] ValidationError),

    #[error("Ingestion failed: {0}")]
    Ingestion(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(#[from] vcomp_storage::StorageError),

    /// Render failures keep the renderer's own message
    #[error(transparent)]
    Media(#[from] vcomp_media::MediaError),

    #[error("Queue error: {0}")]
    Queue(#[from] vcomp_queue::QueueError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ComposerError {
    pub fn ingestion(msg: impl Into<String>) -> Self {
        Self::Ingestion(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether the error came from a missing asset or job.
    pub fn is_not_found(&self) -> bool {
        match self {
            ComposerError::Storage(e) => e.is_not_found(),
            ComposerError::Queue(vcomp_queue::QueueError::JobNotFound(_)) => true,
            _ => false,
        }
    }

    /// Whether the caller sent something unusable.
    pub fn is_invalid_input(&self) -> bool {
        matches!(
            self,
            ComposerError::Validation(_) | ComposerError::Media(vcomp_media::MediaError::Validation(_))
        )
    }
}
