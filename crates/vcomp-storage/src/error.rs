//! Storage error types.

use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during catalog operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Asset not found: {0}")]
    NotFound(String),

    #[error("Asset already exists: {0}")]
    AlreadyExists(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    #[error("Probe failed: {0}")]
    Probe(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    pub fn already_exists(id: impl Into<String>) -> Self {
        Self::AlreadyExists(id.into())
    }

    pub fn invalid_asset(msg: impl Into<String>) -> Self {
        Self::InvalidAsset(msg.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }
}

impl From<vcomp_media::MediaError> for StorageError {
    fn from(e: vcomp_media::MediaError) -> Self {
        match e {
            vcomp_media::MediaError::Io(io) => StorageError::Io(io),
            other => StorageError::Probe(other.to_string()),
        }
    }
}
