//! Error types for media operations.

use std::path::PathBuf;
use thiserror::Error;

use vcomp_models::{AssetId, ValidationError};

/// Result type for media operations.
pub type MediaResult<T> = Result<T, MediaError>;

/// Errors that can occur while rendering a composition.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("FFmpeg not found: {0}")]
    FfmpegNotFound(String),

    #[error("FFprobe not found in PATH")]
    FfprobeNotFound,

    #[error("Failed to resolve asset {asset_id}: {reason}")]
    AssetResolution { asset_id: AssetId, reason: String },

    #[error("Failed to spawn FFmpeg: {0}")]
    ProcessSpawn(String),

    #[error("FFmpeg timed out after {0} ms and was killed")]
    Timeout(u64),

    #[error("FFmpeg exited with code {}: {stderr_tail}", exit_code_label(.code))]
    ProcessExit {
        code: Option<i32>,
        stderr_tail: String,
    },

    #[error("FFprobe command failed: {message}")]
    FfprobeFailed {
        message: String,
        stderr: Option<String>,
    },

    #[error("Invalid composition: {0}")]
    Validation(#[from] ValidationError),

    #[error("File not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Invalid video file: {0}")]
    InvalidVideo(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),
}

fn exit_code_label(code: &Option<i32>) -> String {
    code.map(|c| c.to_string())
        .unwrap_or_else(|| "none (terminated by signal)".to_string())
}

impl MediaError {
    /// Create an asset resolution error.
    pub fn asset_resolution(asset_id: &AssetId, reason: impl Into<String>) -> Self {
        Self::AssetResolution {
            asset_id: asset_id.clone(),
            reason: reason.into(),
        }
    }

    /// Create a process exit error.
    pub fn process_exit(code: Option<i32>, stderr_tail: impl Into<String>) -> Self {
        Self::ProcessExit {
            code,
            stderr_tail: stderr_tail.into(),
        }
    }

    /// Whether the error was raised before FFmpeg was ever started.
    pub fn is_pre_spawn(&self) -> bool {
        matches!(
            self,
            MediaError::AssetResolution { .. }
                | MediaError::Validation(_)
                | MediaError::FfmpegNotFound(_)
                | MediaError::ProcessSpawn(_)
        )
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, MediaError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_message_contains_code_and_tail() {
        let err = MediaError::process_exit(Some(1), "Invalid data found when processing input");
        let msg = err.to_string();
        assert!(msg.contains("code 1"));
        assert!(msg.contains("Invalid data found"));
    }

    #[test]
    fn test_exit_without_code() {
        let err = MediaError::process_exit(None, "");
        assert!(err.to_string().contains("terminated by signal"));
    }

    #[test]
    fn test_timeout_message() {
        let err = MediaError::Timeout(600_000);
        assert!(err.to_string().contains("timed out"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_pre_spawn_classification() {
        assert!(MediaError::asset_resolution(&AssetId::from("a"), "missing").is_pre_spawn());
        assert!(!MediaError::Timeout(1).is_pre_spawn());
    }
}
