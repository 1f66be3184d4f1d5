//! Catalog and ingestion collaborator traits.

use std::path::PathBuf;

use async_trait::async_trait;

use vcomp_models::{AssetId, VideoAsset};

use crate::error::{StorageError, StorageResult};

/// Read access to the asset catalog.
#[async_trait]
pub trait AssetCatalog: Send + Sync {
    /// All assets, in a stable order.
    async fn list(&self) -> StorageResult<Vec<VideoAsset>>;

    /// Assets carrying `tag` (case-insensitive).
    async fn list_by_tag(&self, tag: &str) -> StorageResult<Vec<VideoAsset>> {
        let assets = self.list().await?;
        Ok(assets.into_iter().filter(|a| a.has_tag(tag)).collect())
    }

    /// Look up one asset.
    async fn get(&self, id: &AssetId) -> StorageResult<VideoAsset>;
}

/// Accepts finished renders back into the catalog.
#[async_trait]
pub trait AssetIngestor: Send + Sync {
    async fn ingest(&self, request: IngestRequest) -> StorageResult<VideoAsset>;
}

/// Tag applied to every ingested render.
pub const TAG_COMPOSITION: &str = "composition";

/// A rendered file to register as a new asset.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestRequest {
    pub path: PathBuf,
    pub filename: String,
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub has_audio: bool,
    pub tags: Vec<String>,
}

impl IngestRequest {
    pub fn new(
        path: impl Into<PathBuf>,
        filename: impl Into<String>,
        duration: f64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            path: path.into(),
            filename: filename.into(),
            duration,
            width,
            height,
            has_audio: true,
            tags: vec![TAG_COMPOSITION.to_string()],
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.tags.iter().any(|t| t.eq_ignore_ascii_case(&tag)) {
            self.tags.push(tag);
        }
        self
    }

    /// Build the catalog record for this render under `id`.
    pub fn into_asset(self, id: AssetId) -> StorageResult<VideoAsset> {
        validate_dimensions(self.duration, self.width, self.height)?;
        let mut asset = VideoAsset::new(id, self.filename, self.duration, self.width, self.height)
            .with_path(self.path);
        if !self.has_audio {
            asset = asset.without_audio();
        }
        Ok(self.tags.into_iter().fold(asset, |a, t| a.with_tag(t)))
    }
}

/// Reject records the renderer could never use.
pub(crate) fn validate_asset(asset: &VideoAsset) -> StorageResult<()> {
    if asset.id.as_str().trim().is_empty() {
        return Err(StorageError::invalid_asset("empty asset id"));
    }
    validate_dimensions(asset.duration, asset.width, asset.height)
}

fn validate_dimensions(duration: f64, width: u32, height: u32) -> StorageResult<()> {
    if !duration.is_finite() || duration <= 0.0 {
        return Err(StorageError::invalid_asset(format!(
            "duration must be positive, got {duration}"
        )));
    }
    if width == 0 || height == 0 {
        return Err(StorageError::invalid_asset(format!(
            "dimensions must be non-zero, got {width}x{height}"
        )));
    }
    Ok(())
}
