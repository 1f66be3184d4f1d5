//! In-process catalog for tests and ephemeral runs.

use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;

use vcomp_media::{AssetSource, MediaError, MediaResult};
use vcomp_models::{AssetId, VideoAsset};

use crate::catalog::{validate_asset, AssetCatalog, AssetIngestor, IngestRequest};
use crate::error::{StorageError, StorageResult};

/// Catalog held entirely in memory. Paths are used as given.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    assets: RwLock<BTreeMap<AssetId, VideoAsset>>,
    ingested: RwLock<Vec<AssetId>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_assets(assets: impl IntoIterator<Item = VideoAsset>) -> StorageResult<Self> {
        let catalog = Self::new();
        for asset in assets {
            catalog.insert(asset)?;
        }
        Ok(catalog)
    }

    pub fn insert(&self, asset: VideoAsset) -> StorageResult<()> {
        validate_asset(&asset)?;
        let mut assets = self
            .assets
            .write()
            .map_err(|_| StorageError::invalid_asset("catalog lock poisoned"))?;
        if assets.contains_key(&asset.id) {
            return Err(StorageError::already_exists(asset.id.as_str()));
        }
        assets.insert(asset.id.clone(), asset);
        Ok(())
    }

    /// Ids registered through [`AssetIngestor::ingest`], oldest first.
    pub fn ingested(&self) -> Vec<AssetId> {
        self.ingested.read().map(|v| v.clone()).unwrap_or_default()
    }

    fn lookup(&self, id: &AssetId) -> StorageResult<VideoAsset> {
        self.assets
            .read()
            .ok()
            .and_then(|assets| assets.get(id).cloned())
            .ok_or_else(|| StorageError::not_found(id.as_str()))
    }
}

#[async_trait]
impl AssetCatalog for MemoryCatalog {
    async fn list(&self) -> StorageResult<Vec<VideoAsset>> {
        Ok(self
            .assets
            .read()
            .map(|assets| assets.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn get(&self, id: &AssetId) -> StorageResult<VideoAsset> {
        self.lookup(id)
    }
}

#[async_trait]
impl AssetSource for MemoryCatalog {
    async fn resolve(&self, id: &AssetId) -> MediaResult<VideoAsset> {
        let asset = self
            .lookup(id)
            .map_err(|e| MediaError::asset_resolution(id, e.to_string()))?;
        if asset.path.is_none() {
            return Err(MediaError::asset_resolution(id, "asset has no local file"));
        }
        Ok(asset)
    }
}

#[async_trait]
impl AssetIngestor for MemoryCatalog {
    async fn ingest(&self, request: IngestRequest) -> StorageResult<VideoAsset> {
        let asset = request.into_asset(AssetId::new())?;
        self.insert(asset.clone())?;
        if let Ok(mut ingested) = self.ingested.write() {
            ingested.push(asset.id.clone());
        }
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tag_pools() {
        let catalog = MemoryCatalog::with_assets([
            VideoAsset::new("i1", "i1.mp4", 3.0, 1920, 1080).with_tag("intro"),
            VideoAsset::new("i2", "i2.mp4", 3.0, 1080, 1920).with_tag("intro"),
            VideoAsset::new("o1", "o1.mp4", 3.0, 1920, 1080).with_tag("overlay"),
        ])
        .unwrap();

        assert_eq!(catalog.list_by_tag("intro").await.unwrap().len(), 2);
        assert_eq!(catalog.list_by_tag("outro").await.unwrap().len(), 0);
        assert!(catalog.get(&AssetId::from("o1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_resolve_without_path_fails() {
        let catalog =
            MemoryCatalog::with_assets([VideoAsset::new("c", "c.mp4", 3.0, 1920, 1080)]).unwrap();
        assert!(catalog.resolve(&AssetId::from("c")).await.is_err());
        assert!(catalog.resolve(&AssetId::from("missing")).await.is_err());
    }

    #[tokio::test]
    async fn test_ingest_tracks_ids() {
        let catalog = MemoryCatalog::new();
        let asset = catalog
            .ingest(IngestRequest::new("/tmp/out.mp4", "out.mp4", 8.0, 1280, 720))
            .await
            .unwrap();
        assert_eq!(catalog.ingested(), vec![asset.id.clone()]);
        assert!(catalog.get(&asset.id).await.unwrap().has_tag("composition"));
    }
}
