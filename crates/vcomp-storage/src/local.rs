//! File-backed catalog: a directory of clips plus a JSON manifest.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use vcomp_media::{probe_video, AssetSource, MediaError, MediaResult};
use vcomp_models::{AssetId, VideoAsset};

use crate::catalog::{validate_asset, AssetCatalog, AssetIngestor, IngestRequest};
use crate::error::{StorageError, StorageResult};

/// Manifest filename inside the catalog root.
pub const MANIFEST_FILE: &str = "catalog.json";
/// Subdirectory imported clips are copied into.
pub const MEDIA_DIR: &str = "media";

const MANIFEST_VERSION: u32 = 1;

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    #[serde(default)]
    version: u32,
    #[serde(default)]
    assets: Vec<VideoAsset>,
}

/// Catalog persisted as `<root>/catalog.json`.
///
/// Relative asset paths are resolved against the root. Every write rewrites
/// the manifest through a temp file so a crash never leaves it truncated.
#[derive(Debug)]
pub struct LocalCatalog {
    root: PathBuf,
    assets: RwLock<BTreeMap<AssetId, VideoAsset>>,
}

impl LocalCatalog {
    /// Open (or create) the catalog rooted at `root`.
    pub async fn open(root: impl Into<PathBuf>) -> StorageResult<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;

        let manifest_path = root.join(MANIFEST_FILE);
        let manifest = match fs::read(&manifest_path).await {
            Ok(bytes) => serde_json::from_slice::<Manifest>(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Manifest::default(),
            Err(e) => return Err(e.into()),
        };

        let mut assets = BTreeMap::new();
        for asset in manifest.assets {
            if let Err(e) = validate_asset(&asset) {
                warn!(asset_id = %asset.id, "Skipping invalid catalog entry: {}", e);
                continue;
            }
            assets.insert(asset.id.clone(), asset);
        }

        info!(
            root = %root.display(),
            assets = assets.len(),
            "Opened local catalog"
        );

        Ok(Self {
            root,
            assets: RwLock::new(assets),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    pub async fn len(&self) -> usize {
        self.assets.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.assets.read().await.is_empty()
    }

    /// Absolute location of an asset's bytes, if it has any.
    pub fn resolve_path(&self, asset: &VideoAsset) -> Option<PathBuf> {
        asset.path.as_ref().map(|p| {
            if p.is_absolute() {
                p.clone()
            } else {
                self.root.join(p)
            }
        })
    }

    /// Add an asset record. Ids are unique and records never change once added.
    pub async fn register(&self, asset: VideoAsset) -> StorageResult<VideoAsset> {
        validate_asset(&asset)?;

        let mut assets = self.assets.write().await;
        if assets.contains_key(&asset.id) {
            return Err(StorageError::already_exists(asset.id.as_str()));
        }
        assets.insert(asset.id.clone(), asset.clone());

        if let Err(e) = self.persist(&assets).await {
            assets.remove(&asset.id);
            return Err(e);
        }

        debug!(asset_id = %asset.id, filename = %asset.filename, "Registered asset");
        Ok(asset)
    }

    /// Probe a clip, copy it under `media/` and register it with `tags`.
    pub async fn import_file(&self, src: &Path, tags: &[String]) -> StorageResult<VideoAsset> {
        if !fs::try_exists(src).await.unwrap_or(false) {
            return Err(StorageError::not_found(src.display().to_string()));
        }
        let info = probe_video(src).await?;

        let id = AssetId::new();
        let filename = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| id.to_string());
        let ext = src
            .extension()
            .map(|e| e.to_string_lossy().into_owned())
            .unwrap_or_else(|| "mp4".to_string());

        let relative = Path::new(MEDIA_DIR).join(format!("{}.{}", id, ext));
        let dst = self.root.join(&relative);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::copy(src, &dst).await?;

        let asset = tags
            .iter()
            .fold(info.into_asset(id, filename, &relative), |a, t| a.with_tag(t));

        match self.register(asset).await {
            Ok(asset) => Ok(asset),
            Err(e) => {
                let _ = fs::remove_file(&dst).await;
                Err(e)
            }
        }
    }

    async fn persist(&self, assets: &BTreeMap<AssetId, VideoAsset>) -> StorageResult<()> {
        let manifest = Manifest {
            version: MANIFEST_VERSION,
            assets: assets.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&manifest)?;

        let path = self.manifest_path();
        let staging = path.with_extension("json.tmp");
        fs::write(&staging, bytes).await?;
        if let Err(e) = fs::rename(&staging, &path).await {
            let _ = fs::remove_file(&staging).await;
            return Err(e.into());
        }
        Ok(())
    }
}

#[async_trait]
impl AssetCatalog for LocalCatalog {
    async fn list(&self) -> StorageResult<Vec<VideoAsset>> {
        Ok(self.assets.read().await.values().cloned().collect())
    }

    async fn get(&self, id: &AssetId) -> StorageResult<VideoAsset> {
        self.assets
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| StorageError::not_found(id.as_str()))
    }
}

#[async_trait]
impl AssetSource for LocalCatalog {
    async fn resolve(&self, id: &AssetId) -> MediaResult<VideoAsset> {
        let asset = self
            .get(id)
            .await
            .map_err(|e| MediaError::asset_resolution(id, e.to_string()))?;

        let path = self
            .resolve_path(&asset)
            .ok_or_else(|| MediaError::asset_resolution(id, "asset has no local file"))?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(MediaError::asset_resolution(
                id,
                format!("file missing: {}", path.display()),
            ));
        }

        Ok(asset.with_path(path))
    }
}

#[async_trait]
impl AssetIngestor for LocalCatalog {
    /// Register a finished render in place; the file is not moved.
    async fn ingest(&self, request: IngestRequest) -> StorageResult<VideoAsset> {
        if !fs::try_exists(&request.path).await.unwrap_or(false) {
            return Err(StorageError::not_found(request.path.display().to_string()));
        }
        let asset = request.into_asset(AssetId::new())?;
        let asset = self.register(asset).await?;
        info!(
            asset_id = %asset.id,
            path = ?asset.path,
            duration = asset.duration,
            "Ingested rendered composition"
        );
        Ok(asset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn clip(id: &str, tag: &str, w: u32, h: u32) -> VideoAsset {
        VideoAsset::new(id, format!("{id}.mp4"), 5.0, w, h)
            .with_tag(tag)
            .with_path(format!("{MEDIA_DIR}/{id}.mp4"))
    }

    #[tokio::test]
    async fn test_register_persists_across_open() {
        let dir = TempDir::new().unwrap();
        {
            let catalog = LocalCatalog::open(dir.path()).await.unwrap();
            catalog.register(clip("intro-1", "intro", 1920, 1080)).await.unwrap();
            catalog.register(clip("outro-1", "outro", 1080, 1920)).await.unwrap();
        }

        let catalog = LocalCatalog::open(dir.path()).await.unwrap();
        assert_eq!(catalog.len().await, 2);
        let intros = catalog.list_by_tag("INTRO").await.unwrap();
        assert_eq!(intros.len(), 1);
        assert_eq!(intros[0].id.as_str(), "intro-1");
    }

    #[tokio::test]
    async fn test_register_rejects_duplicates() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).await.unwrap();
        catalog.register(clip("a", "intro", 1920, 1080)).await.unwrap();

        let err = catalog.register(clip("a", "outro", 1920, 1080)).await.unwrap_err();
        assert!(matches!(err, StorageError::AlreadyExists(_)));
        assert!(catalog.get(&AssetId::from("a")).await.unwrap().has_tag("intro"));
    }

    #[tokio::test]
    async fn test_get_missing() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).await.unwrap();
        let err = catalog.get(&AssetId::from("nope")).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_corrupt_manifest_is_an_error() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"{not json").unwrap();
        let err = LocalCatalog::open(dir.path()).await.unwrap_err();
        assert!(matches!(err, StorageError::Json(_)));
    }

    #[tokio::test]
    async fn test_resolve_requires_file() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).await.unwrap();
        catalog.register(clip("c", "content", 1920, 1080)).await.unwrap();

        let err = catalog.resolve(&AssetId::from("c")).await.unwrap_err();
        assert!(matches!(err, MediaError::AssetResolution { .. }));

        std::fs::create_dir_all(dir.path().join(MEDIA_DIR)).unwrap();
        std::fs::write(dir.path().join(MEDIA_DIR).join("c.mp4"), b"x").unwrap();
        let asset = catalog.resolve(&AssetId::from("c")).await.unwrap();
        assert_eq!(asset.path.unwrap(), dir.path().join(MEDIA_DIR).join("c.mp4"));
    }

    #[tokio::test]
    async fn test_ingest_registers_in_place() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("out.mp4");
        std::fs::write(&out, b"rendered").unwrap();

        let catalog = LocalCatalog::open(dir.path().join("catalog")).await.unwrap();
        let asset = catalog
            .ingest(IngestRequest::new(&out, "out.mp4", 12.5, 1920, 1080))
            .await
            .unwrap();

        assert!(out.exists());
        assert_eq!(asset.path.as_deref(), Some(out.as_path()));
        assert!(asset.has_tag("composition"));
        assert_eq!(catalog.list().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_ingest_missing_file() {
        let dir = TempDir::new().unwrap();
        let catalog = LocalCatalog::open(dir.path()).await.unwrap();
        let err = catalog
            .ingest(IngestRequest::new(dir.path().join("gone.mp4"), "gone.mp4", 1.0, 2, 2))
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(catalog.is_empty().await);
    }
}
