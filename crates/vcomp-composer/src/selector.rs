//! Intro, outro and overlay selection.

use std::sync::Arc;

use rand::seq::IndexedRandom;
use rand::Rng;
use tracing::{debug, warn};

use vcomp_models::{AssetRole, SelectedAssets, VideoAsset};
use vcomp_storage::AssetCatalog;

/// Candidates for each role, already filtered for one content clip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CandidatePools {
    pub intros: Vec<VideoAsset>,
    pub outros: Vec<VideoAsset>,
    pub overlays: Vec<VideoAsset>,
}

impl CandidatePools {
    /// Pick one asset per role, uniformly at random. Empty pools stay empty.
    pub fn choose<R: Rng + ?Sized>(&self, rng: &mut R) -> SelectedAssets {
        SelectedAssets {
            intro: self.intros.choose(rng).cloned(),
            outro: self.outros.choose(rng).cloned(),
            overlay: self.overlays.choose(rng).cloned(),
        }
    }
}

/// Queries the catalog tag pools for a content clip.
#[derive(Clone)]
pub struct AssetSelector {
    catalog: Arc<dyn AssetCatalog>,
}

impl AssetSelector {
    pub fn new(catalog: Arc<dyn AssetCatalog>) -> Self {
        Self { catalog }
    }

    /// Gather the pools for `content`.
    ///
    /// Intro and outro candidates must share the content's aspect-ratio
    /// category; overlays are unfiltered. The content clip never selects
    /// itself. A failed pool query is logged and yields an empty pool.
    pub async fn candidates(&self, content: &VideoAsset) -> CandidatePools {
        let mut pools = CandidatePools::default();
        for &role in AssetRole::ALL {
            let assets = match self.catalog.list_by_tag(role.tag()).await {
                Ok(assets) => assets,
                Err(e) => {
                    warn!(
                        role = %role,
                        content_id = %content.id,
                        "Pool query failed, treating as empty: {}",
                        e
                    );
                    Vec::new()
                }
            };
            let pool: Vec<VideoAsset> = assets
                .into_iter()
                .filter(|a| a.id != content.id)
                .filter(|a| !role.requires_matching_aspect() || a.aspect_ratio == content.aspect_ratio)
                .collect();

            debug!(
                role = %role,
                aspect_ratio = %content.aspect_ratio,
                candidates = pool.len(),
                "Selector pool"
            );
            match role {
                AssetRole::Intro => pools.intros = pool,
                AssetRole::Outro => pools.outros = pool,
                AssetRole::Overlay => pools.overlays = pool,
            }
        }
        pools
    }

    /// Select with a caller-supplied RNG.
    pub async fn select_with<R: Rng + Send + ?Sized>(
        &self,
        content: &VideoAsset,
        rng: &mut R,
    ) -> SelectedAssets {
        self.candidates(content).await.choose(rng)
    }

    /// Select with the thread-local RNG.
    pub async fn select(&self, content: &VideoAsset) -> SelectedAssets {
        let pools = self.candidates(content).await;
        pools.choose(&mut rand::rng())
    }
}
