//! Application state.

use std::sync::Arc;

use vcomp_composer::Composer;
use vcomp_storage::AssetCatalog;

use crate::config::ApiConfig;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: ApiConfig,
    pub composer: Arc<Composer>,
}

impl AppState {
    pub fn new(config: ApiConfig, composer: Arc<Composer>) -> Self {
        Self { config, composer }
    }

    pub fn catalog(&self) -> &Arc<dyn AssetCatalog> {
        self.composer.catalog()
    }
}
