//! Assets picked for a composition.

use serde::{Deserialize, Serialize};

use crate::asset::VideoAsset;

/// Intro/outro/overlay picks for one content clip.
///
/// Any field may be `None`; an empty pool is a normal outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectedAssets {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro: Option<VideoAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outro: Option<VideoAsset>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overlay: Option<VideoAsset>,
}

impl SelectedAssets {
    pub fn is_empty(&self) -> bool {
        self.intro.is_none() && self.outro.is_none() && self.overlay.is_none()
    }
}
