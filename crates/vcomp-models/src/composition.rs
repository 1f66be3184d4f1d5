//! Composition records: the declarative description of one render.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::asset::{AssetId, VideoAsset};
use crate::encoding::OutputOptions;
use crate::overlay::{OverlayPosition, OverlayTiming, OverlayTransition};

/// Floating-point slack when comparing times in seconds.
pub const TIME_EPSILON: f64 = 1e-6;

/// Unique, time-ordered identifier for a composition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct CompositionId(pub String);

impl CompositionId {
    /// Generate a new time-based (UUIDv7) ID.
    pub fn new() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for CompositionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CompositionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One overlay instance within a composition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverlayConfig {
    pub asset_id: AssetId,
    /// Seconds from the start of the content clip
    pub start_time: f64,
    pub duration: f64,
    pub position: OverlayPosition,
    /// 0.0 (invisible) to 1.0 (opaque)
    pub opacity: f64,
    #[serde(default)]
    pub transition: OverlayTransition,
}

impl OverlayConfig {
    /// Fold a computed timing into a config for `asset_id`.
    pub fn from_timing(asset_id: AssetId, timing: &OverlayTiming) -> Self {
        Self {
            asset_id,
            start_time: timing.start_time,
            duration: timing.duration,
            position: OverlayPosition {
                size: timing.scale,
                ..timing.position
            },
            opacity: timing.opacity,
            transition: OverlayTransition {
                fade_in: timing.fade_in,
                fade_out: timing.fade_out,
            },
        }
    }

    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }
}

/// Declarative description of how to assemble content, intro/outro and
/// overlays into one rendered output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Composition {
    pub id: CompositionId,
    pub title: String,
    pub description: String,
    pub content_asset_id: AssetId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intro_asset_id: Option<AssetId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outro_asset_id: Option<AssetId>,
    #[serde(default)]
    pub overlay_configs: Vec<OverlayConfig>,
    /// Crossfade length at each segment boundary, in seconds
    pub crossfade_duration: f64,
    #[serde(default)]
    pub output: OutputOptions,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Reasons a composition cannot be rendered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("Content asset id is empty")]
    MissingContent,

    #[error("{field} must be a finite, non-negative number (got {value})")]
    InvalidNumber { field: String, value: f64 },

    #[error("Overlay {index} opacity {opacity} is outside 0..=1")]
    InvalidOpacity { index: usize, opacity: f64 },

    #[error("Overlay {index} has a non-positive duration")]
    EmptyOverlay { index: usize },

    #[error("Overlay {index} ends at {end:.3}s, past the content duration {content_duration:.3}s")]
    OverlayExceedsContent {
        index: usize,
        end: f64,
        content_duration: f64,
    },

    #[error("Overlays {first} and {second} overlap")]
    OverlappingOverlays { first: usize, second: usize },

    #[error(
        "Crossfade {crossfade:.3}s is longer than half of the {clip} clip ({clip_duration:.3}s)"
    )]
    CrossfadeTooLong {
        crossfade: f64,
        clip: String,
        clip_duration: f64,
    },

    #[error("Referenced asset {expected} does not match supplied asset {actual}")]
    AssetMismatch { expected: AssetId, actual: AssetId },
}

fn check_number(field: &str, value: f64) -> Result<(), ValidationError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ValidationError::InvalidNumber {
            field: field.to_string(),
            value,
        })
    }
}

fn check_crossfade(crossfade: f64, clip: &str, asset: &VideoAsset) -> Result<(), ValidationError> {
    if crossfade > asset.duration / 2.0 + TIME_EPSILON {
        return Err(ValidationError::CrossfadeTooLong {
            crossfade,
            clip: clip.to_string(),
            clip_duration: asset.duration,
        });
    }
    Ok(())
}

fn check_reference(expected: &AssetId, asset: &VideoAsset) -> Result<(), ValidationError> {
    if expected != &asset.id {
        return Err(ValidationError::AssetMismatch {
            expected: expected.clone(),
            actual: asset.id.clone(),
        });
    }
    Ok(())
}

impl Composition {
    /// Number of sequential segments (intro, content, outro).
    pub fn segment_count(&self) -> usize {
        1 + usize::from(self.intro_asset_id.is_some()) + usize::from(self.outro_asset_id.is_some())
    }

    /// Every asset the render needs, in input order (intro, content, outro, overlays).
    pub fn referenced_assets(&self) -> Vec<AssetId> {
        let mut ids = Vec::with_capacity(self.segment_count() + self.overlay_configs.len());
        ids.extend(self.intro_asset_id.iter().cloned());
        ids.push(self.content_asset_id.clone());
        ids.extend(self.outro_asset_id.iter().cloned());
        for overlay in &self.overlay_configs {
            if !ids.contains(&overlay.asset_id) {
                ids.push(overlay.asset_id.clone());
            }
        }
        ids
    }

    /// Checks that need no asset metadata.
    pub fn validate_shape(&self) -> Result<(), ValidationError> {
        if self.content_asset_id.as_str().trim().is_empty() {
            return Err(ValidationError::MissingContent);
        }
        check_number("crossfadeDuration", self.crossfade_duration)?;

        for (index, overlay) in self.overlay_configs.iter().enumerate() {
            check_number(&format!("overlayConfigs[{index}].startTime"), overlay.start_time)?;
            check_number(&format!("overlayConfigs[{index}].duration"), overlay.duration)?;
            check_number(&format!("overlayConfigs[{index}].fadeIn"), overlay.transition.fade_in)?;
            check_number(&format!("overlayConfigs[{index}].fadeOut"), overlay.transition.fade_out)?;
            if overlay.duration <= 0.0 {
                return Err(ValidationError::EmptyOverlay { index });
            }
            if !(0.0..=1.0).contains(&overlay.opacity) {
                return Err(ValidationError::InvalidOpacity {
                    index,
                    opacity: overlay.opacity,
                });
            }
        }

        for (first, a) in self.overlay_configs.iter().enumerate() {
            for (offset, b) in self.overlay_configs[first + 1..].iter().enumerate() {
                let overlaps = a.start_time < b.end_time() - TIME_EPSILON
                    && b.start_time < a.end_time() - TIME_EPSILON;
                if overlaps {
                    return Err(ValidationError::OverlappingOverlays {
                        first,
                        second: first + 1 + offset,
                    });
                }
            }
        }

        Ok(())
    }

    /// Full validation against the resolved segment assets.
    pub fn validate(
        &self,
        content: &VideoAsset,
        intro: Option<&VideoAsset>,
        outro: Option<&VideoAsset>,
    ) -> Result<(), ValidationError> {
        self.validate_shape()?;
        check_reference(&self.content_asset_id, content)?;
        if let (Some(id), Some(asset)) = (&self.intro_asset_id, intro) {
            check_reference(id, asset)?;
        }
        if let (Some(id), Some(asset)) = (&self.outro_asset_id, outro) {
            check_reference(id, asset)?;
        }

        for (index, overlay) in self.overlay_configs.iter().enumerate() {
            if overlay.end_time() > content.duration + TIME_EPSILON {
                return Err(ValidationError::OverlayExceedsContent {
                    index,
                    end: overlay.end_time(),
                    content_duration: content.duration,
                });
            }
        }

        let crossfade = self.crossfade_duration;
        if crossfade > 0.0 {
            if let Some(intro) = intro {
                check_crossfade(crossfade, "intro", intro)?;
            }
            if intro.is_some() || outro.is_some() {
                check_crossfade(crossfade, "content", content)?;
            }
            if let Some(outro) = outro {
                check_crossfade(crossfade, "outro", outro)?;
            }
        }

        Ok(())
    }

    /// Expected output duration once segments are joined with crossfades.
    pub fn expected_duration(
        &self,
        content: &VideoAsset,
        intro: Option<&VideoAsset>,
        outro: Option<&VideoAsset>,
    ) -> f64 {
        let segments = [intro, Some(content), outro];
        let present: Vec<&VideoAsset> = segments.into_iter().flatten().collect();
        let total: f64 = present.iter().map(|a| a.duration).sum();
        let boundaries = present.len().saturating_sub(1) as f64;
        (total - self.crossfade_duration * boundaries).max(0.0)
    }

    /// Bump `updated_at`; the only mutation allowed after creation.
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::PositionPreset;

    fn content() -> VideoAsset {
        VideoAsset::new("content", "talk.mp4", 60.0, 1920, 1080)
    }

    fn overlay(start: f64, duration: f64) -> OverlayConfig {
        OverlayConfig {
            asset_id: AssetId::from("logo"),
            start_time: start,
            duration,
            position: OverlayPosition::preset(PositionPreset::TopLeft, 0.2),
            opacity: 0.8,
            transition: OverlayTransition::default(),
        }
    }

    fn composition() -> Composition {
        let now = Utc::now();
        Composition {
            id: CompositionId::new(),
            title: "t".into(),
            description: "d".into(),
            content_asset_id: AssetId::from("content"),
            intro_asset_id: None,
            outro_asset_id: None,
            overlay_configs: vec![overlay(5.0, 10.0)],
            crossfade_duration: 1.0,
            output: OutputOptions::default(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_valid_composition() {
        assert!(composition().validate(&content(), None, None).is_ok());
    }

    #[test]
    fn test_overlay_past_content_is_rejected() {
        let mut comp = composition();
        comp.overlay_configs = vec![overlay(55.0, 10.0)];
        let err = comp.validate(&content(), None, None).unwrap_err();
        assert!(matches!(err, ValidationError::OverlayExceedsContent { index: 0, .. }));
    }

    #[test]
    fn test_overlapping_overlays_are_rejected() {
        let mut comp = composition();
        comp.overlay_configs = vec![overlay(5.0, 10.0), overlay(14.0, 5.0)];
        assert_eq!(
            comp.validate_shape().unwrap_err(),
            ValidationError::OverlappingOverlays { first: 0, second: 1 }
        );

        // Back-to-back windows are fine
        comp.overlay_configs = vec![overlay(5.0, 10.0), overlay(15.0, 5.0)];
        assert!(comp.validate_shape().is_ok());
    }

    #[test]
    fn test_crossfade_longer_than_half_intro() {
        let mut comp = composition();
        let intro = VideoAsset::new("intro", "intro.mp4", 1.5, 1920, 1080);
        comp.intro_asset_id = Some(intro.id.clone());
        let err = comp.validate(&content(), Some(&intro), None).unwrap_err();
        assert!(matches!(err, ValidationError::CrossfadeTooLong { ref clip, .. } if clip == "intro"));
    }

    #[test]
    fn test_opacity_range() {
        let mut comp = composition();
        comp.overlay_configs[0].opacity = 1.5;
        assert!(matches!(
            comp.validate_shape(),
            Err(ValidationError::InvalidOpacity { index: 0, .. })
        ));
    }

    #[test]
    fn test_negative_crossfade() {
        let mut comp = composition();
        comp.crossfade_duration = -1.0;
        assert!(matches!(
            comp.validate_shape(),
            Err(ValidationError::InvalidNumber { .. })
        ));
    }

    #[test]
    fn test_asset_mismatch() {
        let comp = composition();
        let other = VideoAsset::new("other", "x.mp4", 60.0, 1920, 1080);
        assert!(matches!(
            comp.validate(&other, None, None),
            Err(ValidationError::AssetMismatch { .. })
        ));
    }

    #[test]
    fn test_expected_duration_subtracts_crossfades() {
        let mut comp = composition();
        let intro = VideoAsset::new("intro", "i.mp4", 5.0, 1920, 1080);
        let outro = VideoAsset::new("outro", "o.mp4", 4.0, 1920, 1080);
        comp.intro_asset_id = Some(intro.id.clone());
        comp.outro_asset_id = Some(outro.id.clone());
        // 5 + 60 + 4 - 2 * 1
        let d = comp.expected_duration(&content(), Some(&intro), Some(&outro));
        assert!((d - 67.0).abs() < 1e-9);
        assert_eq!(comp.segment_count(), 3);
    }

    #[test]
    fn test_referenced_assets_order_and_dedup() {
        let mut comp = composition();
        comp.intro_asset_id = Some("intro".into());
        comp.overlay_configs = vec![overlay(2.0, 3.0), overlay(10.0, 3.0)];
        let ids: Vec<String> = comp.referenced_assets().into_iter().map(|a| a.0).collect();
        assert_eq!(ids, vec!["intro", "content", "logo"]);
    }

    #[test]
    fn test_wire_format_is_camel_case() {
        let json = serde_json::to_value(composition()).unwrap();
        assert!(json.get("contentAssetId").is_some());
        assert!(json.get("crossfadeDuration").is_some());
        assert!(json.get("introAssetId").is_none());
        let overlay = &json["overlayConfigs"][0];
        assert_eq!(overlay["position"]["preset"], "top-left");
        assert_eq!(overlay["transition"]["fadeIn"], 0.5);
        assert!(overlay.get("startTime").is_some());
    }

    #[test]
    fn test_from_timing_carries_scale_into_size() {
        let timing = OverlayTiming {
            start_time: 3.0,
            duration: 4.0,
            position: OverlayPosition::preset(PositionPreset::Center, 0.1),
            scale: 0.3,
            opacity: 0.6,
            fade_in: 0.2,
            fade_out: 0.4,
        };
        let cfg = OverlayConfig::from_timing("logo".into(), &timing);
        assert_eq!(cfg.position.size, 0.3);
        assert_eq!(cfg.position.preset, PositionPreset::Center);
        assert_eq!(cfg.transition.fade_out, 0.4);
        assert_eq!(cfg.end_time(), 7.0);
    }
}
