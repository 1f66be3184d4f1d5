//! Overlay scheduling.
//!
//! Windows are spread evenly across `[crossfade, duration - crossfade]`:
//! each instance lasts `min(overlay, max_overlay_duration)`, at most
//! `max_instances` fit with `min_gap` between them, and the leftover time is
//! shared equally before, between and after the instances.

use serde::{Deserialize, Serialize};

use vcomp_models::overlay::{DEFAULT_OVERLAY_FADE, DEFAULT_OVERLAY_OPACITY, DEFAULT_OVERLAY_SCALE};
use vcomp_models::{OverlayPosition, OverlayTiming, PositionPreset, VideoAsset};

/// Tunables for [`compute_timings`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayTimerConfig {
    pub opacity: f64,
    /// Fade in and out; clamped to half of each instance
    pub fade: f64,
    /// Overlay width relative to the output width
    pub scale: f64,
    /// Shortest window worth showing
    pub min_viable_duration: f64,
    /// Space kept between consecutive instances
    pub min_gap: f64,
    pub max_instances: usize,
    /// Longest single instance
    pub max_overlay_duration: f64,
    /// Positions cycled across instances
    pub presets: Vec<PositionPreset>,
}

impl Default for OverlayTimerConfig {
    fn default() -> Self {
        Self {
            opacity: DEFAULT_OVERLAY_OPACITY,
            fade: DEFAULT_OVERLAY_FADE,
            scale: DEFAULT_OVERLAY_SCALE,
            min_viable_duration: 1.0,
            min_gap: 2.0,
            max_instances: 3,
            max_overlay_duration: 5.0,
            presets: PositionPreset::ROTATION.to_vec(),
        }
    }
}

/// Per-request changes to the timer defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OverlayOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub opacity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fade: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_instances: Option<usize>,
    /// Pin every instance to one position instead of rotating
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<PositionPreset>,
}

impl OverlayOverrides {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, base: &OverlayTimerConfig) -> OverlayTimerConfig {
        let mut config = base.clone();
        if let Some(opacity) = self.opacity.filter(|v| v.is_finite()) {
            config.opacity = opacity.clamp(0.0, 1.0);
        }
        if let Some(scale) = self.scale.filter(|v| v.is_finite() && *v > 0.0) {
            config.scale = scale.min(1.0);
        }
        if let Some(fade) = self.fade.filter(|v| v.is_finite()) {
            config.fade = fade.max(0.0);
        }
        if let Some(max_instances) = self.max_instances {
            config.max_instances = max_instances;
        }
        if let Some(position) = self.position {
            config.presets = vec![position];
        }
        config
    }
}

/// Schedule overlay windows over a content clip of `content_duration` seconds.
///
/// Returns no timings when there is no overlay or the usable window is
/// shorter than `min_viable_duration`.
pub fn compute_timings(
    content_duration: f64,
    overlay: Option<&VideoAsset>,
    crossfade: f64,
    config: &OverlayTimerConfig,
) -> Vec<OverlayTiming> {
    let Some(overlay) = overlay else {
        return Vec::new();
    };
    if !content_duration.is_finite() || !overlay.duration.is_finite() || config.max_instances == 0 {
        return Vec::new();
    }

    let crossfade = if crossfade.is_finite() { crossfade.max(0.0) } else { 0.0 };
    let window_start = crossfade;
    let window_end = content_duration - crossfade;
    let usable = window_end - window_start;
    let min_viable = config.min_viable_duration.max(0.0);
    if usable < min_viable || usable <= 0.0 {
        return Vec::new();
    }

    let duration = overlay
        .duration
        .min(config.max_overlay_duration)
        .min(usable);
    if duration < min_viable || duration <= 0.0 {
        return Vec::new();
    }

    let gap = config.min_gap.max(0.0);
    let fits = ((usable + gap) / (duration + gap)).floor() as usize;
    let count = fits.clamp(1, config.max_instances);

    let free = (usable - count as f64 * duration - (count - 1) as f64 * gap).max(0.0);
    let slack = free / (count + 1) as f64;
    let stride = duration + gap + slack;

    let fade = config.fade.max(0.0).min(duration / 2.0);
    let presets: &[PositionPreset] = if config.presets.is_empty() {
        PositionPreset::ROTATION
    } else {
        &config.presets
    };

    (0..count)
        .map(|i| {
            let start = window_start + slack + i as f64 * stride;
            // Keep float drift from pushing the last window past the end
            let duration = duration.min(window_end - start);
            let preset = presets[i % presets.len()];
            OverlayTiming {
                start_time: start,
                duration,
                position: OverlayPosition::preset(preset, config.scale),
                scale: config.scale,
                opacity: config.opacity.clamp(0.0, 1.0),
                fade_in: fade,
                fade_out: fade,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overlay(duration: f64) -> VideoAsset {
        VideoAsset::new("ov", "ov.mov", duration, 512, 512).with_tag("overlay")
    }

    fn assert_invariants(timings: &[OverlayTiming], d: f64, c: f64) {
        for t in timings {
            assert!(t.start_time >= c - 1e-9, "start {} < {}", t.start_time, c);
            assert!(t.end_time() <= d - c + 1e-9, "end {} > {}", t.end_time(), d - c);
            assert!(t.duration > 0.0);
            assert!(t.fade_in + t.fade_out <= t.duration + 1e-9);
        }
        for pair in timings.windows(2) {
            assert!(!pair[0].overlaps(&pair[1]));
        }
    }

    #[test]
    fn test_sixty_second_content() {
        let config = OverlayTimerConfig::default();
        let timings = compute_timings(60.0, Some(&overlay(4.0)), 1.0, &config);

        assert_eq!(timings.len(), 3);
        assert_invariants(&timings, 60.0, 1.0);
        for t in &timings {
            assert!(t.start_time >= 1.0 && t.end_time() <= 59.0);
            assert_eq!(t.duration, 4.0);
            assert_eq!(t.opacity, 0.8);
            assert_eq!(t.fade_in, 0.5);
        }
    }

    #[test]
    fn test_invariants_hold_across_durations() {
        let config = OverlayTimerConfig::default();
        for d in [0.5, 1.0, 2.5, 3.0, 7.0, 10.0, 17.3, 45.0, 120.0, 3600.0] {
            for c in [0.0, 0.25, 0.5, 1.0, 2.0] {
                if c >= d / 2.0 {
                    continue;
                }
                for ov in [0.3, 1.0, 3.0, 12.0] {
                    let timings = compute_timings(d, Some(&overlay(ov)), c, &config);
                    assert_invariants(&timings, d, c);
                    assert!(timings.len() <= config.max_instances);
                }
            }
        }
    }

    #[test]
    fn test_no_overlay_or_tiny_window() {
        let config = OverlayTimerConfig::default();
        assert!(compute_timings(60.0, None, 1.0, &config).is_empty());
        // usable window 0.8s < 1.0s minimum
        assert!(compute_timings(2.8, Some(&overlay(5.0)), 1.0, &config).is_empty());
        // overlay itself shorter than the minimum
        assert!(compute_timings(60.0, Some(&overlay(0.4)), 1.0, &config).is_empty());
    }

    #[test]
    fn test_short_content_gets_one_instance() {
        let config = OverlayTimerConfig::default();
        let timings = compute_timings(8.0, Some(&overlay(5.0)), 0.5, &config);
        assert_eq!(timings.len(), 1);
        assert_invariants(&timings, 8.0, 0.5);
        // centred in the usable window
        assert!((timings[0].start_time - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_presets_rotate() {
        let config = OverlayTimerConfig {
            max_instances: 6,
            ..Default::default()
        };
        let timings = compute_timings(120.0, Some(&overlay(3.0)), 0.0, &config);
        let presets: Vec<PositionPreset> = timings.iter().map(|t| t.position.preset).collect();
        assert_eq!(
            presets,
            vec![
                PositionPreset::BottomRight,
                PositionPreset::TopLeft,
                PositionPreset::TopRight,
                PositionPreset::BottomLeft,
                PositionPreset::Center,
                PositionPreset::BottomRight,
            ]
        );
    }

    #[test]
    fn test_fade_clamped_to_half_instance() {
        let config = OverlayTimerConfig {
            fade: 3.0,
            ..Default::default()
        };
        let timings = compute_timings(30.0, Some(&overlay(2.0)), 0.0, &config);
        assert!(timings.iter().all(|t| t.fade_in == 1.0 && t.fade_out == 1.0));
    }

    #[test]
    fn test_overrides() {
        let overrides = OverlayOverrides {
            opacity: Some(1.5),
            position: Some(PositionPreset::TopLeft),
            max_instances: Some(1),
            ..Default::default()
        };
        let config = overrides.apply(&OverlayTimerConfig::default());
        assert_eq!(config.opacity, 1.0);

        let timings = compute_timings(60.0, Some(&overlay(4.0)), 1.0, &config);
        assert_eq!(timings.len(), 1);
        assert_eq!(timings[0].position.preset, PositionPreset::TopLeft);
        assert!(OverlayOverrides::default().is_empty());
    }
}
