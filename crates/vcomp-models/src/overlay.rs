//! Overlay placement and timing.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default overlay opacity
pub const DEFAULT_OVERLAY_OPACITY: f64 = 0.8;
/// Default fade-in/fade-out length in seconds
pub const DEFAULT_OVERLAY_FADE: f64 = 0.5;
/// Default overlay width relative to the output width
pub const DEFAULT_OVERLAY_SCALE: f64 = 0.25;
/// Default margin from the anchored edges, relative to the output size
pub const DEFAULT_OVERLAY_MARGIN: f64 = 0.04;

/// Named overlay anchor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "kebab-case")]
pub enum PositionPreset {
    TopLeft,
    TopRight,
    BottomLeft,
    #[default]
    BottomRight,
    Center,
    /// Placed at the explicit `x`/`y` coordinates
    Custom,
}

impl PositionPreset {
    /// Rotation order used when scheduling repeated overlays.
    pub const ROTATION: &'static [PositionPreset] = &[
        PositionPreset::BottomRight,
        PositionPreset::TopLeft,
        PositionPreset::TopRight,
        PositionPreset::BottomLeft,
        PositionPreset::Center,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PositionPreset::TopLeft => "top-left",
            PositionPreset::TopRight => "top-right",
            PositionPreset::BottomLeft => "bottom-left",
            PositionPreset::BottomRight => "bottom-right",
            PositionPreset::Center => "center",
            PositionPreset::Custom => "custom",
        }
    }
}

impl fmt::Display for PositionPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PositionPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('_', "-").as_str() {
            "top-left" => Ok(PositionPreset::TopLeft),
            "top-right" => Ok(PositionPreset::TopRight),
            "bottom-left" => Ok(PositionPreset::BottomLeft),
            "bottom-right" => Ok(PositionPreset::BottomRight),
            "center" | "centre" => Ok(PositionPreset::Center),
            "custom" => Ok(PositionPreset::Custom),
            _ => Err(format!("Unknown position preset: {}", s)),
        }
    }
}

/// Where an overlay sits on the frame.
///
/// All values are fractions of the output frame. For named presets `x`/`y`
/// are the margins from the anchored edges; for [`PositionPreset::Custom`]
/// they are the top-left corner. `size` is the overlay width relative to the
/// output width.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OverlayPosition {
    pub preset: PositionPreset,
    pub x: f64,
    pub y: f64,
    pub size: f64,
}

impl OverlayPosition {
    /// Anchor at a named preset with the default margin.
    pub fn preset(preset: PositionPreset, size: f64) -> Self {
        let margin = if preset == PositionPreset::Center {
            0.0
        } else {
            DEFAULT_OVERLAY_MARGIN
        };
        Self {
            preset,
            x: margin,
            y: margin,
            size,
        }
    }

    /// Explicit top-left coordinates.
    pub fn custom(x: f64, y: f64, size: f64) -> Self {
        Self {
            preset: PositionPreset::Custom,
            x,
            y,
            size,
        }
    }
}

impl Default for OverlayPosition {
    fn default() -> Self {
        Self::preset(PositionPreset::default(), DEFAULT_OVERLAY_SCALE)
    }
}

/// Fade lengths applied at each end of an overlay window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverlayTransition {
    pub fade_in: f64,
    pub fade_out: f64,
}

impl Default for OverlayTransition {
    fn default() -> Self {
        Self {
            fade_in: DEFAULT_OVERLAY_FADE,
            fade_out: DEFAULT_OVERLAY_FADE,
        }
    }
}

/// One scheduled overlay window, relative to the start of the content clip.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct OverlayTiming {
    pub start_time: f64,
    pub duration: f64,
    pub position: OverlayPosition,
    /// Overlay width relative to the output width
    pub scale: f64,
    pub opacity: f64,
    pub fade_in: f64,
    pub fade_out: f64,
}

impl OverlayTiming {
    pub fn end_time(&self) -> f64 {
        self.start_time + self.duration
    }

    /// Whether two windows share any time.
    pub fn overlaps(&self, other: &OverlayTiming) -> bool {
        self.start_time < other.end_time() && other.start_time < self.end_time()
    }
}
