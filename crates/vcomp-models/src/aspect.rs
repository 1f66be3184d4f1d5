//! Aspect-ratio categories used to match compatible clips.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Relative tolerance when snapping real dimensions to a standard ratio.
const RATIO_TOLERANCE: f64 = 0.03;

/// Coarse width:height classification of a clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
pub enum AspectRatioCategory {
    #[serde(rename = "16:9")]
    Landscape,
    #[serde(rename = "9:16")]
    Portrait,
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "4:3")]
    Standard,
    #[serde(rename = "3:4")]
    StandardPortrait,
    #[serde(rename = "21:9")]
    Ultrawide,
    #[serde(rename = "4:5")]
    InstagramPortrait,
    #[serde(rename = "other")]
    Other,
}

impl AspectRatioCategory {
    /// Every category with a fixed ratio, in matching order.
    pub const STANDARD: &'static [AspectRatioCategory] = &[
        AspectRatioCategory::Landscape,
        AspectRatioCategory::Portrait,
        AspectRatioCategory::Square,
        AspectRatioCategory::Standard,
        AspectRatioCategory::StandardPortrait,
        AspectRatioCategory::Ultrawide,
        AspectRatioCategory::InstagramPortrait,
    ];

    /// Width/height parts of the ratio (`None` for `Other`).
    pub const fn parts(&self) -> Option<(u32, u32)> {
        match self {
            AspectRatioCategory::Landscape => Some((16, 9)),
            AspectRatioCategory::Portrait => Some((9, 16)),
            AspectRatioCategory::Square => Some((1, 1)),
            AspectRatioCategory::Standard => Some((4, 3)),
            AspectRatioCategory::StandardPortrait => Some((3, 4)),
            AspectRatioCategory::Ultrawide => Some((21, 9)),
            AspectRatioCategory::InstagramPortrait => Some((4, 5)),
            AspectRatioCategory::Other => None,
        }
    }

    /// Ratio as a decimal.
    pub fn as_f64(&self) -> Option<f64> {
        self.parts().map(|(w, h)| w as f64 / h as f64)
    }

    /// Classify pixel dimensions into the nearest standard category.
    pub fn from_dimensions(width: u32, height: u32) -> Self {
        if width == 0 || height == 0 {
            return AspectRatioCategory::Other;
        }
        let ratio = width as f64 / height as f64;

        Self::STANDARD
            .iter()
            .filter_map(|cat| {
                let target = cat.as_f64()?;
                let err = (ratio - target).abs() / target;
                (err <= RATIO_TOLERANCE).then_some((*cat, err))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(cat, _)| cat)
            .unwrap_or(AspectRatioCategory::Other)
    }

    pub fn is_portrait(&self) -> bool {
        matches!(self.parts(), Some((w, h)) if h > w)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatioCategory::Landscape => "16:9",
            AspectRatioCategory::Portrait => "9:16",
            AspectRatioCategory::Square => "1:1",
            AspectRatioCategory::Standard => "4:3",
            AspectRatioCategory::StandardPortrait => "3:4",
            AspectRatioCategory::Ultrawide => "21:9",
            AspectRatioCategory::InstagramPortrait => "4:5",
            AspectRatioCategory::Other => "other",
        }
    }
}

impl fmt::Display for AspectRatioCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatioCategory {
    type Err = AspectRatioParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("other") {
            return Ok(AspectRatioCategory::Other);
        }

        let (w, h) = trimmed
            .split_once(':')
            .ok_or_else(|| AspectRatioParseError::InvalidFormat(s.to_string()))?;
        let width: u32 = w
            .parse()
            .map_err(|_| AspectRatioParseError::InvalidNumber(w.to_string()))?;
        let height: u32 = h
            .parse()
            .map_err(|_| AspectRatioParseError::InvalidNumber(h.to_string()))?;

        if width == 0 || height == 0 {
            return Err(AspectRatioParseError::ZeroValue);
        }

        Ok(Self::from_dimensions(width, height))
    }
}

#[derive(Debug, Error)]
pub enum AspectRatioParseError {
    #[error("Invalid aspect ratio format: {0}, expected 'W:H'")]
    InvalidFormat(String),
    #[error("Invalid number in aspect ratio: {0}")]
    InvalidNumber(String),
    #[error("Aspect ratio cannot have zero values")]
    ZeroValue,
}
