//! Catalog asset models.
//!
//! Assets are a tagged variant ([`MediaAsset`]) rather than one type with
//! optional behaviours bolted on. What an asset can do is described by its
//! [`Capabilities`], and turning one kind into another (for example pulling
//! the audio track out of a video) is an explicit conversion that returns a
//! new value.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::aspect::AspectRatioCategory;

/// Tag marking an asset as part of the intro pool.
pub const TAG_INTRO: &str = "intro";
/// Tag marking an asset as part of the outro pool.
pub const TAG_OUTRO: &str = "outro";
/// Tag marking an asset as part of the overlay pool.
pub const TAG_OVERLAY: &str = "overlay";

/// Unique identifier for a catalog asset.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct AssetId(pub String);

impl AssetId {
    /// Generate a new random asset ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Create from an existing string.
    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Get the inner string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for AssetId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for AssetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for AssetId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Role an asset plays in a composition, backed by a catalog tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AssetRole {
    Intro,
    Outro,
    Overlay,
}

impl AssetRole {
    pub const ALL: &'static [AssetRole] = &[AssetRole::Intro, AssetRole::Outro, AssetRole::Overlay];

    /// Catalog tag for this role's pool.
    pub fn tag(&self) -> &'static str {
        match self {
            AssetRole::Intro => TAG_INTRO,
            AssetRole::Outro => TAG_OUTRO,
            AssetRole::Overlay => TAG_OVERLAY,
        }
    }

    /// Whether candidates for this role must share the content's aspect ratio.
    pub fn requires_matching_aspect(&self) -> bool {
        matches!(self, AssetRole::Intro | AssetRole::Outro)
    }
}

impl fmt::Display for AssetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// A single thing an asset can be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Capability {
    /// Carries a video stream
    HasVideo,
    /// Carries an audio stream
    HasAudio,
    /// Can be composited on top of another clip
    Overlayable,
    /// Has a meaningful duration
    Timed,
}

/// Set of capabilities held by an asset.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct Capabilities(BTreeSet<Capability>);

impl Capabilities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, capability: Capability) -> Self {
        self.0.insert(capability);
        self
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }
}

impl FromIterator<Capability> for Capabilities {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

fn default_true() -> bool {
    true
}

/// A video clip owned by the asset catalog.
///
/// Immutable once ingested; the composition engine only reads it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VideoAsset {
    /// Catalog identity
    pub id: AssetId,
    /// Original filename
    pub filename: String,
    /// Duration in seconds
    pub duration: f64,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Derived from width/height at ingestion time
    pub aspect_ratio: AspectRatioCategory,
    /// Free-form tags (`intro`, `outro`, `overlay`, ...)
    #[serde(default)]
    pub tags: Vec<String>,
    /// Whether the clip carries an audio stream
    #[serde(default = "default_true")]
    pub has_audio: bool,
    /// Local path to the bytes, when the catalog keeps them on disk
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// When the asset was registered
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl VideoAsset {
    /// Create a new asset; the aspect-ratio category is derived from the dimensions.
    pub fn new(
        id: impl Into<AssetId>,
        filename: impl Into<String>,
        duration: f64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            id: id.into(),
            filename: filename.into(),
            duration,
            width,
            height,
            aspect_ratio: AspectRatioCategory::from_dimensions(width, height),
            tags: Vec::new(),
            has_audio: true,
            path: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        if !self.has_tag(&tag) {
            self.tags.push(tag);
        }
        self
    }

    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    pub fn without_audio(mut self) -> Self {
        self.has_audio = false;
        self
    }

    /// Case-insensitive tag check.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag))
    }

    /// Whether this asset belongs to the pool for `role`.
    pub fn has_role(&self, role: AssetRole) -> bool {
        self.has_tag(role.tag())
    }

    pub fn capabilities(&self) -> Capabilities {
        let mut caps = Capabilities::new()
            .with(Capability::HasVideo)
            .with(Capability::Overlayable)
            .with(Capability::Timed);
        if self.has_audio {
            caps = caps.with(Capability::HasAudio);
        }
        caps
    }

    /// Pull the audio track out as a standalone asset value.
    ///
    /// Returns `None` when the clip is silent.
    pub fn extract_audio(&self) -> Option<AudioAsset> {
        if !self.has_audio {
            return None;
        }
        Some(AudioAsset {
            id: AssetId::from_string(format!("{}:audio", self.id)),
            source_id: Some(self.id.clone()),
            filename: self.filename.clone(),
            duration: self.duration,
            path: self.path.clone(),
        })
    }
}

/// Standalone audio track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AudioAsset {
    pub id: AssetId,
    /// Video asset this track was extracted from, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_id: Option<AssetId>,
    pub filename: String,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Still image (logos, lower thirds).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImageAsset {
    pub id: AssetId,
    pub filename: String,
    pub width: u32,
    pub height: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

/// Any asset the catalog can hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MediaAsset {
    Video(VideoAsset),
    Audio(AudioAsset),
    Image(ImageAsset),
}

impl MediaAsset {
    pub fn id(&self) -> &AssetId {
        match self {
            MediaAsset::Video(v) => &v.id,
            MediaAsset::Audio(a) => &a.id,
            MediaAsset::Image(i) => &i.id,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            MediaAsset::Video(v) => v.capabilities(),
            MediaAsset::Audio(_) => Capabilities::new()
                .with(Capability::HasAudio)
                .with(Capability::Timed),
            MediaAsset::Image(_) => Capabilities::new()
                .with(Capability::HasVideo)
                .with(Capability::Overlayable),
        }
    }

    pub fn as_video(&self) -> Option<&VideoAsset> {
        match self {
            MediaAsset::Video(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_video(self) -> Option<VideoAsset> {
        match self {
            MediaAsset::Video(v) => Some(v),
            _ => None,
        }
    }
}

impl From<VideoAsset> for MediaAsset {
    fn from(v: VideoAsset) -> Self {
        MediaAsset::Video(v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_derives_aspect_ratio() {
        let asset = VideoAsset::new("a1", "clip.mp4", 12.5, 1080, 1920);
        assert_eq!(asset.aspect_ratio, AspectRatioCategory::Portrait);
        assert!(asset.tags.is_empty());
        assert!(asset.has_audio);
    }

    #[test]
    fn test_tags_are_case_insensitive_and_deduplicated() {
        let asset = VideoAsset::new("a1", "intro.mp4", 3.0, 1920, 1080)
            .with_tag("Intro")
            .with_tag("intro");
        assert_eq!(asset.tags.len(), 1);
        assert!(asset.has_role(AssetRole::Intro));
        assert!(!asset.has_role(AssetRole::Outro));
    }

    #[test]
    fn test_capabilities_follow_audio() {
        let with_audio = VideoAsset::new("a1", "a.mp4", 1.0, 16, 9);
        assert!(with_audio.capabilities().contains(Capability::HasAudio));

        let silent = with_audio.clone().without_audio();
        assert!(!silent.capabilities().contains(Capability::HasAudio));
        assert!(silent.capabilities().contains(Capability::Overlayable));
    }

    #[test]
    fn test_extract_audio_is_explicit_conversion() {
        let video = VideoAsset::new("v1", "talk.mp4", 42.0, 1920, 1080).with_path("/tmp/talk.mp4");
        let audio = video.extract_audio().unwrap();
        assert_eq!(audio.source_id, Some(video.id.clone()));
        assert_eq!(audio.duration, 42.0);
        assert_eq!(audio.path.as_deref(), video.path.as_deref());

        assert!(video.without_audio().extract_audio().is_none());
    }

    #[test]
    fn test_media_asset_match() {
        let media: MediaAsset = VideoAsset::new("v1", "a.mp4", 1.0, 1, 1).into();
        assert!(media.as_video().is_some());
        assert!(media.capabilities().contains(Capability::Timed));

        let image = MediaAsset::Image(ImageAsset {
            id: "logo".into(),
            filename: "logo.png".into(),
            width: 200,
            height: 200,
            path: None,
        });
        assert!(image.as_video().is_none());
        assert!(!image.capabilities().contains(Capability::Timed));
    }

    #[test]
    fn test_video_asset_json_shape() {
        let asset = VideoAsset::new("v1", "a.mp4", 5.0, 1920, 1080).with_tag("overlay");
        let json = serde_json::to_value(&asset).unwrap();
        assert_eq!(json["aspectRatio"], "16:9");
        assert_eq!(json["hasAudio"], true);
        assert!(json.get("path").is_none());
    }
}
