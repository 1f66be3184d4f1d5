//! Shared data models for the composition engine.
//!
//! This crate provides Serde-serializable types for:
//! - Catalog assets and aspect-ratio categories
//! - Compositions, overlay configs and output options
//! - Overlay timings and asset selections
//! - Job identity, state and status views

pub mod aspect;
pub mod asset;
pub mod composition;
pub mod encoding;
pub mod job;
pub mod overlay;
pub mod selection;

// Re-export common types
pub use aspect::{AspectRatioCategory, AspectRatioParseError};
pub use asset::{
    AssetId, AssetRole, AudioAsset, Capabilities, Capability, ImageAsset, MediaAsset, VideoAsset,
    TAG_INTRO, TAG_OUTRO, TAG_OVERLAY,
};
pub use composition::{Composition, CompositionId, OverlayConfig, ValidationError, TIME_EPSILON};
pub use encoding::{HardwareAccel, OutputFormat, OutputOptions, Resolution};
pub use job::{JobId, JobState, JobStatusView, Priority};
pub use overlay::{OverlayPosition, OverlayTiming, OverlayTransition, PositionPreset};
pub use selection::SelectedAssets;
