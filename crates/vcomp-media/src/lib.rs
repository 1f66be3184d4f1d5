//! FFmpeg rendering for compositions.
//!
//! This crate provides:
//! - Multi-input FFmpeg command building
//! - Progress parsing for both `-progress` and stats-line output
//! - Cancellation, timeout and stderr capture for the child process
//! - Filter graphs for crossfaded segments and timed overlays
//! - The [`Renderer`] that resolves, runs and publishes one composition

pub mod command;
pub mod error;
pub mod filters;
pub mod fs_utils;
pub mod metrics;
pub mod probe;
pub mod progress;
pub mod render;

pub use command::{check_ffmpeg, check_ffprobe, FfmpegCommand, FfmpegInput, FfmpegRunner};
pub use error::{MediaError, MediaResult};
pub use probe::{probe_video, VideoInfo};
pub use progress::{FfmpegProgress, ProgressThrottle, RenderProgress};
pub use render::{
    AssetSource, RenderContext, RenderOutput, Renderer, RendererConfig, ResolvedAssets,
    DEFAULT_RENDER_TIMEOUT_MS,
};
