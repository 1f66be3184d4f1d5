//! Composition renderer.
//!
//! Turns a [`Composition`] into one FFmpeg invocation, runs it under a
//! wall-clock limit and publishes the result under the output directory.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};

use vcomp_models::encoding::AUDIO_SAMPLE_RATE;
use vcomp_models::{AssetId, Composition, HardwareAccel, Resolution, VideoAsset};

use crate::command::{FfmpegCommand, FfmpegInput, FfmpegRunner};
use crate::error::{MediaError, MediaResult};
use crate::filters::{
    build_filter_graph, content_offset, GraphSpec, OverlaySpec, SegmentAudio, SegmentSpec,
    AUDIO_OUT, VIDEO_OUT,
};
use crate::fs_utils::{publish_file, remove_dir_quietly};
use crate::metrics;
use crate::progress::{RenderProgress, DEFAULT_PROGRESS_THROTTLE};

/// Default wall-clock limit for one render.
pub const DEFAULT_RENDER_TIMEOUT_MS: u64 = 600_000;

/// Resolves asset ids to locally readable media.
#[async_trait]
pub trait AssetSource: Send + Sync {
    /// Return the asset with `path` set to a readable local file.
    async fn resolve(&self, id: &AssetId) -> MediaResult<VideoAsset>;
}

/// Renderer configuration.
#[derive(Debug, Clone)]
pub struct RendererConfig {
    /// FFmpeg binary; a bare name is looked up on PATH
    pub ffmpeg_path: PathBuf,
    /// Parent of the per-job scratch directories
    pub work_dir: PathBuf,
    /// Where finished renders are published
    pub output_dir: PathBuf,
    /// Wall-clock limit per render
    pub timeout: Duration,
    /// Minimum interval between progress events
    pub progress_throttle: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: PathBuf::from("ffmpeg"),
            work_dir: std::env::temp_dir().join("vcomp"),
            output_dir: PathBuf::from("output"),
            timeout: Duration::from_millis(DEFAULT_RENDER_TIMEOUT_MS),
            progress_throttle: DEFAULT_PROGRESS_THROTTLE,
        }
    }
}

impl RendererConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ffmpeg_path: std::env::var("FFMPEG_PATH")
                .map(PathBuf::from)
                .unwrap_or(defaults.ffmpeg_path),
            work_dir: defaults.work_dir,
            output_dir: defaults.output_dir,
            timeout: Duration::from_millis(
                std::env::var("RENDER_TIMEOUT_MS")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(DEFAULT_RENDER_TIMEOUT_MS),
            ),
            progress_throttle: std::env::var("RENDER_PROGRESS_THROTTLE_MS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.progress_throttle),
        }
    }

    pub fn with_dirs(mut self, work_dir: impl Into<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = work_dir.into();
        self.output_dir = output_dir.into();
        self
    }

    pub fn with_ffmpeg_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.ffmpeg_path = path.into();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// A published render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOutput {
    pub path: PathBuf,
    /// Expected output length in seconds
    pub duration: f64,
    pub width: u32,
    pub height: u32,
    pub size_bytes: u64,
}

/// Per-render channels.
#[derive(Debug, Default)]
pub struct RenderContext {
    /// Names the scratch directory
    pub job_id: String,
    pub progress: Option<mpsc::Sender<RenderProgress>>,
    pub cancel: Option<watch::Receiver<bool>>,
}

impl RenderContext {
    pub fn new(job_id: impl Into<String>) -> Self {
        Self {
            job_id: job_id.into(),
            progress: None,
            cancel: None,
        }
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<RenderProgress>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_cancel(mut self, rx: watch::Receiver<bool>) -> Self {
        self.cancel = Some(rx);
        self
    }
}

/// Every asset a composition references, with local paths.
#[derive(Debug, Clone)]
pub struct ResolvedAssets {
    pub content: VideoAsset,
    pub intro: Option<VideoAsset>,
    pub outro: Option<VideoAsset>,
    pub overlays: HashMap<AssetId, VideoAsset>,
}

impl ResolvedAssets {
    fn overlay(&self, id: &AssetId) -> MediaResult<&VideoAsset> {
        self.overlays
            .get(id)
            .ok_or_else(|| MediaError::asset_resolution(id, "overlay asset was not resolved"))
    }
}

/// A ready-to-run invocation.
#[derive(Debug, Clone)]
pub struct RenderPlan {
    pub command: FfmpegCommand,
    pub expected_duration: f64,
    pub resolution: Resolution,
}

fn local_path(asset: &VideoAsset) -> MediaResult<&Path> {
    asset
        .path
        .as_deref()
        .ok_or_else(|| MediaError::asset_resolution(&asset.id, "asset has no local path"))
}

/// Resolve every id the composition references.
pub async fn resolve_assets(
    source: &dyn AssetSource,
    composition: &Composition,
) -> MediaResult<ResolvedAssets> {
    let mut resolved = HashMap::new();
    for id in composition.referenced_assets() {
        let asset = source.resolve(&id).await.map_err(|e| match e {
            MediaError::AssetResolution { .. } => e,
            other => MediaError::asset_resolution(&id, other.to_string()),
        })?;
        let path = local_path(&asset)?;
        if !tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(MediaError::asset_resolution(
                &id,
                format!("file not found: {}", path.display()),
            ));
        }
        resolved.insert(id, asset);
    }

    let take = |id: &AssetId| {
        resolved
            .get(id)
            .cloned()
            .ok_or_else(|| MediaError::asset_resolution(id, "asset was not resolved"))
    };
    let content = take(&composition.content_asset_id)?;
    let intro = composition.intro_asset_id.as_ref().map(&take).transpose()?;
    let outro = composition.outro_asset_id.as_ref().map(&take).transpose()?;
    let overlays = composition
        .overlay_configs
        .iter()
        .map(|o| take(&o.asset_id).map(|a| (o.asset_id.clone(), a)))
        .collect::<MediaResult<HashMap<_, _>>>()?;

    Ok(ResolvedAssets {
        content,
        intro,
        outro,
        overlays,
    })
}

/// Lay out inputs, filter graph and encoder flags for one composition.
pub fn plan_render(
    composition: &Composition,
    assets: &ResolvedAssets,
    output: &Path,
) -> MediaResult<RenderPlan> {
    let options = &composition.output;
    let accel = options.effective_accel();
    let (global_args, per_input_args) = match accel {
        HardwareAccel::Vaapi => (accel.input_args(), Vec::new()),
        _ => (Vec::new(), accel.input_args()),
    };

    let mut command = FfmpegCommand::new(output).global_args(global_args);
    let mut segments = Vec::with_capacity(composition.segment_count());

    let sequence = [
        assets.intro.as_ref(),
        Some(&assets.content),
        assets.outro.as_ref(),
    ];
    for asset in sequence.into_iter().flatten() {
        let input = command.push_input(
            FfmpegInput::file(local_path(asset)?).with_args(per_input_args.iter().cloned()),
        );
        let audio = if asset.has_audio {
            SegmentAudio::Stream
        } else {
            let silence = command.push_input(
                FfmpegInput::lavfi(format!("anullsrc=r={AUDIO_SAMPLE_RATE}:cl=stereo"))
                    .with_args(["-t".to_string(), format!("{:.3}", asset.duration)]),
            );
            SegmentAudio::Silence(silence)
        };
        segments.push(SegmentSpec {
            input,
            duration: asset.duration,
            audio,
        });
    }

    let mut overlays = Vec::with_capacity(composition.overlay_configs.len());
    for config in &composition.overlay_configs {
        let asset = assets.overlay(&config.asset_id)?;
        let input = command.push_input(FfmpegInput::file(local_path(asset)?));
        overlays.push(OverlaySpec {
            input,
            config: config.clone(),
        });
    }

    let resolution = options
        .resolution
        .unwrap_or(Resolution::new(assets.content.width, assets.content.height))
        .even();

    let spec = GraphSpec {
        resolution,
        fps: options.fps,
        crossfade: composition.crossfade_duration,
        segments,
        overlays,
        overlay_offset: content_offset(
            assets.intro.as_ref().map(|a| a.duration),
            composition.crossfade_duration,
        ),
        upload_filter: accel.upload_filter(),
    };

    let expected_duration = spec.output_duration();
    let command = command
        .filter_complex(build_filter_graph(&spec))
        .map(format!("[{VIDEO_OUT}]"))
        .map(format!("[{AUDIO_OUT}]"))
        .output_args(options.to_ffmpeg_args());

    Ok(RenderPlan {
        command,
        expected_duration,
        resolution,
    })
}

/// Renders compositions with FFmpeg.
pub struct Renderer {
    config: RendererConfig,
}

impl Renderer {
    pub fn new(config: RendererConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Final location for a composition's render.
    pub fn output_path(&self, composition: &Composition) -> PathBuf {
        self.config.output_dir.join(format!(
            "{}.{}",
            composition.id,
            composition.output.format.extension()
        ))
    }

    /// Resolve, validate, run and publish one composition.
    ///
    /// The per-job work directory is removed whatever the outcome.
    pub async fn render(
        &self,
        composition: &Composition,
        source: &dyn AssetSource,
        ctx: RenderContext,
    ) -> MediaResult<RenderOutput> {
        composition.validate_shape()?;
        let assets = resolve_assets(source, composition).await?;
        composition.validate(
            &assets.content,
            assets.intro.as_ref(),
            assets.outro.as_ref(),
        )?;

        let work_dir = self.config.work_dir.join(&ctx.job_id);
        tokio::fs::create_dir_all(&work_dir).await?;

        let started = Instant::now();
        let result = self.run_in(&work_dir, composition, &assets, ctx).await;
        remove_dir_quietly(&work_dir).await;

        let elapsed = started.elapsed().as_secs_f64();
        let status = match &result {
            Ok(_) => "completed",
            Err(MediaError::Timeout(_)) => "timeout",
            Err(MediaError::Cancelled) => "cancelled",
            Err(_) => "failed",
        };
        metrics::record_render(status, elapsed);

        match &result {
            Ok(output) => {
                metrics::record_output_size(output.size_bytes);
                info!(
                    composition_id = %composition.id,
                    path = %output.path.display(),
                    size_bytes = output.size_bytes,
                    elapsed_secs = elapsed,
                    "Render completed"
                );
            }
            Err(e) => warn!(
                composition_id = %composition.id,
                elapsed_secs = elapsed,
                "Render failed: {}",
                e
            ),
        }

        result
    }

    async fn run_in(
        &self,
        work_dir: &Path,
        composition: &Composition,
        assets: &ResolvedAssets,
        ctx: RenderContext,
    ) -> MediaResult<RenderOutput> {
        let scratch = work_dir.join(format!("render.{}", composition.output.format.extension()));
        let plan = plan_render(composition, assets, &scratch)?;

        let mut runner = FfmpegRunner::new()
            .with_program(&self.config.ffmpeg_path)
            .with_timeout(self.config.timeout)
            .with_throttle(self.config.progress_throttle);
        if let Some(cancel) = ctx.cancel {
            runner = runner.with_cancel(cancel);
        }
        if let Some(tx) = ctx.progress {
            runner = runner.with_progress(tx, plan.expected_duration);
        }

        info!(
            composition_id = %composition.id,
            job_id = %ctx.job_id,
            segments = composition.segment_count(),
            overlays = composition.overlay_configs.len(),
            expected_secs = plan.expected_duration,
            "Starting render"
        );
        runner.run(&plan.command).await?;

        let destination = self.output_path(composition);
        let size_bytes = publish_file(&scratch, &destination).await?;

        Ok(RenderOutput {
            path: destination,
            duration: plan.expected_duration,
            width: plan.resolution.width,
            height: plan.resolution.height,
            size_bytes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vcomp_models::{
        CompositionId, OutputFormat, OutputOptions, OverlayConfig, OverlayPosition,
        OverlayTransition, PositionPreset,
    };

    fn asset(id: &str, duration: f64) -> VideoAsset {
        VideoAsset::new(id, format!("{id}.mp4"), duration, 1920, 1080)
            .with_path(format!("/media/{id}.mp4"))
    }

    fn composition(intro: bool, outro: bool, overlays: usize) -> Composition {
        let now = Utc::now();
        Composition {
            id: CompositionId::from_string("comp-1"),
            title: "t".into(),
            description: "d".into(),
            content_asset_id: AssetId::from("content"),
            intro_asset_id: intro.then(|| AssetId::from("intro")),
            outro_asset_id: outro.then(|| AssetId::from("outro")),
            overlay_configs: (0..overlays)
                .map(|i| OverlayConfig {
                    asset_id: AssetId::from("logo"),
                    start_time: 5.0 + 10.0 * i as f64,
                    duration: 3.0,
                    position: OverlayPosition::preset(PositionPreset::BottomRight, 0.25),
                    opacity: 0.8,
                    transition: OverlayTransition::default(),
                })
                .collect(),
            crossfade_duration: 1.0,
            output: OutputOptions::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn resolved(intro: bool, outro: bool) -> ResolvedAssets {
        ResolvedAssets {
            content: asset("content", 60.0),
            intro: intro.then(|| asset("intro", 5.0)),
            outro: outro.then(|| asset("outro", 4.0)),
            overlays: HashMap::from([(AssetId::from("logo"), asset("logo", 3.0))]),
        }
    }

    #[test]
    fn test_plan_input_order_and_duration() {
        let comp = composition(true, true, 2);
        let plan = plan_render(&comp, &resolved(true, true), Path::new("/work/out.mp4")).unwrap();

        let sources: Vec<&str> = plan
            .command
            .inputs()
            .iter()
            .map(|i| i.source.as_str())
            .collect();
        assert_eq!(
            sources,
            vec![
                "/media/intro.mp4",
                "/media/content.mp4",
                "/media/outro.mp4",
                "/media/logo.mp4",
                "/media/logo.mp4"
            ]
        );
        // 5 + 60 + 4 - 2 * 1
        assert!((plan.expected_duration - 67.0).abs() < 1e-9);

        let args = plan.command.build_args();
        assert!(args.contains(&"-filter_complex".to_string()));
        assert!(args.contains(&"[vout]".to_string()));
        assert!(args.contains(&"[aout]".to_string()));
        assert!(args.contains(&"libx264".to_string()));
        assert_eq!(args.last().unwrap(), "/work/out.mp4");
    }

    #[test]
    fn test_plan_adds_silence_for_silent_segment() {
        let comp = composition(true, false, 0);
        let mut assets = resolved(true, false);
        assets.intro = assets.intro.map(|a| a.without_audio());

        let plan = plan_render(&comp, &assets, Path::new("/work/out.mp4")).unwrap();
        let inputs = plan.command.inputs();
        assert_eq!(inputs.len(), 3);
        assert!(inputs[1].source.starts_with("anullsrc"));
        assert!(inputs[1].args.contains(&"lavfi".to_string()));
    }

    #[test]
    fn test_plan_overlay_offset_follows_intro() {
        let comp = composition(true, false, 1);
        let plan = plan_render(&comp, &resolved(true, false), Path::new("/o.mp4")).unwrap();
        let args = plan.command.build_args();
        let graph = &args[args.iter().position(|a| a == "-filter_complex").unwrap() + 1];
        // Content starts at 5 - 1 = 4s, overlay at content 5s
        assert!(graph.contains("between(t,9.000,12.000)"));
    }

    #[test]
    fn test_plan_hardware_flags() {
        let mut comp = composition(false, false, 0);
        comp.output = OutputOptions::default().with_hardware_acceleration(HardwareAccel::Nvenc);
        let plan = plan_render(&comp, &resolved(false, false), Path::new("/o.mp4")).unwrap();
        assert_eq!(plan.command.inputs()[0].args, vec!["-hwaccel", "cuda"]);
        assert!(plan.command.build_args().contains(&"h264_nvenc".to_string()));

        // Webm falls back to software
        comp.output = OutputOptions::default()
            .with_format(OutputFormat::Webm)
            .with_hardware_acceleration(HardwareAccel::Nvenc);
        let plan = plan_render(&comp, &resolved(false, false), Path::new("/o.webm")).unwrap();
        assert!(plan.command.inputs()[0].args.is_empty());
        assert!(plan.command.build_args().contains(&"libvpx-vp9".to_string()));
    }

    #[test]
    fn test_output_path_uses_composition_id() {
        let renderer = Renderer::new(RendererConfig::default().with_dirs("/work", "/out"));
        let mut comp = composition(false, false, 0);
        assert_eq!(renderer.output_path(&comp), PathBuf::from("/out/comp-1.mp4"));
        comp.output = comp.output.with_format(OutputFormat::Mov);
        assert_eq!(renderer.output_path(&comp), PathBuf::from("/out/comp-1.mov"));
    }

    struct MissingSource;

    #[async_trait]
    impl AssetSource for MissingSource {
        async fn resolve(&self, id: &AssetId) -> MediaResult<VideoAsset> {
            Err(MediaError::asset_resolution(id, "not in catalog"))
        }
    }

    #[tokio::test]
    async fn test_resolution_failure_precedes_spawn() {
        let dir = tempfile::tempdir().unwrap();
        let renderer = Renderer::new(
            RendererConfig::default()
                .with_dirs(dir.path().join("work"), dir.path().join("out"))
                .with_ffmpeg_path("/nonexistent/ffmpeg"),
        );

        let err = renderer
            .render(&composition(false, false, 0), &MissingSource, RenderContext::new("job-1"))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::AssetResolution { .. }));
        assert!(!dir.path().join("work").join("job-1").exists());
    }
}
