//! Composition orchestration: select, schedule, build, queue, render, ingest.

use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{info, Instrument};

use vcomp_media::{AssetSource, RenderContext, RenderOutput, RenderProgress, Renderer};
use vcomp_models::{
    AssetId, Composition, CompositionId, JobId, JobStatusView, OutputOptions, Priority,
    SelectedAssets, VideoAsset,
};
use vcomp_queue::{JobContext, JobEvent, JobQueue, ProgressReporter};
use vcomp_storage::{AssetCatalog, AssetIngestor, IngestRequest};

use crate::builder::{build_composition, effective_crossfade, BuildOptions};
use crate::config::ComposerConfig;
use crate::error::{ComposerError, ComposerResult};
use crate::logging::JobLogger;
use crate::selector::AssetSelector;
use crate::timer::{compute_timings, OverlayOverrides};

/// Share of job progress given to the render; ingestion takes the rest.
pub const RENDER_PROGRESS_SHARE: f64 = 95.0;

const PROGRESS_CHANNEL_CAPACITY: usize = 32;

/// Per-request knobs for [`Composer::compose`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComposeOptions {
    /// Crossfade override in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crossfade: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<OutputOptions>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default, skip_serializing_if = "OverlayOverrides::is_empty")]
    pub overlay: OverlayOverrides,
}

/// What a render job was submitted for.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Built automatically from a content clip
    Compose,
    /// Caller-supplied composition
    Render,
}

/// JSON descriptor stored with each job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobPayload {
    pub kind: JobKind,
    pub composition_id: CompositionId,
    pub content_asset_id: AssetId,
    pub title: String,
}

/// Result of a completed render job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompositionResult {
    pub composition: Composition,
    pub output: RenderOutput,
    /// Catalog record for the rendered file
    pub ingested: VideoAsset,
}

/// Everything decided before a render is queued.
#[derive(Debug, Clone)]
pub struct CompositionPlan {
    pub content: VideoAsset,
    pub selected: SelectedAssets,
    pub composition: Composition,
}

pub type CompositionQueue = JobQueue<JobPayload, CompositionResult>;
pub type CompositionStatus = JobStatusView<CompositionResult>;

/// Composition engine.
///
/// Holds its collaborators and queue explicitly; build one in `main` and
/// share it by `Arc`.
pub struct Composer {
    config: ComposerConfig,
    catalog: Arc<dyn AssetCatalog>,
    source: Arc<dyn AssetSource>,
    ingestor: Arc<dyn AssetIngestor>,
    selector: AssetSelector,
    renderer: Arc<Renderer>,
    queue: CompositionQueue,
    rng: Mutex<StdRng>,
}

impl Composer {
    pub fn new(
        config: ComposerConfig,
        catalog: Arc<dyn AssetCatalog>,
        source: Arc<dyn AssetSource>,
        ingestor: Arc<dyn AssetIngestor>,
    ) -> Self {
        let renderer = Arc::new(Renderer::new(config.renderer.clone()));
        let queue = JobQueue::new(config.queue.clone());
        info!(
            max_concurrent = config.queue.max_concurrent,
            crossfade = config.crossfade,
            output_dir = %config.output_dir.display(),
            "Composer created"
        );
        Self {
            selector: AssetSelector::new(catalog.clone()),
            config,
            catalog,
            source,
            ingestor,
            renderer,
            queue,
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// Replace the selection RNG, e.g. with a seeded one for tests.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Arc<dyn AssetCatalog> {
        &self.catalog
    }

    pub fn queue(&self) -> &CompositionQueue {
        &self.queue
    }

    /// Select, schedule and build a composition without queueing it.
    pub async fn plan(
        &self,
        content_asset_id: &AssetId,
        options: &ComposeOptions,
    ) -> ComposerResult<CompositionPlan> {
        let content = self.catalog.get(content_asset_id).await?;

        let pools = self.selector.candidates(&content).await;
        let selected = match self.rng.lock() {
            Ok(mut rng) => pools.choose(&mut *rng),
            Err(poisoned) => pools.choose(&mut *poisoned.into_inner()),
        };

        let requested = options.crossfade.unwrap_or(self.config.crossfade);
        let crossfade = effective_crossfade(&content, &selected, requested);
        let timer = options.overlay.apply(&self.config.timer);
        let timings = compute_timings(content.duration, selected.overlay.as_ref(), crossfade, &timer);

        let composition = build_composition(
            &content,
            &selected,
            &timings,
            &BuildOptions {
                crossfade,
                output: options.output.clone().unwrap_or_default(),
                now: None,
            },
        );
        composition.validate(&content, selected.intro.as_ref(), selected.outro.as_ref())?;

        info!(
            composition_id = %composition.id,
            content_id = %content.id,
            intro = ?composition.intro_asset_id,
            outro = ?composition.outro_asset_id,
            overlays = composition.overlay_configs.len(),
            crossfade = crossfade,
            "Composition planned"
        );

        Ok(CompositionPlan {
            content,
            selected,
            composition,
        })
    }

    /// Build a composition for `content_asset_id` and queue its render.
    ///
    /// Returns as soon as the job is queued.
    pub async fn compose(
        &self,
        content_asset_id: &AssetId,
        options: ComposeOptions,
    ) -> ComposerResult<JobId> {
        let plan = self.plan(content_asset_id, &options).await?;
        self.enqueue(plan.composition, JobKind::Compose, options.priority)
    }

    /// Queue the render of a prepared composition.
    pub fn submit(&self, composition: Composition, priority: Priority) -> ComposerResult<JobId> {
        composition.validate_shape()?;
        self.enqueue(composition, JobKind::Render, priority)
    }

    pub fn status(&self, job_id: &JobId) -> Option<CompositionStatus> {
        self.queue.get_job(job_id)
    }

    pub fn list(&self) -> Vec<CompositionStatus> {
        self.queue.list_jobs()
    }

    pub fn cancel(&self, job_id: &JobId) -> bool {
        self.queue.cancel(job_id)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.queue.subscribe()
    }

    /// Resolve once the job is terminal; `None` if it is unknown.
    pub async fn wait(&self, job_id: &JobId) -> Option<CompositionStatus> {
        let mut events = self.queue.subscribe();
        loop {
            match self.queue.get_job(job_id) {
                None => return None,
                Some(view) if view.is_terminal() => return Some(view),
                Some(_) => {}
            }
            if let Err(broadcast::error::RecvError::Closed) = events.recv().await {
                return self.queue.get_job(job_id);
            }
        }
    }

    /// Stop accepting work and drain running renders.
    pub async fn shutdown(&self) -> bool {
        self.queue.shutdown().await
    }

    fn enqueue(
        &self,
        composition: Composition,
        kind: JobKind,
        priority: Priority,
    ) -> ComposerResult<JobId> {
        let job_id = JobId::new();
        let payload = JobPayload {
            kind,
            composition_id: composition.id.clone(),
            content_asset_id: composition.content_asset_id.clone(),
            title: composition.title.clone(),
        };

        let task = RenderTask {
            renderer: self.renderer.clone(),
            source: self.source.clone(),
            ingestor: self.ingestor.clone(),
            composition,
        };
        let id = self
            .queue
            .add_job_with_priority(job_id, payload, priority, move |ctx| task.run(ctx))?;
        Ok(id)
    }
}

/// One queued render, owned by its job.
struct RenderTask {
    renderer: Arc<Renderer>,
    source: Arc<dyn AssetSource>,
    ingestor: Arc<dyn AssetIngestor>,
    composition: Composition,
}

impl RenderTask {
    async fn run(self, ctx: JobContext) -> ComposerResult<CompositionResult> {
        let logger = JobLogger::new(ctx.job_id(), "render").with_composition(&self.composition.id);
        let span = logger.create_span();

        async move {
            logger.log_start(&self.composition.title);
            match self.execute(&ctx, &logger).await {
                Ok(result) => {
                    logger.log_completion(&result.output.path.display().to_string());
                    Ok(result)
                }
                Err(e) => {
                    logger.log_error(&e.to_string());
                    Err(e)
                }
            }
        }
        .instrument(span)
        .await
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        logger: &JobLogger,
    ) -> ComposerResult<CompositionResult> {
        ctx.stage("rendering");
        logger.log_stage("rendering");

        let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_CAPACITY);
        let render_ctx = RenderContext::new(ctx.job_id().as_str())
            .with_progress(tx)
            .with_cancel(ctx.cancel_receiver());

        // The sender lives inside the render future, so forwarding ends with it
        let (output, ()) = tokio::join!(
            self.renderer
                .render(&self.composition, self.source.as_ref(), render_ctx),
            forward_progress(rx, ctx.reporter().clone()),
        );
        let output = output?;

        ctx.stage("ingesting");
        logger.log_stage("ingesting");
        ctx.report(RENDER_PROGRESS_SHARE);

        let filename = output
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.composition.id.to_string());
        let request = IngestRequest::new(
            &output.path,
            filename,
            output.duration,
            output.width,
            output.height,
        );
        let ingested = self
            .ingestor
            .ingest(request)
            .await
            .map_err(|e| ComposerError::ingestion(e.to_string()))?;

        Ok(CompositionResult {
            composition: self.composition.clone(),
            output,
            ingested,
        })
    }
}

/// Map renderer progress (0-100) onto the job's render share.
async fn forward_progress(mut rx: mpsc::Receiver<RenderProgress>, reporter: ProgressReporter) {
    while let Some(event) = rx.recv().await {
        reporter.report(scale_render_progress(event.percent));
    }
}

pub(crate) fn scale_render_progress(percent: f64) -> f64 {
    percent.clamp(0.0, 100.0) * RENDER_PROGRESS_SHARE / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_storage::MemoryCatalog;

    #[test]
    fn test_scale_render_progress() {
        assert_eq!(scale_render_progress(0.0), 0.0);
        assert_eq!(scale_render_progress(50.0), 47.5);
        assert_eq!(scale_render_progress(100.0), 95.0);
        assert_eq!(scale_render_progress(140.0), 95.0);
    }

    #[test]
    fn test_compose_options_json() {
        let options: ComposeOptions = serde_json::from_str(
            r#"{"crossfade": 0.75, "priority": "high", "overlay": {"opacity": 0.5}}"#,
        )
        .unwrap();
        assert_eq!(options.crossfade, Some(0.75));
        assert_eq!(options.priority, Priority::High);
        assert_eq!(options.overlay.opacity, Some(0.5));

        let empty: ComposeOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, ComposeOptions::default());
    }

    fn composer(catalog: Arc<MemoryCatalog>) -> Composer {
        Composer::new(
            ComposerConfig::default().with_crossfade(1.0),
            catalog.clone(),
            catalog.clone(),
            catalog,
        )
        .with_rng(StdRng::seed_from_u64(1))
    }

    #[tokio::test]
    async fn test_plan_overlay_only() {
        let catalog = Arc::new(
            MemoryCatalog::with_assets([
                VideoAsset::new("content", "content.mp4", 60.0, 1920, 1080),
                VideoAsset::new("tall-intro", "tall.mp4", 3.0, 1080, 1920).with_tag("intro"),
                VideoAsset::new("logo", "logo.mov", 4.0, 300, 300).with_tag("overlay"),
            ])
            .unwrap(),
        );
        let plan = composer(catalog)
            .plan(&AssetId::from("content"), &ComposeOptions::default())
            .await
            .unwrap();

        assert!(plan.selected.intro.is_none());
        assert!(plan.composition.intro_asset_id.is_none());
        assert!(plan.composition.outro_asset_id.is_none());
        assert!(!plan.composition.overlay_configs.is_empty());
        for overlay in &plan.composition.overlay_configs {
            assert!(overlay.start_time >= 1.0);
            assert!(overlay.end_time() <= 59.0);
        }
    }

    #[tokio::test]
    async fn test_compose_unknown_content() {
        let composer = composer(Arc::new(MemoryCatalog::new()));
        let err = composer
            .compose(&AssetId::from("missing"), ComposeOptions::default())
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(composer.list().is_empty());
    }

    #[tokio::test]
    async fn test_submit_rejects_malformed_composition() {
        let catalog = Arc::new(
            MemoryCatalog::with_assets([VideoAsset::new("c", "c.mp4", 10.0, 640, 360)]).unwrap(),
        );
        let composer = composer(catalog);
        let mut composition = composer
            .plan(&AssetId::from("c"), &ComposeOptions::default())
            .await
            .unwrap()
            .composition;
        composition.crossfade_duration = f64::NAN;

        let err = composer.submit(composition, Priority::Normal).unwrap_err();
        assert!(err.is_invalid_input());
    }
}
