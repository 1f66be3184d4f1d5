//! Composer configuration.

use std::path::PathBuf;

use vcomp_media::RendererConfig;
use vcomp_queue::QueueConfig;

use crate::timer::OverlayTimerConfig;

/// Default crossfade at each segment boundary, in seconds.
pub const DEFAULT_CROSSFADE_SECS: f64 = 0.5;

/// Composer configuration.
#[derive(Debug, Clone)]
pub struct ComposerConfig {
    /// Maximum renders in flight
    pub max_concurrent: usize,
    /// Crossfade used when a request does not set one
    pub crossfade: f64,
    /// Parent of per-job scratch directories
    pub work_dir: PathBuf,
    /// Where finished renders are published
    pub output_dir: PathBuf,
    /// Root of the local asset catalog
    pub catalog_dir: PathBuf,
    pub timer: OverlayTimerConfig,
    pub renderer: RendererConfig,
    pub queue: QueueConfig,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        let renderer = RendererConfig::default();
        Self {
            max_concurrent: 2,
            crossfade: DEFAULT_CROSSFADE_SECS,
            work_dir: renderer.work_dir.clone(),
            output_dir: renderer.output_dir.clone(),
            catalog_dir: PathBuf::from("catalog"),
            timer: OverlayTimerConfig::default(),
            renderer,
            queue: QueueConfig::default(),
        }
    }
}

impl ComposerConfig {
    /// Create config from environment variables.
    ///
    /// Renderer and queue settings are read from their own variables; the
    /// composer's directories and concurrency take precedence over them.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let max_concurrent = std::env::var("COMPOSER_MAX_CONCURRENT")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_concurrent);
        let crossfade = std::env::var("COMPOSER_CROSSFADE_SECS")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|c| c.is_finite() && *c >= 0.0)
            .unwrap_or(defaults.crossfade);
        let work_dir = std::env::var("COMPOSER_WORK_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.work_dir);
        let output_dir = std::env::var("COMPOSER_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);
        let catalog_dir = std::env::var("COMPOSER_CATALOG_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.catalog_dir);

        Self {
            max_concurrent,
            crossfade,
            renderer: RendererConfig::from_env().with_dirs(&work_dir, &output_dir),
            queue: QueueConfig::from_env().with_max_concurrent(max_concurrent),
            work_dir,
            output_dir,
            catalog_dir,
            timer: defaults.timer,
        }
    }

    pub fn with_dirs(
        mut self,
        work_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> Self {
        self.work_dir = work_dir.into();
        self.output_dir = output_dir.into();
        self.renderer = self.renderer.with_dirs(&self.work_dir, &self.output_dir);
        self
    }

    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent.max(1);
        self.queue = self.queue.with_max_concurrent(self.max_concurrent);
        self
    }

    pub fn with_crossfade(mut self, crossfade: f64) -> Self {
        self.crossfade = crossfade.max(0.0);
        self
    }

    pub fn with_renderer(mut self, renderer: RendererConfig) -> Self {
        self.work_dir = renderer.work_dir.clone();
        self.output_dir = renderer.output_dir.clone();
        self.renderer = renderer;
        self
    }

    pub fn with_queue(mut self, queue: QueueConfig) -> Self {
        self.max_concurrent = queue.max_concurrent;
        self.queue = queue;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dirs_flow_into_renderer() {
        let config = ComposerConfig::default().with_dirs("/tmp/w", "/tmp/o");
        assert_eq!(config.renderer.work_dir, PathBuf::from("/tmp/w"));
        assert_eq!(config.renderer.output_dir, PathBuf::from("/tmp/o"));
    }

    #[test]
    fn test_concurrency_flows_into_queue() {
        let config = ComposerConfig::default().with_max_concurrent(0);
        assert_eq!(config.max_concurrent, 1);
        assert_eq!(config.queue.max_concurrent, 1);
    }
}
