//! Automatic composition engine.
//!
//! This crate provides:
//! - Asset selection by aspect-ratio compatibility
//! - Overlay scheduling
//! - Composition assembly
//! - The [`Composer`] that queues renders and ingests their output

pub mod builder;
pub mod composer;
pub mod config;
pub mod error;
pub mod logging;
pub mod selector;
pub mod timer;

pub use builder::{build_composition, effective_crossfade, BuildOptions};
pub use composer::{
    ComposeOptions, Composer, CompositionPlan, CompositionQueue, CompositionResult,
    CompositionStatus, JobKind, JobPayload, RENDER_PROGRESS_SHARE,
};
pub use config::{ComposerConfig, DEFAULT_CROSSFADE_SECS};
pub use error::{ComposerError, ComposerResult};
pub use logging::JobLogger;
pub use selector::{AssetSelector, CandidatePools};
pub use timer::{compute_timings, OverlayOverrides, OverlayTimerConfig};

/// Install the tracing subscriber used by the binaries.
///
/// `LOG_FORMAT=json` switches to JSON lines; otherwise output is ANSI.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let mut env_filter = EnvFilter::from_default_env();
    if let Ok(directive) = "vcomp=info".parse() {
        env_filter = env_filter.add_directive(directive);
    }

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false)
                    .with_writer(std::io::stderr),
            )
            .with(env_filter)
            .init();
    }
}
