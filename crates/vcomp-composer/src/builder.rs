//! Composition assembly. Pure: no I/O, clock injectable.

use chrono::{DateTime, Utc};

use vcomp_models::{
    Composition, CompositionId, OutputOptions, OverlayConfig, OverlayTiming, SelectedAssets,
    VideoAsset,
};

/// Inputs to [`build_composition`] beyond the assets themselves.
#[derive(Debug, Clone, Default)]
pub struct BuildOptions {
    /// Crossfade at each segment boundary, in seconds
    pub crossfade: f64,
    pub output: OutputOptions,
    /// Clock override; `None` uses the current time
    pub now: Option<DateTime<Utc>>,
}

/// Largest usable crossfade for the chosen segments.
///
/// A crossfade may not exceed half of either clip at a boundary, so the
/// requested value is capped when intro or outro clips are short.
pub fn effective_crossfade(content: &VideoAsset, selected: &SelectedAssets, requested: f64) -> f64 {
    let requested = if requested.is_finite() { requested.max(0.0) } else { 0.0 };
    let boundaries = [selected.intro.as_ref(), selected.outro.as_ref()];
    if boundaries.iter().all(Option::is_none) {
        return requested;
    }
    boundaries
        .into_iter()
        .flatten()
        .chain(std::iter::once(content))
        .map(|a| a.duration / 2.0)
        .fold(requested, f64::min)
        .max(0.0)
}

/// Assemble the composition record.
pub fn build_composition(
    content: &VideoAsset,
    selected: &SelectedAssets,
    timings: &[OverlayTiming],
    options: &BuildOptions,
) -> Composition {
    let now = options.now.unwrap_or_else(Utc::now);

    let overlay_configs = match &selected.overlay {
        Some(overlay) => timings
            .iter()
            .map(|t| OverlayConfig::from_timing(overlay.id.clone(), t))
            .collect(),
        None => Vec::new(),
    };

    Composition {
        id: CompositionId::new(),
        title: format!("{} - {}", content.filename, now.format("%Y-%m-%d %H:%M:%S")),
        description: describe(content, selected, overlay_configs.len()),
        content_asset_id: content.id.clone(),
        intro_asset_id: selected.intro.as_ref().map(|a| a.id.clone()),
        outro_asset_id: selected.outro.as_ref().map(|a| a.id.clone()),
        overlay_configs,
        crossfade_duration: options.crossfade.max(0.0),
        output: options.output.clone(),
        created_at: now,
        updated_at: now,
    }
}

fn describe(content: &VideoAsset, selected: &SelectedAssets, overlays: usize) -> String {
    let mut parts = Vec::new();
    if selected.intro.is_some() {
        parts.push("intro".to_string());
    }
    if selected.outro.is_some() {
        parts.push("outro".to_string());
    }
    if overlays > 0 {
        parts.push(format!(
            "{} overlay{}",
            overlays,
            if overlays == 1 { "" } else { "s" }
        ));
    }

    let extras = if parts.is_empty() {
        "no additions".to_string()
    } else {
        parts.join(", ")
    };
    format!(
        "Automatic {} composition of {} with {}",
        content.aspect_ratio, content.filename, extras
    )
}
