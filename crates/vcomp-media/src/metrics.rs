//! Render metrics.

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const RENDERS_TOTAL: &str = "vcomp_renders_total";
    pub const RENDER_DURATION_SECONDS: &str = "vcomp_render_duration_seconds";
    pub const RENDER_OUTPUT_BYTES: &str = "vcomp_render_output_bytes";
}

/// Record a finished render attempt. `status` is `completed`, `failed`,
/// `timeout` or `cancelled`.
pub fn record_render(status: &'static str, duration_secs: f64) {
    counter!(names::RENDERS_TOTAL, "status" => status).increment(1);
    histogram!(names::RENDER_DURATION_SECONDS, "status" => status).record(duration_secs);
}

pub fn record_output_size(bytes: u64) {
    histogram!(names::RENDER_OUTPUT_BYTES).record(bytes as f64);
}
