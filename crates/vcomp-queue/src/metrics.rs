//! Queue metrics.

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    pub const JOBS_SUBMITTED_TOTAL: &str = "vcomp_jobs_submitted_total";
    pub const JOBS_COMPLETED_TOTAL: &str = "vcomp_jobs_completed_total";
    pub const JOBS_FAILED_TOTAL: &str = "vcomp_jobs_failed_total";
    pub const QUEUE_PENDING: &str = "vcomp_queue_pending";
    pub const QUEUE_RUNNING: &str = "vcomp_queue_running";
    pub const JOB_DURATION_SECONDS: &str = "vcomp_job_duration_seconds";
}

pub fn record_job_submitted() {
    counter!(names::JOBS_SUBMITTED_TOTAL).increment(1);
}

pub fn record_job_completed(duration_secs: f64) {
    counter!(names::JOBS_COMPLETED_TOTAL).increment(1);
    histogram!(names::JOB_DURATION_SECONDS, "status" => "completed").record(duration_secs);
}

/// `reason` is one of `error`, `panic`, `timeout`, `cancelled`, `shutdown`.
pub fn record_job_failed(reason: &'static str) {
    counter!(names::JOBS_FAILED_TOTAL, "reason" => reason).increment(1);
}

pub fn set_queue_depth(pending: usize, running: usize) {
    gauge!(names::QUEUE_PENDING).set(pending as f64);
    gauge!(names::QUEUE_RUNNING).set(running as f64);
}
