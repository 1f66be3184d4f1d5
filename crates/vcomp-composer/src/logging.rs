//! Structured job logging.
//!
//! Every render job logs its lifecycle through [`JobLogger`] so log lines
//! carry the same `job_id`, `operation` and `composition_id` fields.

use tracing::{error, info, warn, Span};
use vcomp_models::{CompositionId, JobId};

/// Job logger for structured logging with consistent formatting.
#[derive(Debug, Clone)]
pub struct JobLogger {
    job_id: String,
    operation: String,
    composition_id: Option<String>,
}

impl JobLogger {
    /// Create a logger for `job_id` running `operation` (e.g. "compose", "render").
    pub fn new(job_id: &JobId, operation: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            operation: operation.to_string(),
            composition_id: None,
        }
    }

    pub fn with_composition(mut self, composition_id: &CompositionId) -> Self {
        self.composition_id = Some(composition_id.to_string());
        self
    }

    fn composition(&self) -> &str {
        self.composition_id.as_deref().unwrap_or("-")
    }

    pub fn log_start(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            composition_id = %self.composition(),
            "Job started: {}", message
        );
    }

    /// Log entry into a named step.
    pub fn log_stage(&self, stage: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            composition_id = %self.composition(),
            stage = %stage,
            "Job stage"
        );
    }

    pub fn log_warning(&self, message: &str) {
        warn!(
            job_id = %self.job_id,
            operation = %self.operation,
            composition_id = %self.composition(),
            "Job warning: {}", message
        );
    }

    pub fn log_error(&self, message: &str) {
        error!(
            job_id = %self.job_id,
            operation = %self.operation,
            composition_id = %self.composition(),
            "Job error: {}", message
        );
    }

    pub fn log_completion(&self, message: &str) {
        info!(
            job_id = %self.job_id,
            operation = %self.operation,
            composition_id = %self.composition(),
            "Job completed: {}", message
        );
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    pub fn operation(&self) -> &str {
        &self.operation
    }

    /// Span carrying the job fields, for instrumenting the task future.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "job",
            job_id = %self.job_id,
            operation = %self.operation,
            composition_id = %self.composition()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_logger_fields() {
        let job_id = JobId::new();
        let logger = JobLogger::new(&job_id, "render");

        assert_eq!(logger.job_id(), job_id.to_string());
        assert_eq!(logger.operation(), "render");
        assert_eq!(logger.composition(), "-");
    }

    #[test]
    fn test_job_logger_with_composition() {
        let logger = JobLogger::new(&JobId::from("job-1"), "compose")
            .with_composition(&CompositionId::from_string("comp-1"));
        assert_eq!(logger.composition(), "comp-1");
    }
}
