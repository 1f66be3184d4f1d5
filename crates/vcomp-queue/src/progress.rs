//! Progress reporting and job events.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use vcomp_models::{JobId, JobState};

/// Event broadcast to queue subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobEvent {
    /// The job moved to a new state
    Status {
        job_id: JobId,
        status: JobState,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    /// Progress rose or the stage changed
    Progress {
        job_id: JobId,
        progress: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        stage: Option<String>,
    },
}

impl JobEvent {
    pub fn job_id(&self) -> &JobId {
        match self {
            JobEvent::Status { job_id, .. } | JobEvent::Progress { job_id, .. } => job_id,
        }
    }
}

/// Writes reporter updates into the queue's job store.
pub(crate) trait ProgressStore: Send + Sync {
    fn raise_progress(&self, id: &JobId, percent: u8);
    fn set_stage(&self, id: &JobId, stage: String);
}

/// Handle a running task uses to report progress.
///
/// Values are clamped to 0-100 and only ever rise; a lower value is ignored.
#[derive(Clone)]
pub struct ProgressReporter {
    job_id: JobId,
    store: Arc<dyn ProgressStore>,
}

impl ProgressReporter {
    pub(crate) fn new(job_id: JobId, store: Arc<dyn ProgressStore>) -> Self {
        Self { job_id, store }
    }

    /// Report progress as a percentage.
    pub fn report(&self, percent: f64) {
        if !percent.is_finite() {
            return;
        }
        let percent = percent.clamp(0.0, 100.0).floor() as u8;
        self.store.raise_progress(&self.job_id, percent);
    }

    /// Describe the current step.
    pub fn stage(&self, stage: impl Into<String>) {
        self.store.set_stage(&self.job_id, stage.into());
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .finish()
    }
}

/// Everything a task receives when it is admitted.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: JobId,
    reporter: ProgressReporter,
    cancel_rx: watch::Receiver<bool>,
}

impl JobContext {
    pub(crate) fn new(
        job_id: JobId,
        reporter: ProgressReporter,
        cancel_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            job_id,
            reporter,
            cancel_rx,
        }
    }

    pub fn job_id(&self) -> &JobId {
        &self.job_id
    }

    pub fn reporter(&self) -> &ProgressReporter {
        &self.reporter
    }

    pub fn report(&self, percent: f64) {
        self.reporter.report(percent);
    }

    pub fn stage(&self, stage: impl Into<String>) {
        self.reporter.stage(stage);
    }

    /// Receiver that flips to `true` when the job is cancelled.
    pub fn cancel_receiver(&self) -> watch::Receiver<bool> {
        self.cancel_rx.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_rx.borrow()
    }

    /// Resolves once the job is cancelled; never resolves otherwise.
    pub async fn cancelled(&self) {
        let mut rx = self.cancel_rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        progress: Mutex<Vec<u8>>,
        stages: Mutex<Vec<String>>,
    }

    impl ProgressStore for Recorder {
        fn raise_progress(&self, _id: &JobId, percent: u8) {
            self.progress.lock().unwrap().push(percent);
        }

        fn set_stage(&self, _id: &JobId, stage: String) {
            self.stages.lock().unwrap().push(stage);
        }
    }

    #[test]
    fn test_reporter_clamps() {
        let store = Arc::new(Recorder::default());
        let reporter = ProgressReporter::new(JobId::from("j"), store.clone());

        reporter.report(-5.0);
        reporter.report(42.9);
        reporter.report(180.0);
        reporter.report(f64::NAN);
        reporter.stage("rendering");

        assert_eq!(*store.progress.lock().unwrap(), vec![0, 42, 100]);
        assert_eq!(*store.stages.lock().unwrap(), vec!["rendering".to_string()]);
    }

    #[tokio::test]
    async fn test_context_cancellation() {
        let (tx, rx) = watch::channel(false);
        let store = Arc::new(Recorder::default());
        let ctx = JobContext::new(
            JobId::from("j"),
            ProgressReporter::new(JobId::from("j"), store),
            rx,
        );
        assert!(!ctx.is_cancelled());

        tx.send(true).unwrap();
        ctx.cancelled().await;
        assert!(ctx.is_cancelled());
    }

    #[test]
    fn test_event_serialization() {
        let event = JobEvent::Status {
            job_id: JobId::from("j"),
            status: JobState::Failed,
            error: Some("Job cancelled".into()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "status");
        assert_eq!(json["status"], "failed");
        assert_eq!(event.job_id().as_str(), "j");
    }
}
