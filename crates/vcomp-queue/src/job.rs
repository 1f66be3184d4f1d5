//! Job records held by the queue.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use vcomp_models::{JobId, JobState, JobStatusView, Priority};

/// Error recorded when a job is cancelled.
pub const CANCELLED_MESSAGE: &str = "Job cancelled";
/// Error recorded for pending jobs dropped at shutdown.
pub const SHUTDOWN_MESSAGE: &str = "Queue shutting down";

/// Mutable state of one job.
#[derive(Debug)]
pub(crate) struct JobRecord<P, R> {
    pub id: JobId,
    pub payload: P,
    pub status: JobState,
    pub progress: u8,
    pub result: Option<R>,
    pub error: Option<String>,
    pub stage: Option<String>,
    pub priority: Priority,
    pub seq: u64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    /// Present while Processing
    pub cancel_tx: Option<watch::Sender<bool>>,
}

impl<P, R: Clone> JobRecord<P, R> {
    pub fn new(id: JobId, payload: P, priority: Priority, seq: u64) -> Self {
        let now = Utc::now();
        Self {
            id,
            payload,
            status: JobState::Pending,
            progress: 0,
            result: None,
            error: None,
            stage: None,
            priority,
            seq,
            created_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            cancel_tx: None,
        }
    }

    pub fn view(&self) -> JobStatusView<R> {
        JobStatusView {
            job_id: self.id.clone(),
            status: self.status,
            progress: self.progress,
            result: self.result.clone(),
            error: self.error.clone(),
            stage: self.stage.clone(),
            priority: self.priority,
            created_at: self.created_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            updated_at: self.updated_at,
        }
    }

    /// Move to `next` if the state machine allows it.
    pub fn transition(&mut self, next: JobState) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        let now = Utc::now();
        self.status = next;
        self.updated_at = now;
        match next {
            JobState::Processing => self.started_at = Some(now),
            JobState::Completed | JobState::Failed => {
                self.finished_at = Some(now);
                self.cancel_tx = None;
            }
            JobState::Pending => {}
        }
        true
    }

    pub fn complete(&mut self, result: R) -> bool {
        if !self.transition(JobState::Completed) {
            return false;
        }
        self.progress = 100;
        self.result = Some(result);
        true
    }

    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.transition(JobState::Failed) {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    /// Raise progress; lower or repeated values are ignored.
    pub fn raise_progress(&mut self, percent: u8) -> bool {
        let percent = percent.min(100);
        if self.status != JobState::Processing || percent <= self.progress {
            return false;
        }
        self.progress = percent;
        self.updated_at = Utc::now();
        true
    }
}

/// Admission order entry: higher priority first, then submission order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct PendingEntry {
    pub priority: Priority,
    pub seq: u64,
    pub id: JobId,
}

impl Ord for PendingEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest entry
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for PendingEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BinaryHeap;

    fn record() -> JobRecord<(), u32> {
        JobRecord::new(JobId::from("job-1"), (), Priority::Normal, 0)
    }

    #[test]
    fn test_forward_only_transitions() {
        let mut job = record();
        assert!(!job.complete(1));
        assert!(job.transition(JobState::Processing));
        assert!(job.started_at.is_some());
        assert!(job.complete(7));
        assert_eq!(job.progress, 100);
        assert_eq!(job.result, Some(7));

        // Terminal is final
        assert!(!job.fail("late"));
        assert_eq!(job.status, JobState::Completed);
        assert!(job.error.is_none());
    }

    #[test]
    fn test_progress_only_rises_while_processing() {
        let mut job = record();
        assert!(!job.raise_progress(10));

        job.transition(JobState::Processing);
        assert!(job.raise_progress(10));
        assert!(!job.raise_progress(5));
        assert!(!job.raise_progress(10));
        assert!(job.raise_progress(250));
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_pending_order() {
        let mut heap = BinaryHeap::new();
        let entry = |priority, seq| PendingEntry {
            priority,
            seq,
            id: JobId::from(format!("j{seq}")),
        };
        heap.push(entry(Priority::Normal, 0));
        heap.push(entry(Priority::Normal, 1));
        heap.push(entry(Priority::High, 2));
        heap.push(entry(Priority::Low, 3));
        heap.push(entry(Priority::High, 4));

        let order: Vec<u64> = std::iter::from_fn(|| heap.pop().map(|e| e.seq)).collect();
        assert_eq!(order, vec![2, 4, 0, 1, 3]);
    }
}
