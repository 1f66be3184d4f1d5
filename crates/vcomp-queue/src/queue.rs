//! Bounded in-process job queue.
//!
//! At most `max_concurrent` jobs are Processing at once. Pending jobs wait
//! in a priority heap (higher priority first, then submission order) and are
//! admitted as slots free up. Each admitted task runs on its own tokio task,
//! watched by a supervisor that records the outcome, catches panics and
//! enforces the optional job timeout.

use std::any::Any;
use std::collections::{BinaryHeap, HashMap};
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::{broadcast, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, info, warn};

use vcomp_models::{JobId, JobState, JobStatusView, Priority};

use crate::config::QueueConfig;
use crate::error::{QueueError, QueueResult};
use crate::job::{JobRecord, PendingEntry, CANCELLED_MESSAGE, SHUTDOWN_MESSAGE};
use crate::metrics;
use crate::progress::{JobContext, JobEvent, ProgressReporter, ProgressStore};

type TaskFn<R> = Box<dyn FnOnce(JobContext) -> BoxFuture<'static, Result<R, String>> + Send>;

struct QueueState<P, R> {
    jobs: HashMap<JobId, JobRecord<P, R>>,
    pending: BinaryHeap<PendingEntry>,
    /// Tasks of jobs still waiting for a slot
    tasks: HashMap<JobId, TaskFn<R>>,
    running: usize,
    accepting: bool,
}

impl<P, R> QueueState<P, R> {
    fn pending_count(&self) -> usize {
        self.tasks.len()
    }
}

struct Inner<P, R> {
    config: QueueConfig,
    state: Mutex<QueueState<P, R>>,
    events: broadcast::Sender<JobEvent>,
    seq: AtomicU64,
    running_tx: watch::Sender<usize>,
}

/// How a supervised task ended.
enum Outcome<R> {
    Finished(Result<R, String>),
    Panicked(String),
    TimedOut(Duration),
    Aborted,
}

/// Bounded job queue.
///
/// Cheap to clone; clones share the same jobs and slots.
pub struct JobQueue<P, R> {
    inner: Arc<Inner<P, R>>,
}

impl<P, R> Clone for JobQueue<P, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P, R> JobQueue<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    /// Create a new job queue.
    pub fn new(config: QueueConfig) -> Self {
        let config = QueueConfig {
            max_concurrent: config.max_concurrent.max(1),
            ..config
        };
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (running_tx, _) = watch::channel(0);
        info!(
            max_concurrent = config.max_concurrent,
            job_timeout_secs = config.job_timeout.map(|t| t.as_secs()),
            "Job queue created"
        );
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(QueueState {
                    jobs: HashMap::new(),
                    pending: BinaryHeap::new(),
                    tasks: HashMap::new(),
                    running: 0,
                    accepting: true,
                }),
                events,
                seq: AtomicU64::new(0),
                running_tx,
            }),
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> Self {
        Self::new(QueueConfig::from_env())
    }

    pub fn config(&self) -> &QueueConfig {
        &self.inner.config
    }

    /// Enqueue a job with normal priority.
    pub fn add_job<F, Fut, E>(&self, id: JobId, payload: P, task: F) -> QueueResult<JobId>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.add_job_with_priority(id, payload, Priority::Normal, task)
    }

    /// Enqueue a job; it starts as soon as a slot is free and it is first in line.
    pub fn add_job_with_priority<F, Fut, E>(
        &self,
        id: JobId,
        payload: P,
        priority: Priority,
        task: F,
    ) -> QueueResult<JobId>
    where
        F: FnOnce(JobContext) -> Fut + Send + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let task: TaskFn<R> = Box::new(move |ctx| {
            task(ctx)
                .map(|result| result.map_err(|e| e.to_string()))
                .boxed()
        });

        {
            let mut state = self.inner.lock();
            if !state.accepting {
                return Err(QueueError::ShuttingDown);
            }
            if state.jobs.contains_key(&id) {
                return Err(QueueError::duplicate(&id));
            }

            let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
            state
                .jobs
                .insert(id.clone(), JobRecord::new(id.clone(), payload, priority, seq));
            state.pending.push(PendingEntry {
                priority,
                seq,
                id: id.clone(),
            });
            state.tasks.insert(id.clone(), task);
            metrics::set_queue_depth(state.pending_count(), state.running);
        }

        metrics::record_job_submitted();
        debug!(job_id = %id, ?priority, "Job enqueued");
        self.inner.emit(JobEvent::Status {
            job_id: id.clone(),
            status: JobState::Pending,
            error: None,
        });

        Inner::pump(&self.inner);
        Ok(id)
    }

    /// Status view for one job.
    pub fn get_job(&self, id: &JobId) -> Option<JobStatusView<R>> {
        self.inner.lock().jobs.get(id).map(JobRecord::view)
    }

    /// Payload a job was submitted with.
    pub fn get_payload(&self, id: &JobId) -> Option<P> {
        self.inner.lock().jobs.get(id).map(|job| job.payload.clone())
    }

    /// Every known job, oldest first.
    pub fn list_jobs(&self) -> Vec<JobStatusView<R>> {
        let state = self.inner.lock();
        let mut jobs: Vec<_> = state.jobs.values().collect();
        jobs.sort_by_key(|job| job.seq);
        jobs.into_iter().map(JobRecord::view).collect()
    }

    pub fn running_count(&self) -> usize {
        self.inner.lock().running
    }

    pub fn pending_count(&self) -> usize {
        self.inner.lock().pending_count()
    }

    /// Receive status and progress events for all jobs.
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.inner.events.subscribe()
    }

    /// Cancel a Pending or Processing job.
    ///
    /// Returns `false` when the job is unknown or already finished. A
    /// Processing task is signalled and aborted if it outlives the grace period.
    pub fn cancel(&self, id: &JobId) -> bool {
        let signalled = {
            let mut state = self.inner.lock();
            let Some(job) = state.jobs.get_mut(id) else {
                return false;
            };
            let was = job.status;
            let cancel_tx = job.cancel_tx.take();
            if !job.fail(CANCELLED_MESSAGE) {
                return false;
            }
            if was == JobState::Pending {
                state.tasks.remove(id);
            }
            metrics::set_queue_depth(state.pending_count(), state.running);
            cancel_tx
        };

        if let Some(tx) = signalled {
            let _ = tx.send(true);
        }
        metrics::record_job_failed("cancelled");
        info!(job_id = %id, "Job cancelled");
        self.inner.emit(JobEvent::Status {
            job_id: id.clone(),
            status: JobState::Failed,
            error: Some(CANCELLED_MESSAGE.to_string()),
        });
        true
    }

    /// Remove finished jobs older than `older_than`; returns how many were removed.
    pub fn prune_finished(&self, older_than: Duration) -> usize {
        self.inner.prune_finished(older_than)
    }

    /// Run [`prune_finished`](Self::prune_finished) with the configured
    /// retention on the configured interval.
    ///
    /// Returns `None` when no interval is configured. The sweeper stops once
    /// every queue handle is dropped.
    pub fn spawn_sweeper(&self) -> Option<JoinHandle<()>> {
        let interval = self.inner.config.retention_sweep_interval?;
        let weak: Weak<Inner<P, R>> = Arc::downgrade(&self.inner);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let removed = inner.prune_finished(inner.config.retention);
                if removed > 0 {
                    debug!(removed, "Pruned finished jobs");
                }
            }
        }))
    }

    /// Stop accepting jobs, fail pending ones, cancel running ones and wait
    /// for them to drain.
    ///
    /// Returns `true` if everything drained within the shutdown timeout.
    pub async fn shutdown(&self) -> bool {
        let (dropped, signals) = {
            let mut state = self.inner.lock();
            state.accepting = false;

            let mut dropped = Vec::new();
            let mut signals = Vec::new();
            state.tasks.clear();
            state.pending.clear();
            for job in state.jobs.values_mut() {
                match job.status {
                    JobState::Pending => {
                        job.fail(SHUTDOWN_MESSAGE);
                        dropped.push(job.id.clone());
                    }
                    JobState::Processing => {
                        if let Some(tx) = job.cancel_tx.as_ref() {
                            signals.push(tx.clone());
                        }
                    }
                    _ => {}
                }
            }
            metrics::set_queue_depth(0, state.running);
            (dropped, signals)
        };

        info!(
            dropped = dropped.len(),
            running = signals.len(),
            "Shutting down job queue"
        );

        for id in dropped {
            metrics::record_job_failed("shutdown");
            self.inner.emit(JobEvent::Status {
                job_id: id,
                status: JobState::Failed,
                error: Some(SHUTDOWN_MESSAGE.to_string()),
            });
        }
        for tx in signals {
            let _ = tx.send(true);
        }

        let mut running_rx = self.inner.running_tx.subscribe();
        let drained = tokio::time::timeout(
            self.inner.config.shutdown_timeout,
            running_rx.wait_for(|running| *running == 0),
        )
        .await;

        match drained {
            Ok(Ok(_)) => true,
            _ => {
                warn!(
                    running = self.running_count(),
                    "Shutdown timed out with jobs still running"
                );
                false
            }
        }
    }
}

impl<P, R> Inner<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn lock(&self) -> MutexGuard<'_, QueueState<P, R>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn emit(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Admit pending jobs while slots are free.
    fn pump(this: &Arc<Self>) {
        let mut admitted = Vec::new();
        {
            let mut state = this.lock();
            while state.running < this.config.max_concurrent {
                let Some(entry) = state.pending.pop() else {
                    break;
                };
                // Cancelled while pending: its task is already gone
                let Some(task) = state.tasks.remove(&entry.id) else {
                    continue;
                };
                let Some(job) = state.jobs.get_mut(&entry.id) else {
                    continue;
                };
                if !job.transition(JobState::Processing) {
                    continue;
                }
                let (cancel_tx, cancel_rx) = watch::channel(false);
                job.cancel_tx = Some(cancel_tx);
                state.running += 1;
                admitted.push((entry.id, task, cancel_rx));
            }
            this.running_tx.send_replace(state.running);
            metrics::set_queue_depth(state.pending_count(), state.running);
        }

        for (id, task, cancel_rx) in admitted {
            info!(job_id = %id, "Job started");
            this.emit(JobEvent::Status {
                job_id: id.clone(),
                status: JobState::Processing,
                error: None,
            });
            Self::spawn_supervised(this, id, task, cancel_rx);
        }
    }

    fn spawn_supervised(
        this: &Arc<Self>,
        id: JobId,
        task: TaskFn<R>,
        cancel_rx: watch::Receiver<bool>,
    ) {
        let store: Arc<dyn ProgressStore> = this.clone();
        let ctx = JobContext::new(
            id.clone(),
            ProgressReporter::new(id.clone(), store),
            cancel_rx.clone(),
        );
        let inner = Arc::clone(this);
        let job_timeout = this.config.job_timeout;
        let cancel_grace = this.config.cancel_grace;

        tokio::spawn(async move {
            let started = Instant::now();
            let mut handle = tokio::spawn(task(ctx));

            let outcome = tokio::select! {
                joined = &mut handle => outcome_of(joined),
                _ = sleep_opt(job_timeout) => {
                    handle.abort();
                    Outcome::TimedOut(job_timeout.unwrap_or_default())
                }
                _ = cancelled_then_grace(cancel_rx, cancel_grace) => {
                    handle.abort();
                    Outcome::Aborted
                }
            };

            inner.finish(&id, outcome, started.elapsed());
            Self::pump(&inner);
        });
    }

    /// Record a task's outcome and free its slot.
    fn finish(&self, id: &JobId, outcome: Outcome<R>, elapsed: Duration) {
        let event = {
            let mut state = self.lock();
            state.running = state.running.saturating_sub(1);
            self.running_tx.send_replace(state.running);
            metrics::set_queue_depth(state.pending_count(), state.running);

            let Some(job) = state.jobs.get_mut(id) else {
                return;
            };

            match outcome {
                Outcome::Finished(Ok(result)) => {
                    if job.complete(result) {
                        metrics::record_job_completed(elapsed.as_secs_f64());
                        info!(job_id = %id, elapsed_secs = elapsed.as_secs_f64(), "Job completed");
                        let progress = JobEvent::Progress {
                            job_id: id.clone(),
                            progress: job.progress,
                            stage: job.stage.clone(),
                        };
                        Some((JobState::Completed, None, Some(progress)))
                    } else {
                        None
                    }
                }
                Outcome::Finished(Err(error)) => {
                    Self::fail_job(job, error, "error", elapsed)
                }
                Outcome::Panicked(message) => {
                    Self::fail_job(job, format!("Job panicked: {message}"), "panic", elapsed)
                }
                Outcome::TimedOut(limit) => Self::fail_job(
                    job,
                    format!("Job timed out after {} ms", limit.as_millis()),
                    "timeout",
                    elapsed,
                ),
                Outcome::Aborted => {
                    Self::fail_job(job, CANCELLED_MESSAGE.to_string(), "cancelled", elapsed)
                }
            }
        };

        if let Some((status, error, progress)) = event {
            if let Some(progress) = progress {
                self.emit(progress);
            }
            self.emit(JobEvent::Status {
                job_id: id.clone(),
                status,
                error,
            });
        }
    }

    fn fail_job(
        job: &mut JobRecord<P, R>,
        error: String,
        reason: &'static str,
        elapsed: Duration,
    ) -> Option<(JobState, Option<String>, Option<JobEvent>)> {
        // Already terminal when cancelled earlier
        if !job.fail(error.clone()) {
            return None;
        }
        metrics::record_job_failed(reason);
        warn!(
            job_id = %job.id,
            reason,
            elapsed_secs = elapsed.as_secs_f64(),
            "Job failed: {}",
            error
        );
        Some((JobState::Failed, Some(error), None))
    }

    fn prune_finished(&self, older_than: Duration) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(older_than)
            .ok()
            .and_then(|age| chrono::Utc::now().checked_sub_signed(age))
        else {
            return 0;
        };
        let mut state = self.lock();
        let before = state.jobs.len();
        state.jobs.retain(|_, job| {
            !(job.status.is_terminal() && job.finished_at.is_some_and(|at| at <= cutoff))
        });
        before - state.jobs.len()
    }
}

impl<P, R> ProgressStore for Inner<P, R>
where
    P: Clone + Send + Sync + 'static,
    R: Clone + Send + Sync + 'static,
{
    fn raise_progress(&self, id: &JobId, percent: u8) {
        let event = {
            let mut state = self.lock();
            state.jobs.get_mut(id).and_then(|job| {
                job.raise_progress(percent).then(|| JobEvent::Progress {
                    job_id: id.clone(),
                    progress: job.progress,
                    stage: job.stage.clone(),
                })
            })
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }

    fn set_stage(&self, id: &JobId, stage: String) {
        let event = {
            let mut state = self.lock();
            match state.jobs.get_mut(id) {
                Some(job) if job.status == JobState::Processing => {
                    job.stage = Some(stage);
                    job.updated_at = chrono::Utc::now();
                    Some(JobEvent::Progress {
                        job_id: id.clone(),
                        progress: job.progress,
                        stage: job.stage.clone(),
                    })
                }
                _ => None,
            }
        };
        if let Some(event) = event {
            self.emit(event);
        }
    }
}

fn outcome_of<R>(joined: Result<Result<R, String>, JoinError>) -> Outcome<R> {
    match joined {
        Ok(result) => Outcome::Finished(result),
        Err(e) if e.is_panic() => Outcome::Panicked(panic_message(e.into_panic())),
        Err(_) => Outcome::Aborted,
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn sleep_opt(limit: Option<Duration>) {
    match limit {
        Some(limit) => tokio::time::sleep(limit).await,
        None => std::future::pending().await,
    }
}

/// Resolves `grace` after the cancel flag flips; never if it does not.
async fn cancelled_then_grace(mut cancel_rx: watch::Receiver<bool>, grace: Duration) {
    if cancel_rx.wait_for(|cancelled| *cancelled).await.is_err() {
        return std::future::pending().await;
    }
    tokio::time::sleep(grace).await;
}
