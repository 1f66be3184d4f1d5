//! In-process job queue for renders.
//!
//! This crate provides:
//! - Bounded concurrency with priority-then-FIFO admission
//! - Forward-only job state with monotonic progress
//! - Cancellation through `watch` channels, with a grace-period abort
//! - Job events over a `broadcast` channel
//! - Retention pruning and graceful shutdown

pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod progress;
pub mod queue;

pub use config::QueueConfig;
pub use error::{QueueError, QueueResult};
pub use job::{CANCELLED_MESSAGE, SHUTDOWN_MESSAGE};
pub use progress::{JobContext, JobEvent, ProgressReporter};
pub use queue::JobQueue;
