pub mod backoff;
pub mod memory;
pub mod postgres;
pub mod worker;

pub use backoff::ExponentialBackoff;
pub use memory::MemoryJobQueue;
pub use postgres::PgJobQueue;
pub use worker::{run_retention_sweep, run_worker_pool, JobHandler};

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{ClaimedJob, ExecutionJob};

#[derive(Debug, Error)]
pub enum QueueError {
    /// The broker could not be reached. Callers treat the job as not yet
    /// queued and recover later.
    #[error("queue unavailable: {0}")]
    Unavailable(String),

    #[error("unknown job {0}")]
    UnknownJob(String),
}

impl From<sqlx::Error> for QueueError {
    fn from(e: sqlx::Error) -> Self {
        QueueError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    Enqueued,
    /// A job with the same id is already queued, running, or done and not
    /// yet purged.
    Duplicate,
}

/// How failed jobs are redelivered.
///
/// `max_attempts = 1` means a failed job is dead-lettered straight away.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn retries_enabled(&self) -> bool {
        self.max_attempts > 1
    }

    /// Delay before redelivering a job that has failed `attempts` times.
    pub fn delay_for(&self, attempts: u32) -> Duration {
        ExponentialBackoff::new(self.base_delay, self.max_delay, 0.1)
            .delay_for_attempt(attempts.saturating_sub(1))
    }
}

/// Durable, idempotent job dispatch.
///
/// A claimed job is invisible to other workers until it is acked, retried,
/// dead-lettered, or its lease runs out. Lease expiry is what makes delivery
/// at-least-once.
#[async_trait]
pub trait JobQueue: Send + Sync {
    async fn enqueue(&self, job: &ExecutionJob) -> Result<EnqueueOutcome, QueueError>;

    /// Next ready job, if any.
    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError>;

    async fn ack(&self, job_id: &str) -> Result<(), QueueError>;

    /// Release the job for redelivery after `delay`.
    async fn retry_later(&self, job_id: &str, delay: Duration, error: &str)
        -> Result<(), QueueError>;

    /// Park the job for good. A later enqueue of the same id revives it.
    async fn dead_letter(&self, job_id: &str, error: &str) -> Result<(), QueueError>;

    /// Drop done and dead jobs that finished more than `older_than` ago.
    /// Returns how many were removed. A purged id can be enqueued again;
    /// the record's own status keeps that harmless.
    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError>;
}
