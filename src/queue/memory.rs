use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{EnqueueOutcome, JobQueue, QueueError};
use crate::models::{ClaimedJob, ExecutionJob};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Queued,
    Running,
    Done,
    Dead,
}

struct Entry {
    job: ExecutionJob,
    state: JobState,
    attempts: u32,
    seq: u64,
    run_at: Instant,
    locked_until: Option<Instant>,
    finished_at: Option<Instant>,
    last_error: Option<String>,
}

impl Entry {
    fn is_ready(&self, now: Instant) -> bool {
        match self.state {
            JobState::Queued => self.run_at <= now,
            // Lease ran out: the worker is presumed dead.
            JobState::Running => self.locked_until.map(|t| t <= now).unwrap_or(true),
            JobState::Done | JobState::Dead => false,
        }
    }
}

#[derive(Default)]
struct Inner {
    jobs: HashMap<String, Entry>,
    next_seq: u64,
}

/// Process-local queue. Same contract as the Postgres queue, minus
/// durability across restarts.
pub struct MemoryJobQueue {
    lease: Duration,
    inner: Mutex<Inner>,
}

impl MemoryJobQueue {
    pub fn new(lease: Duration) -> Self {
        Self {
            lease,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub async fn state(&self, job_id: &str) -> Option<JobState> {
        self.inner.lock().await.jobs.get(job_id).map(|e| e.state)
    }

    pub async fn attempts(&self, job_id: &str) -> Option<u32> {
        self.inner.lock().await.jobs.get(job_id).map(|e| e.attempts)
    }

    pub async fn last_error(&self, job_id: &str) -> Option<String> {
        self.inner
            .lock()
            .await
            .jobs
            .get(job_id)
            .and_then(|e| e.last_error.clone())
    }

    /// Jobs not yet done or dead.
    pub async fn outstanding(&self) -> usize {
        self.inner
            .lock()
            .await
            .jobs
            .values()
            .filter(|e| matches!(e.state, JobState::Queued | JobState::Running))
            .count()
    }
}

impl Default for MemoryJobQueue {
    fn default() -> Self {
        Self::new(Duration::from_secs(300))
    }
}

#[async_trait]
impl JobQueue for MemoryJobQueue {
    async fn enqueue(&self, job: &ExecutionJob) -> Result<EnqueueOutcome, QueueError> {
        let mut inner = self.inner.lock().await;
        let seq = inner.next_seq;
        inner.next_seq += 1;

        if let Some(existing) = inner.jobs.get_mut(&job.id) {
            if existing.state != JobState::Dead {
                return Ok(EnqueueOutcome::Duplicate);
            }
            existing.state = JobState::Queued;
            existing.attempts = 0;
            existing.seq = seq;
            existing.run_at = Instant::now();
            existing.locked_until = None;
            existing.finished_at = None;
            return Ok(EnqueueOutcome::Enqueued);
        }

        inner.jobs.insert(
            job.id.clone(),
            Entry {
                job: job.clone(),
                state: JobState::Queued,
                attempts: 0,
                seq,
                run_at: Instant::now(),
                locked_until: None,
                finished_at: None,
                last_error: None,
            },
        );
        Ok(EnqueueOutcome::Enqueued)
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        let Some(entry) = inner
            .jobs
            .values_mut()
            .filter(|e| e.is_ready(now))
            .min_by_key(|e| (e.run_at, e.seq))
        else {
            return Ok(None);
        };

        entry.state = JobState::Running;
        entry.attempts += 1;
        entry.locked_until = Some(now + self.lease);

        Ok(Some(ClaimedJob {
            job: entry.job.clone(),
            attempts: entry.attempts,
        }))
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        entry.state = JobState::Done;
        entry.locked_until = None;
        entry.finished_at = Some(Instant::now());
        Ok(())
    }

    async fn retry_later(
        &self,
        job_id: &str,
        delay: Duration,
        error: &str,
    ) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        entry.state = JobState::Queued;
        entry.run_at = Instant::now() + delay;
        entry.locked_until = None;
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn dead_letter(&self, job_id: &str, error: &str) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        let entry = inner
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::UnknownJob(job_id.to_string()))?;
        entry.state = JobState::Dead;
        entry.locked_until = None;
        entry.finished_at = Some(Instant::now());
        entry.last_error = Some(error.to_string());
        Ok(())
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();
        let before = inner.jobs.len();
        inner.jobs.retain(|_, e| match e.finished_at {
            Some(at) => now.saturating_duration_since(at) < older_than,
            None => true,
        });
        Ok((before - inner.jobs.len()) as u64)
    }
}
