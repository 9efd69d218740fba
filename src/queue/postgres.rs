use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;

use super::{EnqueueOutcome, JobQueue, QueueError};
use crate::db::job_repo;
use crate::models::{ClaimedJob, ExecutionJob};

/// Queue backed by the `execution_jobs` table. Survives restarts; a job
/// claimed by a process that died is redelivered once its lease expires.
#[derive(Clone)]
pub struct PgJobQueue {
    pool: PgPool,
    lease: Duration,
}

impl PgJobQueue {
    pub fn new(pool: PgPool, lease: Duration) -> Self {
        Self { pool, lease }
    }
}

fn expect_row(affected: u64, job_id: &str) -> Result<(), QueueError> {
    if affected == 0 {
        return Err(QueueError::UnknownJob(job_id.to_string()));
    }
    Ok(())
}

#[async_trait]
impl JobQueue for PgJobQueue {
    async fn enqueue(&self, job: &ExecutionJob) -> Result<EnqueueOutcome, QueueError> {
        if job_repo::insert_job(&self.pool, job).await? {
            Ok(EnqueueOutcome::Enqueued)
        } else {
            Ok(EnqueueOutcome::Duplicate)
        }
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        let lease_secs = i64::try_from(self.lease.as_secs()).unwrap_or(i64::MAX);
        let Some(row) = job_repo::claim_next_job(&self.pool, lease_secs).await? else {
            return Ok(None);
        };

        let attempts = u32::try_from(row.attempts).unwrap_or(1);
        let job_id = row.id.clone();
        match ExecutionJob::try_from(row) {
            Ok(job) => Ok(Some(ClaimedJob { job, attempts })),
            Err(e) => {
                // Unreadable row: park it so it stops being claimed.
                tracing::error!(job_id = %job_id, error = %e, "Queue: unreadable job row");
                job_repo::bury_job(&self.pool, &job_id, &e.to_string()).await?;
                Ok(None)
            }
        }
    }

    async fn ack(&self, job_id: &str) -> Result<(), QueueError> {
        expect_row(job_repo::complete_job(&self.pool, job_id).await?, job_id)
    }

    async fn retry_later(
        &self,
        job_id: &str,
        delay: Duration,
        error: &str,
    ) -> Result<(), QueueError> {
        let affected =
            job_repo::reschedule_job(&self.pool, job_id, delay.as_secs_f64(), error).await?;
        expect_row(affected, job_id)
    }

    async fn dead_letter(&self, job_id: &str, error: &str) -> Result<(), QueueError> {
        expect_row(job_repo::bury_job(&self.pool, job_id, error).await?, job_id)
    }

    async fn purge_finished(&self, older_than: Duration) -> Result<u64, QueueError> {
        Ok(job_repo::purge_finished_jobs(&self.pool, older_than.as_secs_f64()).await?)
    }
}
