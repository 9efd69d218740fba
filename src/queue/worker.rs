use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::{counter, gauge};
use tokio::task::JoinHandle;

use super::{JobQueue, QueueError, RetryPolicy};
use crate::models::ClaimedJob;

/// Work done for one delivered job.
///
/// `Err` means the job could not be processed at all (for example the store
/// was unreachable) and is subject to the retry policy. Business failures
/// are recorded by the handler and returned as `Ok`.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &ClaimedJob) -> anyhow::Result<()>;
}

/// Claim and process at most one job. Returns whether a job was found.
pub async fn process_next(
    queue: &dyn JobQueue,
    handler: &dyn JobHandler,
    policy: &RetryPolicy,
) -> Result<bool, QueueError> {
    let Some(claimed) = queue.claim().await? else {
        return Ok(false);
    };
    let job_id = claimed.job.id.clone();

    gauge!("jobs_in_flight").increment(1.0);
    let result = handler.handle(&claimed).await;
    gauge!("jobs_in_flight").decrement(1.0);

    match result {
        Ok(()) => {
            queue.ack(&job_id).await?;
        }
        Err(e) if claimed.attempts < policy.max_attempts => {
            let delay = policy.delay_for(claimed.attempts);
            tracing::warn!(
                job_id = %job_id,
                attempt = claimed.attempts,
                max_attempts = policy.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %e,
                "Worker: job failed, scheduling retry"
            );
            queue.retry_later(&job_id, delay, &e.to_string()).await?;
        }
        Err(e) => {
            tracing::error!(
                job_id = %job_id,
                attempt = claimed.attempts,
                error = %e,
                "Worker: job failed, dead-lettering"
            );
            counter!("jobs_dead_lettered").increment(1);
            queue.dead_letter(&job_id, &e.to_string()).await?;
        }
    }

    Ok(true)
}

/// Spawn `concurrency` workers that drain the queue forever. Each worker
/// sleeps `idle_wait` when the queue is empty or unreachable.
pub fn run_worker_pool(
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    concurrency: usize,
    policy: RetryPolicy,
    idle_wait: Duration,
) -> Vec<JoinHandle<()>> {
    tracing::info!(
        concurrency,
        max_attempts = policy.max_attempts,
        "Worker pool started"
    );

    (0..concurrency.max(1))
        .map(|worker_id| {
            let queue = queue.clone();
            let handler = handler.clone();
            tokio::spawn(async move {
                loop {
                    match process_next(queue.as_ref(), handler.as_ref(), &policy).await {
                        Ok(true) => {}
                        Ok(false) => tokio::time::sleep(idle_wait).await,
                        Err(e) => {
                            tracing::warn!(worker_id, error = %e, "Worker: queue error");
                            tokio::time::sleep(idle_wait).await;
                        }
                    }
                }
            })
        })
        .collect()
}

/// Periodically drop finished jobs older than `retention`, keeping the
/// queue from growing with every job ever run.
pub fn run_retention_sweep(
    queue: Arc<dyn JobQueue>,
    retention: Duration,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match queue.purge_finished(retention).await {
                Ok(0) => {}
                Ok(purged) => {
                    counter!("jobs_purged").increment(purged);
                    tracing::debug!(purged, "Queue: finished jobs purged");
                }
                Err(e) => tracing::warn!(error = %e, "Queue: purge failed"),
            }
        }
    })
}
