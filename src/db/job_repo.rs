use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::{ExecutionJob, SourceKind};

/// Database row for the execution_jobs table.
#[derive(Debug, Clone, FromRow)]
pub struct JobRow {
    pub id: String,
    pub kind: String,
    pub record_id: Uuid,
    pub config_id: Uuid,
    pub source_event_id: String,
    pub state: String,
    pub attempts: i32,
    pub run_at: DateTime<Utc>,
    pub locked_until: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<JobRow> for ExecutionJob {
    type Error = anyhow::Error;

    fn try_from(row: JobRow) -> Result<Self, Self::Error> {
        let kind = SourceKind::parse(&row.kind)
            .ok_or_else(|| anyhow::anyhow!("unknown job kind {:?}", row.kind))?;
        Ok(ExecutionJob {
            id: row.id,
            kind,
            record_id: row.record_id,
            config_id: row.config_id,
            source_event_id: row.source_event_id,
        })
    }
}

/// Insert a job, or revive it if it was dead-lettered. Returns false when a
/// live or finished job already holds the id.
pub async fn insert_job(pool: &PgPool, job: &ExecutionJob) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"
        INSERT INTO execution_jobs (id, kind, record_id, config_id, source_event_id)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE
            SET state = 'queued', attempts = 0, run_at = NOW(), locked_until = NULL,
                updated_at = NOW()
            WHERE execution_jobs.state = 'dead'
        "#,
    )
    .bind(&job.id)
    .bind(job.kind.as_str())
    .bind(job.record_id)
    .bind(job.config_id)
    .bind(&job.source_event_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Lease the oldest ready job. A running job whose lease has expired counts
/// as ready. `SKIP LOCKED` keeps concurrent claimers off the same row.
pub async fn claim_next_job(pool: &PgPool, lease_secs: i64) -> Result<Option<JobRow>, sqlx::Error> {
    sqlx::query_as::<_, JobRow>(
        r#"
        UPDATE execution_jobs
        SET state = 'running',
            attempts = attempts + 1,
            locked_until = NOW() + make_interval(secs => $1),
            updated_at = NOW()
        WHERE id = (
            SELECT id FROM execution_jobs
            WHERE (state = 'queued' AND run_at <= NOW())
               OR (state = 'running' AND locked_until <= NOW())
            ORDER BY run_at ASC, created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
        RETURNING *
        "#,
    )
    .bind(lease_secs as f64)
    .fetch_optional(pool)
    .await
}

pub async fn complete_job(pool: &PgPool, job_id: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE execution_jobs
        SET state = 'done', locked_until = NULL, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn reschedule_job(
    pool: &PgPool,
    job_id: &str,
    delay_secs: f64,
    error: &str,
) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE execution_jobs
        SET state = 'queued',
            run_at = NOW() + make_interval(secs => $2),
            locked_until = NULL,
            last_error = $3,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(delay_secs)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

pub async fn bury_job(pool: &PgPool, job_id: &str, error: &str) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        UPDATE execution_jobs
        SET state = 'dead', locked_until = NULL, last_error = $2, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Delete done and dead jobs last touched more than `older_than_secs` ago.
pub async fn purge_finished_jobs(pool: &PgPool, older_than_secs: f64) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        r#"
        DELETE FROM execution_jobs
        WHERE state IN ('done', 'dead')
          AND updated_at < NOW() - make_interval(secs => $1)
        "#,
    )
    .bind(older_than_secs)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}
