pub mod config_repo;
pub mod job_repo;
pub mod memory;
pub mod pg_store;
pub mod record_repo;

pub use memory::MemoryStore;
pub use pg_store::PgStore;

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::ClassifiedFailure;
use crate::models::{
    CopyConfig, CopyRecord, CopySizing, NewCopyConfig, NewCopyRecord, OrderSubmission,
    RecordStatus, RecordWithConfig, Resolution, Settlement, SourceKind,
};

pub async fn init_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;

    // Verify connectivity
    sqlx::query("SELECT 1").execute(&pool).await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

/// Persistence for copy configs and copy records.
///
/// Every status transition is conditional on the current state, so callers
/// racing on the same row (overlapping monitor ticks, redelivered jobs) see
/// at most one winner. Methods returning `bool` report whether the update
/// applied.
#[async_trait]
pub trait CopyStore: Send + Sync {
    async fn ping(&self) -> anyhow::Result<()>;

    // --- configs -----------------------------------------------------------

    async fn create_config(&self, new: NewCopyConfig) -> anyhow::Result<CopyConfig>;

    async fn get_config(&self, id: Uuid) -> anyhow::Result<Option<CopyConfig>>;

    /// Configs of `kind` that are enabled and authorized.
    async fn list_monitored_configs(&self, kind: SourceKind) -> anyhow::Result<Vec<CopyConfig>>;

    /// Move an enabled config to paused + disabled. False if already paused.
    async fn pause_config(&self, id: Uuid) -> anyhow::Result<bool>;

    /// Zero the daily buy counter if `last_reset_date` still equals
    /// `expected_last_reset`.
    async fn reset_daily_counter(
        &self,
        id: Uuid,
        expected_last_reset: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    /// Take one buy slot from the daily quota. Rolls the window over when 24h
    /// have passed. False when the quota is exhausted.
    async fn reserve_buy_slot(&self, id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool>;

    /// Give back a slot taken by `reserve_buy_slot`.
    async fn release_buy_slot(&self, id: Uuid) -> anyhow::Result<()>;

    /// Delete a config. Its records stay, with `config_id` cleared.
    async fn delete_config(&self, id: Uuid) -> anyhow::Result<()>;

    // --- records -----------------------------------------------------------

    /// Subset of `event_ids` that already have a record for `config_id`.
    async fn recorded_event_ids(
        &self,
        config_id: Uuid,
        event_ids: &[String],
    ) -> anyhow::Result<HashSet<String>>;

    /// Insert a record. `None` if (config, event) already has one.
    async fn insert_record(&self, new: NewCopyRecord) -> anyhow::Result<Option<CopyRecord>>;

    async fn get_record(&self, id: Uuid) -> anyhow::Result<Option<CopyRecord>>;

    /// The record and its config; `None` if either is gone.
    async fn get_record_with_config(&self, id: Uuid) -> anyhow::Result<Option<RecordWithConfig>>;

    async fn list_records_by_status(
        &self,
        status: RecordStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<CopyRecord>>;

    /// Pending records of a config created before `older_than` with no
    /// submission claim. Candidates for re-enqueue.
    async fn list_stranded_records(
        &self,
        config_id: Uuid,
        older_than: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CopyRecord>>;

    async fn save_sizing(&self, id: Uuid, sizing: &CopySizing) -> anyhow::Result<()>;

    /// Mark a pending record as being submitted. False if it was already
    /// claimed or has left `pending`.
    async fn claim_submission(&self, id: Uuid) -> anyhow::Result<bool>;

    /// pending → skipped.
    async fn mark_skipped(&self, id: Uuid, reason: &str) -> anyhow::Result<bool>;

    /// pending | pending_settlement → failed.
    async fn mark_failed(&self, id: Uuid, failure: &ClassifiedFailure) -> anyhow::Result<bool>;

    /// pending → pending_settlement.
    async fn mark_submitted(&self, id: Uuid, submission: &OrderSubmission) -> anyhow::Result<bool>;

    /// pending_settlement → settled.
    async fn mark_settled(&self, id: Uuid, settlement: &Settlement) -> anyhow::Result<bool>;

    /// Settled buy records whose redemption is unset, pending, or failed
    /// fewer than `max_attempts` times.
    async fn list_redemption_candidates(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<CopyRecord>>;

    async fn record_resolution(&self, id: Uuid, resolution: &Resolution) -> anyhow::Result<()>;

    /// Set redemption to pending and count the attempt. False if the record
    /// is already redeemed.
    async fn begin_redemption(&self, id: Uuid) -> anyhow::Result<bool>;

    async fn mark_redeemed(&self, id: Uuid, tx_hash: &str) -> anyhow::Result<()>;

    async fn mark_redemption_failed(&self, id: Uuid, error: &str) -> anyhow::Result<()>;
}
