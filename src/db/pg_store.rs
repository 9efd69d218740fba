use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{config_repo, record_repo, CopyStore};
use crate::errors::ClassifiedFailure;
use crate::models::{
    CopyConfig, CopyRecord, CopySizing, NewCopyConfig, NewCopyRecord, OrderSubmission,
    RecordStatus, RecordWithConfig, Resolution, Settlement, SourceKind,
};

/// Postgres-backed store.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl CopyStore for PgStore {
    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_config(&self, new: NewCopyConfig) -> anyhow::Result<CopyConfig> {
        config_repo::insert_config(&self.pool, &new).await
    }

    async fn get_config(&self, id: Uuid) -> anyhow::Result<Option<CopyConfig>> {
        config_repo::get_config(&self.pool, id).await
    }

    async fn list_monitored_configs(&self, kind: SourceKind) -> anyhow::Result<Vec<CopyConfig>> {
        config_repo::get_monitored_configs(&self.pool, kind).await
    }

    async fn pause_config(&self, id: Uuid) -> anyhow::Result<bool> {
        config_repo::pause_config(&self.pool, id).await
    }

    async fn reset_daily_counter(
        &self,
        id: Uuid,
        expected_last_reset: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        config_repo::reset_daily_counter(&self.pool, id, expected_last_reset, now).await
    }

    async fn reserve_buy_slot(&self, id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool> {
        config_repo::reserve_buy_slot(&self.pool, id, now).await
    }

    async fn release_buy_slot(&self, id: Uuid) -> anyhow::Result<()> {
        config_repo::release_buy_slot(&self.pool, id).await
    }

    async fn delete_config(&self, id: Uuid) -> anyhow::Result<()> {
        config_repo::delete_config(&self.pool, id).await
    }

    async fn recorded_event_ids(
        &self,
        config_id: Uuid,
        event_ids: &[String],
    ) -> anyhow::Result<HashSet<String>> {
        record_repo::recorded_event_ids(&self.pool, config_id, event_ids).await
    }

    async fn insert_record(&self, new: NewCopyRecord) -> anyhow::Result<Option<CopyRecord>> {
        record_repo::insert_record(&self.pool, &new).await
    }

    async fn get_record(&self, id: Uuid) -> anyhow::Result<Option<CopyRecord>> {
        record_repo::get_record(&self.pool, id).await
    }

    async fn get_record_with_config(&self, id: Uuid) -> anyhow::Result<Option<RecordWithConfig>> {
        let Some(record) = record_repo::get_record(&self.pool, id).await? else {
            return Ok(None);
        };
        let Some(config_id) = record.config_id else {
            return Ok(None);
        };
        let config = config_repo::get_config(&self.pool, config_id).await?;
        Ok(config.map(|config| RecordWithConfig { record, config }))
    }

    async fn list_records_by_status(
        &self,
        status: RecordStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        record_repo::get_records_by_status(&self.pool, status, limit).await
    }

    async fn list_stranded_records(
        &self,
        config_id: Uuid,
        older_than: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        record_repo::get_stranded_records(&self.pool, config_id, older_than).await
    }

    async fn save_sizing(&self, id: Uuid, sizing: &CopySizing) -> anyhow::Result<()> {
        record_repo::save_sizing(&self.pool, id, sizing).await
    }

    async fn claim_submission(&self, id: Uuid) -> anyhow::Result<bool> {
        record_repo::claim_submission(&self.pool, id).await
    }

    async fn mark_skipped(&self, id: Uuid, reason: &str) -> anyhow::Result<bool> {
        record_repo::mark_skipped(&self.pool, id, reason).await
    }

    async fn mark_failed(&self, id: Uuid, failure: &ClassifiedFailure) -> anyhow::Result<bool> {
        record_repo::mark_failed(&self.pool, id, failure).await
    }

    async fn mark_submitted(&self, id: Uuid, submission: &OrderSubmission) -> anyhow::Result<bool> {
        record_repo::mark_submitted(&self.pool, id, submission).await
    }

    async fn mark_settled(&self, id: Uuid, settlement: &Settlement) -> anyhow::Result<bool> {
        record_repo::mark_settled(&self.pool, id, settlement).await
    }

    async fn list_redemption_candidates(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        record_repo::get_redemption_candidates(&self.pool, max_attempts, limit).await
    }

    async fn record_resolution(&self, id: Uuid, resolution: &Resolution) -> anyhow::Result<()> {
        record_repo::record_resolution(&self.pool, id, resolution).await
    }

    async fn begin_redemption(&self, id: Uuid) -> anyhow::Result<bool> {
        record_repo::begin_redemption(&self.pool, id).await
    }

    async fn mark_redeemed(&self, id: Uuid, tx_hash: &str) -> anyhow::Result<()> {
        record_repo::mark_redeemed(&self.pool, id, tx_hash).await
    }

    async fn mark_redemption_failed(&self, id: Uuid, error: &str) -> anyhow::Result<()> {
        record_repo::mark_redemption_failed(&self.pool, id, error).await
    }
}
