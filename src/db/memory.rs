use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::CopyStore;
use crate::errors::ClassifiedFailure;
use crate::models::config::QUOTA_WINDOW_HOURS;
use crate::models::record::ORDER_STATUS_SUBMITTING;
use crate::models::{
    ConfigStatus, CopyConfig, CopyRecord, CopySizing, NewCopyConfig, NewCopyRecord,
    OrderSubmission, RecordStatus, RecordWithConfig, RedemptionStatus, Resolution, Settlement,
    Side, SourceKind,
};

#[derive(Default)]
struct Tables {
    configs: HashMap<Uuid, CopyConfig>,
    records: HashMap<Uuid, CopyRecord>,
    /// (config_id, source_event_id) → record id.
    by_event: HashMap<(Uuid, String), Uuid>,
}

/// In-process store for running without Postgres and for tests.
///
/// One lock over all tables, so every conditional transition is atomic in
/// the same way a single-row UPDATE is.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every record, oldest first.
    pub async fn all_records(&self) -> Vec<CopyRecord> {
        let tables = self.tables.read().await;
        let mut records: Vec<_> = tables.records.values().cloned().collect();
        records.sort_by_key(|r| r.created_at);
        records
    }

    /// Overwrite a stored config. Lets tests stage state the public
    /// operations never produce directly.
    pub async fn put_config(&self, config: CopyConfig) {
        self.tables.write().await.configs.insert(config.id, config);
    }

    pub async fn put_record(&self, record: CopyRecord) {
        let mut tables = self.tables.write().await;
        if let Some(config_id) = record.config_id {
            tables
                .by_event
                .insert((config_id, record.source_event_id.clone()), record.id);
        }
        tables.records.insert(record.id, record);
    }

    /// Apply `f` to the record if `guard` holds. Returns whether it did.
    async fn update_record<G, F>(&self, id: Uuid, guard: G, f: F) -> bool
    where
        G: FnOnce(&CopyRecord) -> bool,
        F: FnOnce(&mut CopyRecord),
    {
        let mut tables = self.tables.write().await;
        match tables.records.get_mut(&id) {
            Some(record) if guard(record) => {
                f(record);
                record.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl CopyStore for MemoryStore {
    async fn ping(&self) -> anyhow::Result<()> {
        Ok(())
    }

    async fn create_config(&self, new: NewCopyConfig) -> anyhow::Result<CopyConfig> {
        anyhow::ensure!(
            new.copy_buys || new.copy_sells,
            "a config must copy buys, sells, or both"
        );
        let now = Utc::now();
        let config = CopyConfig {
            id: Uuid::new_v4(),
            owner: new.owner,
            source: new.source,
            copy_buys: new.copy_buys,
            copy_sells: new.copy_sells,
            amount_type: new.amount_type,
            buy_amount: new.buy_amount,
            sell_amount: new.sell_amount,
            min_amount: new.min_amount,
            max_amount: new.max_amount,
            market_categories: new.market_categories,
            slippage: new.slippage,
            max_retries: new.max_retries,
            max_buy_trades_per_day: new.max_buy_trades_per_day,
            buy_trades_today: 0,
            last_reset_date: None,
            start_date: new.start_date,
            duration_days: new.duration_days,
            enabled: new.enabled,
            authorized: new.authorized,
            status: ConfigStatus::Active,
            created_at: now,
            updated_at: now,
        };
        self.tables
            .write()
            .await
            .configs
            .insert(config.id, config.clone());
        Ok(config)
    }

    async fn get_config(&self, id: Uuid) -> anyhow::Result<Option<CopyConfig>> {
        Ok(self.tables.read().await.configs.get(&id).cloned())
    }

    async fn list_monitored_configs(&self, kind: SourceKind) -> anyhow::Result<Vec<CopyConfig>> {
        let tables = self.tables.read().await;
        let mut configs: Vec<_> = tables
            .configs
            .values()
            .filter(|c| c.kind() == kind && c.enabled && c.authorized)
            .cloned()
            .collect();
        configs.sort_by_key(|c| c.created_at);
        Ok(configs)
    }

    async fn pause_config(&self, id: Uuid) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.configs.get_mut(&id) {
            Some(c) if c.enabled || c.status == ConfigStatus::Active => {
                c.status = ConfigStatus::Paused;
                c.enabled = false;
                c.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reset_daily_counter(
        &self,
        id: Uuid,
        expected_last_reset: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.configs.get_mut(&id) {
            Some(c) if c.last_reset_date == expected_last_reset => {
                c.buy_trades_today = 0;
                c.last_reset_date = Some(now);
                c.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reserve_buy_slot(&self, id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(c) = tables.configs.get_mut(&id) else {
            return Ok(false);
        };

        let window_elapsed = c
            .last_reset_date
            .map(|reset| reset <= now - Duration::hours(QUOTA_WINDOW_HOURS))
            .unwrap_or(true);

        if window_elapsed {
            c.buy_trades_today = 1;
            c.last_reset_date = Some(now);
        } else {
            if let Some(max) = c.max_buy_trades_per_day {
                if c.buy_trades_today >= max {
                    return Ok(false);
                }
            }
            c.buy_trades_today += 1;
        }
        c.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_buy_slot(&self, id: Uuid) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(c) = tables.configs.get_mut(&id) {
            c.buy_trades_today = (c.buy_trades_today - 1).max(0);
            c.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete_config(&self, id: Uuid) -> anyhow::Result<()> {
        let mut tables = self.tables.write().await;
        tables.configs.remove(&id);
        tables.by_event.retain(|(config_id, _), _| *config_id != id);
        for record in tables.records.values_mut() {
            if record.config_id == Some(id) {
                record.config_id = None;
            }
        }
        Ok(())
    }

    async fn recorded_event_ids(
        &self,
        config_id: Uuid,
        event_ids: &[String],
    ) -> anyhow::Result<HashSet<String>> {
        let tables = self.tables.read().await;
        Ok(event_ids
            .iter()
            .filter(|id| tables.by_event.contains_key(&(config_id, (*id).clone())))
            .cloned()
            .collect())
    }

    async fn insert_record(&self, new: NewCopyRecord) -> anyhow::Result<Option<CopyRecord>> {
        let mut tables = self.tables.write().await;
        let key = (new.config_id, new.source_event_id.clone());
        if tables.by_event.contains_key(&key) {
            return Ok(None);
        }

        let now = Utc::now();
        let record = CopyRecord {
            id: Uuid::new_v4(),
            kind: new.kind,
            config_id: Some(new.config_id),
            source_event_id: new.source_event_id,
            market_id: new.market_id,
            market_slug: new.market_slug,
            asset_id: new.asset_id,
            outcome_index: new.outcome_index,
            side: new.side,
            original_amount: new.original_amount,
            original_price: new.original_price,
            original_shares: new.original_shares,
            copied_amount: None,
            copied_price: None,
            copied_shares: None,
            cost_basis: None,
            order_id: None,
            order_status: None,
            settlement_tx_hash: None,
            status: new.status,
            error_message: new.error_message,
            failure_category: None,
            failure_reason: None,
            outcome: None,
            pnl: None,
            resolved_at: None,
            redemption_status: None,
            redemption_tx_hash: None,
            redemption_error: None,
            redemption_attempts: 0,
            created_at: now,
            updated_at: now,
        };
        tables.by_event.insert(key, record.id);
        tables.records.insert(record.id, record.clone());
        Ok(Some(record))
    }

    async fn get_record(&self, id: Uuid) -> anyhow::Result<Option<CopyRecord>> {
        Ok(self.tables.read().await.records.get(&id).cloned())
    }

    async fn get_record_with_config(&self, id: Uuid) -> anyhow::Result<Option<RecordWithConfig>> {
        let tables = self.tables.read().await;
        let Some(record) = tables.records.get(&id) else {
            return Ok(None);
        };
        let config = record.config_id.and_then(|cid| tables.configs.get(&cid));
        Ok(config.map(|config| RecordWithConfig {
            record: record.clone(),
            config: config.clone(),
        }))
    }

    async fn list_records_by_status(
        &self,
        status: RecordStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        let mut records: Vec<_> = self
            .all_records()
            .await
            .into_iter()
            .filter(|r| r.status == status)
            .collect();
        records.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(records)
    }

    async fn list_stranded_records(
        &self,
        config_id: Uuid,
        older_than: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        Ok(self
            .all_records()
            .await
            .into_iter()
            .filter(|r| {
                r.config_id == Some(config_id)
                    && r.status == RecordStatus::Pending
                    && r.order_status.is_none()
                    && r.created_at < older_than
            })
            .collect())
    }

    async fn save_sizing(&self, id: Uuid, sizing: &CopySizing) -> anyhow::Result<()> {
        self.update_record(
            id,
            |r| r.status == RecordStatus::Pending,
            |r| {
                r.copied_amount = Some(sizing.amount);
                r.copied_price = Some(sizing.price);
                r.copied_shares = Some(sizing.shares);
                r.cost_basis = Some(sizing.cost_basis);
            },
        )
        .await;
        Ok(())
    }

    async fn claim_submission(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .update_record(
                id,
                |r| r.status == RecordStatus::Pending && r.order_status.is_none(),
                |r| r.order_status = Some(ORDER_STATUS_SUBMITTING.to_string()),
            )
            .await)
    }

    async fn mark_skipped(&self, id: Uuid, reason: &str) -> anyhow::Result<bool> {
        Ok(self
            .update_record(
                id,
                |r| r.status == RecordStatus::Pending,
                |r| {
                    r.status = RecordStatus::Skipped;
                    r.error_message = Some(reason.to_string());
                },
            )
            .await)
    }

    async fn mark_failed(&self, id: Uuid, failure: &ClassifiedFailure) -> anyhow::Result<bool> {
        Ok(self
            .update_record(
                id,
                |r| {
                    matches!(
                        r.status,
                        RecordStatus::Pending | RecordStatus::PendingSettlement
                    )
                },
                |r| {
                    r.status = RecordStatus::Failed;
                    r.error_message = Some(failure.message.clone());
                    r.failure_category = Some(failure.category.as_str().to_string());
                    r.failure_reason = Some(failure.reason.as_str().to_string());
                },
            )
            .await)
    }

    async fn mark_submitted(&self, id: Uuid, submission: &OrderSubmission) -> anyhow::Result<bool> {
        Ok(self
            .update_record(
                id,
                |r| r.status == RecordStatus::Pending,
                |r| {
                    r.status = RecordStatus::PendingSettlement;
                    r.order_id = Some(submission.order_id.clone());
                    r.order_status = Some(submission.status.clone());
                    r.settlement_tx_hash = submission.tx_hash.clone();
                },
            )
            .await)
    }

    async fn mark_settled(&self, id: Uuid, settlement: &Settlement) -> anyhow::Result<bool> {
        Ok(self
            .update_record(
                id,
                |r| r.status == RecordStatus::PendingSettlement,
                |r| {
                    r.status = RecordStatus::Settled;
                    r.copied_price = Some(settlement.price);
                    r.copied_shares = Some(settlement.shares);
                    r.cost_basis = Some(settlement.price * settlement.shares);
                    if settlement.tx_hash.is_some() {
                        r.settlement_tx_hash = settlement.tx_hash.clone();
                    }
                    r.order_status = Some(settlement.order_status.clone());
                },
            )
            .await)
    }

    async fn list_redemption_candidates(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        let mut records: Vec<_> = self
            .tables
            .read()
            .await
            .records
            .values()
            .filter(|r| {
                r.status == RecordStatus::Settled
                    && r.side == Side::Buy
                    && match r.redemption_status {
                        None | Some(RedemptionStatus::Pending) => true,
                        Some(RedemptionStatus::Failed) => r.redemption_attempts < max_attempts,
                        Some(RedemptionStatus::Redeemed) => false,
                    }
            })
            .cloned()
            .collect();
        records.sort_by_key(|r| r.updated_at);
        records.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(records)
    }

    async fn record_resolution(&self, id: Uuid, resolution: &Resolution) -> anyhow::Result<()> {
        self.update_record(
            id,
            |_| true,
            |r| {
                r.outcome = Some(resolution.winning_outcome);
                r.pnl = Some(resolution.pnl);
                r.resolved_at = Some(resolution.resolved_at);
            },
        )
        .await;
        Ok(())
    }

    async fn begin_redemption(&self, id: Uuid) -> anyhow::Result<bool> {
        Ok(self
            .update_record(
                id,
                |r| r.redemption_status != Some(RedemptionStatus::Redeemed),
                |r| {
                    r.redemption_status = Some(RedemptionStatus::Pending);
                    r.redemption_attempts += 1;
                },
            )
            .await)
    }

    async fn mark_redeemed(&self, id: Uuid, tx_hash: &str) -> anyhow::Result<()> {
        self.update_record(
            id,
            |_| true,
            |r| {
                r.redemption_status = Some(RedemptionStatus::Redeemed);
                r.redemption_tx_hash = Some(tx_hash.to_string());
                r.redemption_error = None;
            },
        )
        .await;
        Ok(())
    }

    async fn mark_redemption_failed(&self, id: Uuid, error: &str) -> anyhow::Result<()> {
        self.update_record(
            id,
            |r| r.redemption_status != Some(RedemptionStatus::Redeemed),
            |r| {
                r.redemption_status = Some(RedemptionStatus::Failed);
                r.redemption_error = Some(error.to_string());
            },
        )
        .await;
        Ok(())
    }
}
