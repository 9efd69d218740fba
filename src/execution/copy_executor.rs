use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::db::CopyStore;
use crate::errors::{classify, ClassifiedFailure, FailureReason};
use crate::external::{BalanceService, ExecutionVenue, OrderRequest};
use crate::models::{
    ClaimedJob, CopyConfig, CopyRecord, CopySizing, OrderSubmission, RecordStatus, Side,
};
use crate::queue::{ExponentialBackoff, JobHandler};
use crate::services::settlement_monitor::SettlementMonitor;

use super::eligibility::{check_eligibility, Ineligible};
use super::position_sizer::{calculate_size, validate_policy, OriginalTrade};

/// Knobs for the venue call.
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    /// Retry transient venue errors up to the config's `max_retries`.
    pub venue_retry_enabled: bool,
    pub retry_base_delay: Duration,
    pub retry_max_delay: Duration,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            venue_retry_enabled: false,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
        }
    }
}

/// What one execution attempt did to its record.
#[derive(Debug, Clone, PartialEq)]
pub enum ExecutionOutcome {
    /// Record or config no longer exists.
    Missing,
    /// Record already left `pending`; nothing to do.
    AlreadyProcessed(RecordStatus),
    Skipped(String),
    Failed(ClassifiedFailure),
    Submitted(OrderSubmission),
}

/// Executes copy records handed out by the job queue.
///
/// Safe to run more than once for the same record: every write is
/// conditional on the record still being `pending`, and the venue is only
/// called after winning the submission claim.
pub struct CopyExecutor {
    store: Arc<dyn CopyStore>,
    venue: Arc<dyn ExecutionVenue>,
    balances: Arc<dyn BalanceService>,
    settlement: SettlementMonitor,
    settings: ExecutorSettings,
}

impl CopyExecutor {
    pub fn new(
        store: Arc<dyn CopyStore>,
        venue: Arc<dyn ExecutionVenue>,
        balances: Arc<dyn BalanceService>,
        settlement: SettlementMonitor,
        settings: ExecutorSettings,
    ) -> Self {
        Self {
            store,
            venue,
            balances,
            settlement,
            settings,
        }
    }

    /// Run one record through eligibility, sizing and submission.
    ///
    /// Only store errors surface as `Err`; everything else is written to the
    /// record and reported in the outcome.
    pub async fn execute(&self, record_id: Uuid) -> anyhow::Result<ExecutionOutcome> {
        let Some(aggregate) = self.store.get_record_with_config(record_id).await? else {
            tracing::warn!(record_id = %record_id, "Executor: record or config missing, dropping job");
            return Ok(ExecutionOutcome::Missing);
        };
        let record = aggregate.record;
        let config = aggregate.config;

        if record.status != RecordStatus::Pending {
            tracing::debug!(
                record_id = %record.id,
                status = %record.status,
                "Executor: record already processed"
            );
            return Ok(ExecutionOutcome::AlreadyProcessed(record.status));
        }

        // A previous delivery claimed the submission and never confirmed it.
        // The order may or may not exist; submitting again could double it.
        if record.has_unconfirmed_submission() {
            let failure = ClassifiedFailure::new(
                FailureReason::SubmissionInterrupted,
                "previous submission attempt did not complete; not resubmitting",
            );
            return self.fail(&record, &config, failure, false).await;
        }

        let now = Utc::now();
        if let Err(reason) = check_eligibility(&config, record.side, now) {
            return self.skip(&record, &reason.to_string()).await;
        }
        if let Err(e) = validate_policy(&config.amount_policy(), record.side) {
            return self.skip(&record, &e.to_string()).await;
        }

        let balance = match self.fetch_balance(&config, &record).await {
            Ok(b) => b,
            Err(failure) => return self.fail(&record, &config, failure, false).await,
        };

        let original = OriginalTrade {
            side: record.side,
            amount: record.original_amount,
            price: record.original_price,
            shares: record.original_shares,
        };
        let sizing = calculate_size(&config.amount_policy(), &original, balance);

        if !sizing.is_sufficient {
            let failure = ClassifiedFailure::new(
                FailureReason::InsufficientBalance,
                format!(
                    "insufficient balance: need {} have {}",
                    sizing.amount, sizing.balance
                ),
            );
            return self.fail(&record, &config, failure, false).await;
        }

        tracing::info!(
            record_id = %record.id,
            side = %record.side,
            amount = %sizing.amount,
            shares = %sizing.shares,
            amount_type = %config.amount_type,
            "Executor: position sized"
        );

        self.store
            .save_sizing(
                record.id,
                &CopySizing {
                    amount: sizing.notional,
                    price: record.original_price,
                    shares: sizing.shares,
                    cost_basis: sizing.notional,
                },
            )
            .await?;

        let holds_slot = record.side == Side::Buy;
        if holds_slot && !self.store.reserve_buy_slot(config.id, now).await? {
            let max = config.max_buy_trades_per_day.unwrap_or_default();
            let reason = Ineligible::DailyQuotaReached { count: max, max };
            return self.skip(&record, &reason.to_string()).await;
        }

        let claimed = match self.store.claim_submission(record.id).await {
            Ok(claimed) => claimed,
            Err(e) => {
                if holds_slot {
                    self.release_slot(config.id).await;
                }
                return Err(e);
            }
        };
        if !claimed {
            // Another delivery got here first.
            if holds_slot {
                self.release_slot(config.id).await;
            }
            let status = self
                .store
                .get_record(record.id)
                .await?
                .map(|r| r.status)
                .unwrap_or(RecordStatus::Pending);
            return Ok(ExecutionOutcome::AlreadyProcessed(status));
        }

        let order = OrderRequest {
            owner: config.owner.clone(),
            market_id: record.market_id.clone(),
            asset_id: record.asset_id.clone(),
            outcome_index: record.outcome_index,
            side: record.side,
            amount: sizing.amount,
            ref_price: record.original_price,
            slippage: config.slippage,
        };

        match self.submit_with_retry(&order, &config).await {
            Ok(submission) => {
                counter!("orders_submitted", "side" => record.side.as_str()).increment(1);
                tracing::info!(
                    record_id = %record.id,
                    order_id = %submission.order_id,
                    status = %submission.status,
                    "Executor: order submitted"
                );

                // The order is live from here on; store errors must not
                // surface as a job failure or the order id is lost.
                match self.store.mark_submitted(record.id, &submission).await {
                    Ok(applied) => {
                        if !applied {
                            tracing::warn!(
                                record_id = %record.id,
                                order_id = %submission.order_id,
                                "Executor: record changed under a claimed submission"
                            );
                        }
                        self.settlement.watch(
                            record.id,
                            config.owner.clone(),
                            submission.order_id.clone(),
                        );
                    }
                    Err(e) => {
                        tracing::error!(
                            record_id = %record.id,
                            order_id = %submission.order_id,
                            error = %e,
                            "Executor: could not record live order, handing it to settlement"
                        );
                        self.settlement.watch_unrecorded(
                            record.id,
                            config.owner.clone(),
                            submission.clone(),
                        );
                    }
                }

                Ok(ExecutionOutcome::Submitted(submission))
            }
            Err(failure) => self.fail(&record, &config, failure, holds_slot).await,
        }
    }

    /// Give back a reserved buy slot. A failure here only costs quota, so it
    /// is logged and the caller carries on.
    async fn release_slot(&self, config_id: Uuid) {
        if let Err(e) = self.store.release_buy_slot(config_id).await {
            tracing::error!(
                config_id = %config_id,
                error = %e,
                "Executor: could not release buy slot"
            );
        }
    }

    async fn fetch_balance(
        &self,
        config: &CopyConfig,
        record: &CopyRecord,
    ) -> Result<Decimal, ClassifiedFailure> {
        let result = match record.side {
            Side::Buy => self.balances.collateral_balance(&config.owner).await,
            Side::Sell => {
                self.balances
                    .outcome_token_balance(&config.owner, &record.market_id, &record.asset_id)
                    .await
            }
        };
        result.map_err(|e| classify(&e.to_string()))
    }

    async fn submit_with_retry(
        &self,
        order: &OrderRequest,
        config: &CopyConfig,
    ) -> Result<OrderSubmission, ClassifiedFailure> {
        let max_attempts = if self.settings.venue_retry_enabled {
            u32::try_from(config.max_retries.max(0)).unwrap_or(0) + 1
        } else {
            1
        };
        let mut backoff = ExponentialBackoff::new(
            self.settings.retry_base_delay,
            self.settings.retry_max_delay,
            0.1,
        );

        let mut attempt = 1;
        loop {
            let result = match order.side {
                Side::Buy => self.venue.submit_buy(order).await,
                Side::Sell => self.venue.submit_sell(order).await,
            };

            let failure = match result {
                Ok(submission) => return Ok(submission),
                Err(e) => classify(&e.to_string()),
            };

            if attempt >= max_attempts || !failure.reason.is_transient() {
                return Err(failure);
            }

            let delay = backoff.next_delay();
            tracing::warn!(
                market = %order.market_id,
                attempt,
                max_attempts,
                reason = %failure.reason,
                delay_ms = delay.as_millis() as u64,
                "Executor: transient venue error, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn skip(&self, record: &CopyRecord, reason: &str) -> anyhow::Result<ExecutionOutcome> {
        if self.store.mark_skipped(record.id, reason).await? {
            counter!("records_skipped").increment(1);
            tracing::info!(record_id = %record.id, reason, "Executor: record skipped");
        }
        Ok(ExecutionOutcome::Skipped(reason.to_string()))
    }

    async fn fail(
        &self,
        record: &CopyRecord,
        config: &CopyConfig,
        failure: ClassifiedFailure,
        release_slot: bool,
    ) -> anyhow::Result<ExecutionOutcome> {
        if release_slot {
            self.release_slot(config.id).await;
        }
        if self.store.mark_failed(record.id, &failure).await? {
            counter!("orders_failed", "category" => failure.category.as_str()).increment(1);
            tracing::warn!(
                record_id = %record.id,
                category = %failure.category,
                reason = %failure.reason,
                error = %failure.message,
                "Executor: copy failed"
            );
        }
        Ok(ExecutionOutcome::Failed(failure))
    }
}

#[async_trait]
impl JobHandler for CopyExecutor {
    async fn handle(&self, claimed: &ClaimedJob) -> anyhow::Result<()> {
        tracing::debug!(
            job_id = %claimed.job.id,
            attempt = claimed.attempts,
            "Executor: job received"
        );
        self.execute(claimed.job.record_id).await.map(|_| ())
    }
}
