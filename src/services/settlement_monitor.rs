use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::db::CopyStore;
use crate::errors::{ClassifiedFailure, FailureReason};
use crate::external::{ExecutionVenue, OrderState};
use crate::models::{OrderSubmission, RecordStatus, Settlement};

/// Records resumed per startup sweep.
const RESUME_BATCH: i64 = 1_000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchOutcome {
    Settled,
    Cancelled,
    Expired,
    TimedOut,
    /// The record left `pending_settlement` through another path.
    Superseded,
}

/// Follows submitted orders to a terminal state.
///
/// Each watch is a detached task; it only ever moves a record out of
/// `pending_settlement` and never calls back into the executor.
#[derive(Clone)]
pub struct SettlementMonitor {
    store: Arc<dyn CopyStore>,
    venue: Arc<dyn ExecutionVenue>,
    poll_interval: Duration,
    timeout: Duration,
}

impl SettlementMonitor {
    pub fn new(
        store: Arc<dyn CopyStore>,
        venue: Arc<dyn ExecutionVenue>,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            venue,
            poll_interval,
            timeout,
        }
    }

    /// Start a detached watch for one order.
    pub fn watch(&self, record_id: Uuid, owner: String, order_id: String) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            match monitor.follow(record_id, &owner, &order_id).await {
                Ok(outcome) => {
                    tracing::debug!(record_id = %record_id, ?outcome, "Settlement: watch finished");
                }
                Err(e) => {
                    tracing::error!(
                        record_id = %record_id,
                        order_id = %order_id,
                        error = %e,
                        "Settlement: watch aborted"
                    );
                }
            }
        })
    }

    /// Watch an order the venue accepted but whose submission could not be
    /// written yet. The write is retried every poll until it lands or the
    /// settlement timeout passes; the order is followed either way.
    pub fn watch_unrecorded(
        &self,
        record_id: Uuid,
        owner: String,
        submission: OrderSubmission,
    ) -> JoinHandle<()> {
        let monitor = self.clone();
        tokio::spawn(async move {
            let deadline = Instant::now() + monitor.timeout;
            loop {
                match monitor.store.mark_submitted(record_id, &submission).await {
                    Ok(applied) => {
                        if !applied {
                            tracing::warn!(
                                record_id = %record_id,
                                order_id = %submission.order_id,
                                "Settlement: record left pending before its submission was written"
                            );
                        }
                        break;
                    }
                    Err(e) if Instant::now() >= deadline => {
                        counter!("submissions_unrecorded").increment(1);
                        tracing::error!(
                            record_id = %record_id,
                            order_id = %submission.order_id,
                            error = %e,
                            "Settlement: live order could not be recorded"
                        );
                        return;
                    }
                    Err(e) => {
                        tracing::warn!(
                            record_id = %record_id,
                            order_id = %submission.order_id,
                            error = %e,
                            "Settlement: recording submission failed, retrying"
                        );
                        tokio::time::sleep(monitor.poll_interval).await;
                    }
                }
            }

            match monitor.follow(record_id, &owner, &submission.order_id).await {
                Ok(outcome) => {
                    tracing::debug!(record_id = %record_id, ?outcome, "Settlement: watch finished");
                }
                Err(e) => {
                    tracing::error!(
                        record_id = %record_id,
                        order_id = %submission.order_id,
                        error = %e,
                        "Settlement: watch aborted"
                    );
                }
            }
        })
    }

    /// Restart watches for every record still awaiting settlement.
    pub async fn resume_pending(&self) -> anyhow::Result<usize> {
        let records = self
            .store
            .list_records_by_status(RecordStatus::PendingSettlement, RESUME_BATCH)
            .await?;

        let mut resumed = 0;
        for record in records {
            let Some(order_id) = record.order_id.clone() else {
                let failure = ClassifiedFailure::new(
                    FailureReason::UnknownError,
                    "awaiting settlement without an order id",
                );
                self.store.mark_failed(record.id, &failure).await?;
                continue;
            };
            let Some(aggregate) = self.store.get_record_with_config(record.id).await? else {
                tracing::warn!(
                    record_id = %record.id,
                    "Settlement: config gone, cannot resolve order owner"
                );
                continue;
            };
            self.watch(record.id, aggregate.config.owner, order_id);
            resumed += 1;
        }

        if resumed > 0 {
            tracing::info!(count = resumed, "Settlement: resumed watches");
        }
        Ok(resumed)
    }

    /// Poll the venue until the order is terminal or the timeout passes.
    pub async fn follow(
        &self,
        record_id: Uuid,
        owner: &str,
        order_id: &str,
    ) -> anyhow::Result<WatchOutcome> {
        let deadline = Instant::now() + self.timeout;

        loop {
            match self.venue.order_status(owner, order_id).await {
                Ok(OrderState::Matched {
                    price,
                    shares,
                    tx_hash,
                }) => {
                    let settlement = Settlement {
                        price,
                        shares,
                        tx_hash,
                        order_status: "matched".to_string(),
                    };
                    if !self.store.mark_settled(record_id, &settlement).await? {
                        return Ok(WatchOutcome::Superseded);
                    }
                    counter!("orders_settled").increment(1);
                    tracing::info!(
                        record_id = %record_id,
                        order_id,
                        price = %price,
                        shares = %shares,
                        "Settlement: order matched"
                    );
                    return Ok(WatchOutcome::Settled);
                }
                Ok(OrderState::Cancelled) => {
                    return self
                        .fail(record_id, "order was cancelled", WatchOutcome::Cancelled)
                        .await;
                }
                Ok(OrderState::Expired) => {
                    return self
                        .fail(record_id, "order expired unfilled", WatchOutcome::Expired)
                        .await;
                }
                Ok(OrderState::Live { size_matched }) => {
                    tracing::debug!(
                        record_id = %record_id,
                        order_id,
                        size_matched = %size_matched,
                        "Settlement: order still live"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        record_id = %record_id,
                        order_id,
                        error = %e,
                        "Settlement: status check failed"
                    );
                }
            }

            if Instant::now() >= deadline {
                let failure = ClassifiedFailure::new(
                    FailureReason::SettlementTimeout,
                    format!("order {} not settled within {:?}", order_id, self.timeout),
                );
                if !self.store.mark_failed(record_id, &failure).await? {
                    return Ok(WatchOutcome::Superseded);
                }
                counter!("settlement_failures", "reason" => failure.reason.as_str()).increment(1);
                tracing::warn!(record_id = %record_id, order_id, "Settlement: timed out");
                return Ok(WatchOutcome::TimedOut);
            }

            tokio::time::sleep(self.poll_interval).await;
        }
    }

    async fn fail(
        &self,
        record_id: Uuid,
        message: &str,
        outcome: WatchOutcome,
    ) -> anyhow::Result<WatchOutcome> {
        let failure = ClassifiedFailure::new(FailureReason::OrderCancelled, message);
        if !self.store.mark_failed(record_id, &failure).await? {
            return Ok(WatchOutcome::Superseded);
        }
        counter!("settlement_failures", "reason" => failure.reason.as_str()).increment(1);
        tracing::warn!(record_id = %record_id, reason = message, "Settlement: order not filled");
        Ok(outcome)
    }
}
