use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::errors::ClassifiedFailure;

use super::{CopyConfig, Side, SourceEvent, SourceKind};

/// Order status written while a submission is in flight. A record still
/// carrying it on redelivery may or may not have reached the venue.
pub const ORDER_STATUS_SUBMITTING: &str = "submitting";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    Pending,
    Skipped,
    PendingSettlement,
    Settled,
    Failed,
}

impl RecordStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordStatus::Pending => "pending",
            RecordStatus::Skipped => "skipped",
            RecordStatus::PendingSettlement => "pending_settlement",
            RecordStatus::Settled => "settled",
            RecordStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RecordStatus::Pending),
            "skipped" => Some(RecordStatus::Skipped),
            "pending_settlement" => Some(RecordStatus::PendingSettlement),
            "settled" => Some(RecordStatus::Settled),
            "failed" => Some(RecordStatus::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for RecordStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedemptionStatus {
    Pending,
    Redeemed,
    Failed,
}

impl RedemptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RedemptionStatus::Pending => "pending",
            RedemptionStatus::Redeemed => "redeemed",
            RedemptionStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RedemptionStatus::Pending),
            "redeemed" => Some(RedemptionStatus::Redeemed),
            "failed" => Some(RedemptionStatus::Failed),
            _ => None,
        }
    }
}

/// One attempt to mirror one source event for one config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyRecord {
    pub id: Uuid,
    pub kind: SourceKind,
    /// `None` once the owning config has been deleted.
    pub config_id: Option<Uuid>,
    pub source_event_id: String,
    pub market_id: String,
    pub market_slug: Option<String>,
    pub asset_id: String,
    pub outcome_index: i32,
    pub side: Side,

    pub original_amount: Decimal,
    pub original_price: Decimal,
    pub original_shares: Option<Decimal>,

    pub copied_amount: Option<Decimal>,
    pub copied_price: Option<Decimal>,
    pub copied_shares: Option<Decimal>,
    pub cost_basis: Option<Decimal>,

    pub order_id: Option<String>,
    pub order_status: Option<String>,
    pub settlement_tx_hash: Option<String>,

    pub status: RecordStatus,
    pub error_message: Option<String>,
    pub failure_category: Option<String>,
    pub failure_reason: Option<String>,

    pub outcome: Option<i32>,
    pub pnl: Option<Decimal>,
    pub resolved_at: Option<DateTime<Utc>>,

    pub redemption_status: Option<RedemptionStatus>,
    pub redemption_tx_hash: Option<String>,
    pub redemption_error: Option<String>,
    pub redemption_attempts: i32,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CopyRecord {
    /// A submission was claimed but never confirmed.
    pub fn has_unconfirmed_submission(&self) -> bool {
        self.status == RecordStatus::Pending
            && self.order_status.as_deref() == Some(ORDER_STATUS_SUBMITTING)
    }
}

/// A record together with the config it belongs to.
#[derive(Debug, Clone)]
pub struct RecordWithConfig {
    pub record: CopyRecord,
    pub config: CopyConfig,
}

/// Fields needed to insert a record.
#[derive(Debug, Clone)]
pub struct NewCopyRecord {
    pub kind: SourceKind,
    pub config_id: Uuid,
    pub source_event_id: String,
    pub market_id: String,
    pub market_slug: Option<String>,
    pub asset_id: String,
    pub outcome_index: i32,
    pub side: Side,
    pub original_amount: Decimal,
    pub original_price: Decimal,
    pub original_shares: Option<Decimal>,
    pub status: RecordStatus,
    pub error_message: Option<String>,
}

impl NewCopyRecord {
    pub fn pending(config: &CopyConfig, event: &SourceEvent) -> Self {
        Self {
            kind: config.kind(),
            config_id: config.id,
            source_event_id: event.event_id.clone(),
            market_id: event.market_id.clone(),
            market_slug: event.market_slug.clone(),
            asset_id: event.asset_id.clone(),
            outcome_index: event.outcome_index,
            side: event.side,
            original_amount: event.amount,
            original_price: event.price,
            original_shares: event.shares,
            status: RecordStatus::Pending,
            error_message: None,
        }
    }

    /// A record that only marks the event as processed, with the reason it
    /// was not copied.
    pub fn skipped(config: &CopyConfig, event: &SourceEvent, reason: &str) -> Self {
        Self {
            status: RecordStatus::Skipped,
            error_message: Some(reason.to_string()),
            ..Self::pending(config, event)
        }
    }
}

/// Sizing decided by the executor, persisted before the venue call.
#[derive(Debug, Clone, PartialEq)]
pub struct CopySizing {
    pub amount: Decimal,
    pub price: Decimal,
    pub shares: Decimal,
    pub cost_basis: Decimal,
}

/// What the venue returned for an accepted order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderSubmission {
    pub order_id: String,
    pub status: String,
    pub tx_hash: Option<String>,
}

/// Final fill reported by the venue.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub price: Decimal,
    pub shares: Decimal,
    pub tx_hash: Option<String>,
    pub order_status: String,
}

/// Market resolution as seen by one record.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub winning_outcome: i32,
    pub pnl: Decimal,
    pub resolved_at: DateTime<Utc>,
}

impl Resolution {
    /// Won: shares pay out 1 each, profit = shares * (1 - price).
    /// Lost: the stake is gone, loss = shares * price.
    pub fn for_record(record: &CopyRecord, winning_outcome: i32, now: DateTime<Utc>) -> Self {
        let shares = record.copied_shares.unwrap_or(Decimal::ZERO);
        let price = record.copied_price.unwrap_or(record.original_price);
        let pnl = if record.outcome_index == winning_outcome {
            shares * (Decimal::ONE - price)
        } else {
            -(shares * price)
        };
        Self {
            winning_outcome,
            pnl,
            resolved_at: now,
        }
    }
}

/// Failure fields for a record, split out of a classified failure.
pub fn failure_columns(failure: &ClassifiedFailure) -> (String, String, String) {
    (
        failure.message.clone(),
        failure.category.as_str().to_string(),
        failure.reason.as_str().to_string(),
    )
}
