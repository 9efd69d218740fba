use std::collections::HashSet;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::errors::ClassifiedFailure;
use crate::models::record::{failure_columns, ORDER_STATUS_SUBMITTING};
use crate::models::{
    CopyRecord, CopySizing, NewCopyRecord, OrderSubmission, RecordStatus, RedemptionStatus,
    Resolution, Settlement, Side, SourceKind,
};

/// Database row for the copy_records table.
#[derive(Debug, Clone, FromRow)]
pub struct CopyRecordRow {
    pub id: Uuid,
    pub kind: String,
    pub config_id: Option<Uuid>,
    pub source_event_id: String,
    pub market_id: String,
    pub market_slug: Option<String>,
    pub asset_id: String,
    pub outcome_index: i32,
    pub side: String,
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
    pub status: String,
    pub error_message: Option<String>,
    pub failure_category: Option<String>,
    pub failure_reason: Option<String>,
    pub outcome: Option<i32>,
    pub pnl: Option<Decimal>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub redemption_status: Option<String>,
    pub redemption_tx_hash: Option<String>,
    pub redemption_error: Option<String>,
    pub redemption_attempts: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CopyRecordRow> for CopyRecord {
    type Error = anyhow::Error;

    fn try_from(row: CopyRecordRow) -> Result<Self, Self::Error> {
        let kind = SourceKind::parse(&row.kind)
            .ok_or_else(|| anyhow::anyhow!("unknown record kind {:?}", row.kind))?;
        let side = Side::from_api_str(&row.side)
            .ok_or_else(|| anyhow::anyhow!("unknown side {:?} on record {}", row.side, row.id))?;
        let status = RecordStatus::parse(&row.status)
            .ok_or_else(|| anyhow::anyhow!("unknown record status {:?}", row.status))?;
        let redemption_status = match row.redemption_status.as_deref() {
            Some(s) => Some(
                RedemptionStatus::parse(s)
                    .ok_or_else(|| anyhow::anyhow!("unknown redemption status {:?}", s))?,
            ),
            None => None,
        };

        Ok(CopyRecord {
            id: row.id,
            kind,
            config_id: row.config_id,
            source_event_id: row.source_event_id,
            market_id: row.market_id,
            market_slug: row.market_slug,
            asset_id: row.asset_id,
            outcome_index: row.outcome_index,
            side,
            original_amount: row.original_amount,
            original_price: row.original_price,
            original_shares: row.original_shares,
            copied_amount: row.copied_amount,
            copied_price: row.copied_price,
            copied_shares: row.copied_shares,
            cost_basis: row.cost_basis,
            order_id: row.order_id,
            order_status: row.order_status,
            settlement_tx_hash: row.settlement_tx_hash,
            status,
            error_message: row.error_message,
            failure_category: row.failure_category,
            failure_reason: row.failure_reason,
            outcome: row.outcome,
            pnl: row.pnl,
            resolved_at: row.resolved_at,
            redemption_status,
            redemption_tx_hash: row.redemption_tx_hash,
            redemption_error: row.redemption_error,
            redemption_attempts: row.redemption_attempts,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_records(rows: Vec<CopyRecordRow>) -> anyhow::Result<Vec<CopyRecord>> {
    rows.into_iter().map(CopyRecord::try_from).collect()
}

pub async fn recorded_event_ids(
    pool: &PgPool,
    config_id: Uuid,
    event_ids: &[String],
) -> anyhow::Result<HashSet<String>> {
    if event_ids.is_empty() {
        return Ok(HashSet::new());
    }

    let rows: Vec<(String,)> = sqlx::query_as(
        r#"
        SELECT source_event_id FROM copy_records
        WHERE config_id = $1 AND source_event_id = ANY($2)
        "#,
    )
    .bind(config_id)
    .bind(event_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows.into_iter().map(|(id,)| id).collect())
}

/// Insert a record; the (config_id, source_event_id) constraint turns a
/// duplicate into `None`.
pub async fn insert_record(pool: &PgPool, new: &NewCopyRecord) -> anyhow::Result<Option<CopyRecord>> {
    let row = sqlx::query_as::<_, CopyRecordRow>(
        r#"
        INSERT INTO copy_records (
            kind, config_id, source_event_id, market_id, market_slug, asset_id,
            outcome_index, side, original_amount, original_price, original_shares,
            status, error_message
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (config_id, source_event_id) DO NOTHING
        RETURNING *
        "#,
    )
    .bind(new.kind.as_str())
    .bind(new.config_id)
    .bind(&new.source_event_id)
    .bind(&new.market_id)
    .bind(&new.market_slug)
    .bind(&new.asset_id)
    .bind(new.outcome_index)
    .bind(new.side.as_str())
    .bind(new.original_amount)
    .bind(new.original_price)
    .bind(new.original_shares)
    .bind(new.status.as_str())
    .bind(&new.error_message)
    .fetch_optional(pool)
    .await?;

    row.map(CopyRecord::try_from).transpose()
}

pub async fn get_record(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<CopyRecord>> {
    let row = sqlx::query_as::<_, CopyRecordRow>("SELECT * FROM copy_records WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(CopyRecord::try_from).transpose()
}

pub async fn get_records_by_status(
    pool: &PgPool,
    status: RecordStatus,
    limit: i64,
) -> anyhow::Result<Vec<CopyRecord>> {
    let rows = sqlx::query_as::<_, CopyRecordRow>(
        r#"
        SELECT * FROM copy_records
        WHERE status = $1
        ORDER BY created_at ASC
        LIMIT $2
        "#,
    )
    .bind(status.as_str())
    .bind(limit)
    .fetch_all(pool)
    .await?;

    into_records(rows)
}

pub async fn get_stranded_records(
    pool: &PgPool,
    config_id: Uuid,
    older_than: DateTime<Utc>,
) -> anyhow::Result<Vec<CopyRecord>> {
    let rows = sqlx::query_as::<_, CopyRecordRow>(
        r#"
        SELECT * FROM copy_records
        WHERE config_id = $1
          AND status = 'pending'
          AND order_status IS NULL
          AND created_at < $2
        ORDER BY created_at ASC
        "#,
    )
    .bind(config_id)
    .bind(older_than)
    .fetch_all(pool)
    .await?;

    into_records(rows)
}

pub async fn save_sizing(pool: &PgPool, id: Uuid, sizing: &CopySizing) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE copy_records
        SET copied_amount = $2, copied_price = $3, copied_shares = $4, cost_basis = $5,
            updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(sizing.amount)
    .bind(sizing.price)
    .bind(sizing.shares)
    .bind(sizing.cost_basis)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn claim_submission(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_records
        SET order_status = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'pending' AND order_status IS NULL
        "#,
    )
    .bind(id)
    .bind(ORDER_STATUS_SUBMITTING)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_skipped(pool: &PgPool, id: Uuid, reason: &str) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_records
        SET status = 'skipped', error_message = $2, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_failed(pool: &PgPool, id: Uuid, failure: &ClassifiedFailure) -> anyhow::Result<bool> {
    let (message, category, reason) = failure_columns(failure);

    let result = sqlx::query(
        r#"
        UPDATE copy_records
        SET status = 'failed', error_message = $2, failure_category = $3, failure_reason = $4,
            updated_at = NOW()
        WHERE id = $1 AND status IN ('pending', 'pending_settlement')
        "#,
    )
    .bind(id)
    .bind(message)
    .bind(category)
    .bind(reason)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_submitted(
    pool: &PgPool,
    id: Uuid,
    submission: &OrderSubmission,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_records
        SET status = 'pending_settlement', order_id = $2, order_status = $3,
            settlement_tx_hash = $4, updated_at = NOW()
        WHERE id = $1 AND status = 'pending'
        "#,
    )
    .bind(id)
    .bind(&submission.order_id)
    .bind(&submission.status)
    .bind(&submission.tx_hash)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_settled(pool: &PgPool, id: Uuid, settlement: &Settlement) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_records
        SET status = 'settled', copied_price = $2, copied_shares = $3,
            cost_basis = $2 * $3,
            settlement_tx_hash = COALESCE($4, settlement_tx_hash),
            order_status = $5, updated_at = NOW()
        WHERE id = $1 AND status = 'pending_settlement'
        "#,
    )
    .bind(id)
    .bind(settlement.price)
    .bind(settlement.shares)
    .bind(&settlement.tx_hash)
    .bind(&settlement.order_status)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_redemption_candidates(
    pool: &PgPool,
    max_attempts: i32,
    limit: i64,
) -> anyhow::Result<Vec<CopyRecord>> {
    let rows = sqlx::query_as::<_, CopyRecordRow>(
        r#"
        SELECT * FROM copy_records
        WHERE status = 'settled'
          AND side = 'BUY'
          AND (
              redemption_status IS NULL
              OR redemption_status = 'pending'
              OR (redemption_status = 'failed' AND redemption_attempts < $1)
          )
        ORDER BY updated_at ASC
        LIMIT $2
        "#,
    )
    .bind(max_attempts)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    into_records(rows)
}

pub async fn record_resolution(pool: &PgPool, id: Uuid, resolution: &Resolution) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE copy_records
        SET outcome = $2, pnl = $3, resolved_at = $4, updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(resolution.winning_outcome)
    .bind(resolution.pnl)
    .bind(resolution.resolved_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn begin_redemption(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_records
        SET redemption_status = 'pending', redemption_attempts = redemption_attempts + 1,
            updated_at = NOW()
        WHERE id = $1 AND redemption_status IS DISTINCT FROM 'redeemed'
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn mark_redeemed(pool: &PgPool, id: Uuid, tx_hash: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE copy_records
        SET redemption_status = 'redeemed', redemption_tx_hash = $2, redemption_error = NULL,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .bind(tx_hash)
    .execute(pool)
    .await?;

    Ok(())
}

pub async fn mark_redemption_failed(pool: &PgPool, id: Uuid, error: &str) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE copy_records
        SET redemption_status = 'failed', redemption_error = $2, updated_at = NOW()
        WHERE id = $1 AND redemption_status IS DISTINCT FROM 'redeemed'
        "#,
    )
    .bind(id)
    .bind(error)
    .execute(pool)
    .await?;

    Ok(())
}
