use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use crate::models::config::QUOTA_WINDOW_HOURS;
use crate::models::{AmountType, ConfigStatus, CopyConfig, NewCopyConfig, SourceKind, SourceSelector};

/// Database row for the copy_configs table.
#[derive(Debug, Clone, FromRow)]
pub struct CopyConfigRow {
    pub id: Uuid,
    pub owner: String,
    pub source_kind: String,
    pub trader_address: Option<String>,
    pub signal_categories: Option<Vec<String>>,
    pub copy_buys: bool,
    pub copy_sells: bool,
    pub amount_type: String,
    pub buy_amount: Decimal,
    pub sell_amount: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub market_categories: Option<Vec<String>>,
    pub slippage: Decimal,
    pub max_retries: i32,
    pub max_buy_trades_per_day: Option<i32>,
    pub buy_trades_today: i32,
    pub last_reset_date: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub duration_days: Option<i32>,
    pub enabled: bool,
    pub authorized: bool,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<CopyConfigRow> for CopyConfig {
    type Error = anyhow::Error;

    fn try_from(row: CopyConfigRow) -> Result<Self, Self::Error> {
        let source = match SourceKind::parse(&row.source_kind) {
            Some(SourceKind::Trade) => SourceSelector::Trader {
                address: row
                    .trader_address
                    .ok_or_else(|| anyhow::anyhow!("trade config {} has no trader address", row.id))?,
            },
            Some(SourceKind::Signal) => SourceSelector::Signals {
                categories: row.signal_categories.unwrap_or_default(),
            },
            None => anyhow::bail!("unknown source kind {:?} on config {}", row.source_kind, row.id),
        };

        let amount_type = AmountType::parse(&row.amount_type)
            .ok_or_else(|| anyhow::anyhow!("unknown amount type {:?}", row.amount_type))?;
        let status = ConfigStatus::parse(&row.status)
            .ok_or_else(|| anyhow::anyhow!("unknown config status {:?}", row.status))?;

        Ok(CopyConfig {
            id: row.id,
            owner: row.owner,
            source,
            copy_buys: row.copy_buys,
            copy_sells: row.copy_sells,
            amount_type,
            buy_amount: row.buy_amount,
            sell_amount: row.sell_amount,
            min_amount: row.min_amount,
            max_amount: row.max_amount,
            market_categories: row.market_categories,
            slippage: row.slippage,
            max_retries: row.max_retries,
            max_buy_trades_per_day: row.max_buy_trades_per_day,
            buy_trades_today: row.buy_trades_today,
            last_reset_date: row.last_reset_date,
            start_date: row.start_date,
            duration_days: row.duration_days,
            enabled: row.enabled,
            authorized: row.authorized,
            status,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Insert a new copy config.
pub async fn insert_config(pool: &PgPool, new: &NewCopyConfig) -> anyhow::Result<CopyConfig> {
    let (trader_address, signal_categories) = match &new.source {
        SourceSelector::Trader { address } => (Some(address.clone()), None),
        SourceSelector::Signals { categories } => (None, Some(categories.clone())),
    };

    let row = sqlx::query_as::<_, CopyConfigRow>(
        r#"
        INSERT INTO copy_configs (
            owner, source_kind, trader_address, signal_categories, copy_buys, copy_sells,
            amount_type, buy_amount, sell_amount, min_amount, max_amount, market_categories,
            slippage, max_retries, max_buy_trades_per_day, start_date, duration_days,
            enabled, authorized
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)
        RETURNING *
        "#,
    )
    .bind(&new.owner)
    .bind(new.source.kind().as_str())
    .bind(trader_address)
    .bind(signal_categories)
    .bind(new.copy_buys)
    .bind(new.copy_sells)
    .bind(new.amount_type.as_str())
    .bind(new.buy_amount)
    .bind(new.sell_amount)
    .bind(new.min_amount)
    .bind(new.max_amount)
    .bind(&new.market_categories)
    .bind(new.slippage)
    .bind(new.max_retries)
    .bind(new.max_buy_trades_per_day)
    .bind(new.start_date)
    .bind(new.duration_days)
    .bind(new.enabled)
    .bind(new.authorized)
    .fetch_one(pool)
    .await?;

    row.try_into()
}

pub async fn get_config(pool: &PgPool, id: Uuid) -> anyhow::Result<Option<CopyConfig>> {
    let row = sqlx::query_as::<_, CopyConfigRow>("SELECT * FROM copy_configs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await?;

    row.map(CopyConfig::try_from).transpose()
}

/// Enabled + authorized configs following a given source kind.
pub async fn get_monitored_configs(
    pool: &PgPool,
    kind: SourceKind,
) -> anyhow::Result<Vec<CopyConfig>> {
    let rows = sqlx::query_as::<_, CopyConfigRow>(
        r#"
        SELECT * FROM copy_configs
        WHERE source_kind = $1 AND enabled AND authorized
        ORDER BY created_at ASC
        "#,
    )
    .bind(kind.as_str())
    .fetch_all(pool)
    .await?;

    rows.into_iter().map(CopyConfig::try_from).collect()
}

pub async fn pause_config(pool: &PgPool, id: Uuid) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_configs
        SET status = 'paused', enabled = FALSE, updated_at = NOW()
        WHERE id = $1 AND (enabled OR status = 'active')
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn reset_daily_counter(
    pool: &PgPool,
    id: Uuid,
    expected_last_reset: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> anyhow::Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE copy_configs
        SET buy_trades_today = 0, last_reset_date = $3, updated_at = NOW()
        WHERE id = $1 AND last_reset_date IS NOT DISTINCT FROM $2
        "#,
    )
    .bind(id)
    .bind(expected_last_reset)
    .bind(now)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Single-statement conditional increment; the row lock serializes racing
/// workers.
pub async fn reserve_buy_slot(pool: &PgPool, id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool> {
    let window_start = now - Duration::hours(QUOTA_WINDOW_HOURS);

    let result = sqlx::query(
        r#"
        UPDATE copy_configs
        SET buy_trades_today = CASE
                WHEN last_reset_date IS NULL OR last_reset_date <= $3 THEN 1
                ELSE buy_trades_today + 1
            END,
            last_reset_date = CASE
                WHEN last_reset_date IS NULL OR last_reset_date <= $3 THEN $2
                ELSE last_reset_date
            END,
            updated_at = NOW()
        WHERE id = $1
          AND (
              max_buy_trades_per_day IS NULL
              OR last_reset_date IS NULL
              OR last_reset_date <= $3
              OR buy_trades_today < max_buy_trades_per_day
          )
        "#,
    )
    .bind(id)
    .bind(now)
    .bind(window_start)
    .execute(pool)
    .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn release_buy_slot(pool: &PgPool, id: Uuid) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE copy_configs
        SET buy_trades_today = GREATEST(buy_trades_today - 1, 0), updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Records keep their history: the FK is `ON DELETE SET NULL`.
pub async fn delete_config(pool: &PgPool, id: Uuid) -> anyhow::Result<()> {
    sqlx::query("DELETE FROM copy_configs WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}
