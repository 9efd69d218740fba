use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::SourceKind;

/// Length of the rolling daily-quota window.
pub const QUOTA_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AmountType {
    Fixed,
    Percentage,
    PercentageOfOriginal,
}

impl AmountType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmountType::Fixed => "fixed",
            AmountType::Percentage => "percentage",
            AmountType::PercentageOfOriginal => "percentageOfOriginal",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "fixed" => Some(AmountType::Fixed),
            "percentage" => Some(AmountType::Percentage),
            "percentageOfOriginal" => Some(AmountType::PercentageOfOriginal),
            _ => None,
        }
    }
}

impl fmt::Display for AmountType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigStatus {
    Active,
    Paused,
    Disabled,
}

impl ConfigStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConfigStatus::Active => "active",
            ConfigStatus::Paused => "paused",
            ConfigStatus::Disabled => "disabled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(ConfigStatus::Active),
            "paused" => Some(ConfigStatus::Paused),
            "disabled" => Some(ConfigStatus::Disabled),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a config copies: one trader's fills, or signals in a set of categories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SourceSelector {
    Trader { address: String },
    Signals { categories: Vec<String> },
}

impl SourceSelector {
    pub fn kind(&self) -> SourceKind {
        match self {
            SourceSelector::Trader { .. } => SourceKind::Trade,
            SourceSelector::Signals { .. } => SourceKind::Signal,
        }
    }
}

/// The sizing inputs taken from a config.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AmountPolicy {
    pub amount_type: AmountType,
    pub buy_amount: Decimal,
    pub sell_amount: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
}

/// A user's standing instruction to copy a source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CopyConfig {
    pub id: Uuid,
    pub owner: String,
    pub source: SourceSelector,
    pub copy_buys: bool,
    pub copy_sells: bool,
    pub amount_type: AmountType,
    pub buy_amount: Decimal,
    pub sell_amount: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub market_categories: Option<Vec<String>>,
    /// Slippage tolerance as a fraction (0.02 = 2%).
    pub slippage: Decimal,
    pub max_retries: i32,
    pub max_buy_trades_per_day: Option<i32>,
    pub buy_trades_today: i32,
    pub last_reset_date: Option<DateTime<Utc>>,
    pub start_date: Option<DateTime<Utc>>,
    pub duration_days: Option<i32>,
    pub enabled: bool,
    pub authorized: bool,
    pub status: ConfigStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CopyConfig {
    pub fn kind(&self) -> SourceKind {
        self.source.kind()
    }

    pub fn amount_policy(&self) -> AmountPolicy {
        AmountPolicy {
            amount_type: self.amount_type,
            buy_amount: self.buy_amount,
            sell_amount: self.sell_amount,
            min_amount: self.min_amount,
            max_amount: self.max_amount,
        }
    }

    /// True once `now - start_date >= duration_days`. Configs without a
    /// duration never expire; a duration without a start date counts from
    /// creation.
    pub fn duration_expired(&self, now: DateTime<Utc>) -> bool {
        match self.duration_days {
            Some(days) => {
                let start = self.start_date.unwrap_or(self.created_at);
                now - start >= Duration::days(i64::from(days))
            }
            None => false,
        }
    }

    /// True when a quota is configured and the window must be (re)started.
    pub fn quota_window_elapsed(&self, now: DateTime<Utc>) -> bool {
        if self.max_buy_trades_per_day.is_none() {
            return false;
        }
        match self.last_reset_date {
            Some(reset) => now - reset >= Duration::hours(QUOTA_WINDOW_HOURS),
            None => true,
        }
    }

    /// Buy count within the current window. A window that has already rolled
    /// over counts as empty even if nobody has reset the stored counter yet.
    pub fn effective_buy_count(&self, now: DateTime<Utc>) -> i32 {
        if self.quota_window_elapsed(now) {
            0
        } else {
            self.buy_trades_today
        }
    }

    pub fn allows_category(&self, category: Option<&str>) -> bool {
        match &self.market_categories {
            None => true,
            Some(allowed) if allowed.is_empty() => true,
            Some(allowed) => category
                .map(|c| allowed.iter().any(|a| a.eq_ignore_ascii_case(c)))
                .unwrap_or(false),
        }
    }
}

/// Fields needed to create a config. Everything else starts at its default.
#[derive(Debug, Clone)]
pub struct NewCopyConfig {
    pub owner: String,
    pub source: SourceSelector,
    pub copy_buys: bool,
    pub copy_sells: bool,
    pub amount_type: AmountType,
    pub buy_amount: Decimal,
    pub sell_amount: Decimal,
    pub min_amount: Option<Decimal>,
    pub max_amount: Option<Decimal>,
    pub market_categories: Option<Vec<String>>,
    pub slippage: Decimal,
    pub max_retries: i32,
    pub max_buy_trades_per_day: Option<i32>,
    pub start_date: Option<DateTime<Utc>>,
    pub duration_days: Option<i32>,
    pub enabled: bool,
    pub authorized: bool,
}

impl NewCopyConfig {
    /// A trader-copy config with fixed sizing, both sides copied, enabled and
    /// authorized.
    pub fn trader(owner: &str, trader_address: &str, amount: Decimal) -> Self {
        Self {
            owner: owner.to_string(),
            source: SourceSelector::Trader {
                address: trader_address.to_string(),
            },
            copy_buys: true,
            copy_sells: true,
            amount_type: AmountType::Fixed,
            buy_amount: amount,
            sell_amount: amount,
            min_amount: None,
            max_amount: None,
            market_categories: None,
            slippage: Decimal::new(2, 2),
            max_retries: 3,
            max_buy_trades_per_day: None,
            start_date: None,
            duration_days: None,
            enabled: true,
            authorized: true,
        }
    }
}
