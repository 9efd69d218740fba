use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Trade activity (Data API, /activity?user=&type=TRADE)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiTrade {
    #[serde(default)]
    pub proxy_wallet: Option<String>,
    #[serde(default)]
    pub side: Option<String>,
    /// CTF token id of the traded outcome.
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    /// Shares traded.
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub price: Option<Decimal>,
    /// Unix seconds or milliseconds, number or string depending on endpoint.
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub event_slug: Option<String>,
    #[serde(default)]
    pub outcome: Option<String>,
    #[serde(default)]
    pub outcome_index: Option<i32>,
    #[serde(default)]
    pub transaction_hash: Option<String>,
}

// ---------------------------------------------------------------------------
// Positions (Data API, /positions?user=)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiPosition {
    #[serde(default)]
    pub asset: Option<String>,
    #[serde(default)]
    pub condition_id: Option<String>,
    #[serde(default)]
    pub size: Option<Decimal>,
    #[serde(default)]
    pub redeemable: Option<bool>,
}

// ---------------------------------------------------------------------------
// Signal feed
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiSignal {
    pub id: String,
    pub market_id: String,
    #[serde(default)]
    pub market_slug: Option<String>,
    pub asset_id: String,
    #[serde(default)]
    pub outcome_index: Option<i32>,
    pub side: String,
    /// Suggested USDC notional.
    pub amount: Decimal,
    pub price: Decimal,
    #[serde(default)]
    pub shares: Option<Decimal>,
    #[serde(default)]
    pub category: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
