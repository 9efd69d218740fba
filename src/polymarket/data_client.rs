use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::Decimal;
use thiserror::Error;

use super::types::{ApiPosition, ApiTrade};
use crate::external::ActivitySource;
use crate::models::{Side, SourceEvent, SourceSelector};

const DATA_API_BASE: &str = "https://data-api.polymarket.com";

#[derive(Debug, Error)]
pub enum DataClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone)]
pub struct DataClient {
    http: Client,
    base_url: String,
}

impl DataClient {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            base_url: DATA_API_BASE.into(),
        }
    }

    pub fn with_base_url(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Trades of a wallet at or after `start`, oldest first.
    pub async fn get_user_trades(
        &self,
        user: &str,
        start: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ApiTrade>, DataClientError> {
        let url = format!("{}/activity", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[
                ("user", user),
                ("type", "TRADE"),
                ("start", &start.timestamp().to_string()),
                ("sortBy", "TIMESTAMP"),
                ("sortDirection", "ASC"),
                ("limit", &limit.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?;

        let trades: Vec<ApiTrade> = resp.json().await?;
        Ok(trades)
    }

    /// Open positions of a wallet in one market.
    pub async fn get_positions(
        &self,
        user: &str,
        condition_id: &str,
    ) -> Result<Vec<ApiPosition>, DataClientError> {
        let url = format!("{}/positions", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(&[("user", user), ("market", condition_id)])
            .send()
            .await?
            .error_for_status()?;

        let positions: Vec<ApiPosition> = resp.json().await?;
        Ok(positions)
    }
}

#[async_trait]
impl ActivitySource for DataClient {
    async fn fetch(
        &self,
        selector: &SourceSelector,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<SourceEvent>> {
        let SourceSelector::Trader { address } = selector else {
            return Err(DataClientError::Unexpected(
                "trade feed only serves trader selectors".into(),
            )
            .into());
        };

        // `start` is whole seconds and inclusive; the exact bound is applied here.
        let trades = self.get_user_trades(address, since, limit).await?;
        let mut events: Vec<SourceEvent> = trades
            .iter()
            .filter_map(trade_to_event)
            .filter(|e| e.timestamp > since)
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }
}

/// Map a Data API trade to a source event. Trades missing an identity,
/// market, token, side or timestamp are dropped.
pub fn trade_to_event(trade: &ApiTrade) -> Option<SourceEvent> {
    let event_id = trade.transaction_hash.clone()?;
    let market_id = trade.condition_id.clone()?;
    let asset_id = trade.asset.clone()?;
    let side = Side::from_api_str(trade.side.as_deref()?)?;
    let timestamp = parse_trade_timestamp(trade.timestamp.as_ref())?;

    let shares = trade.size.unwrap_or(Decimal::ZERO);
    let price = trade.price.unwrap_or(Decimal::ZERO);

    Some(SourceEvent {
        event_id: format!("{}:{}", event_id, asset_id),
        market_id,
        market_slug: trade.slug.clone(),
        asset_id,
        outcome_index: trade.outcome_index.unwrap_or(0),
        side,
        amount: shares * price,
        price,
        shares: Some(shares),
        tx_hash: Some(event_id),
        category: None,
        timestamp,
    })
}

pub fn parse_trade_timestamp(ts: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    ts.and_then(|t| match t {
        serde_json::Value::Number(n) => from_epoch(n.as_i64()?),
        serde_json::Value::String(s) => {
            if let Ok(secs) = s.parse::<i64>() {
                return from_epoch(secs);
            }
            DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }
        _ => None,
    })
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    // Values past 1e12 are milliseconds
    if value > 1_000_000_000_000 {
        DateTime::from_timestamp(value / 1000, ((value % 1000) * 1_000_000) as u32)
    } else {
        DateTime::from_timestamp(value, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trade(json: serde_json::Value) -> ApiTrade {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_trade_to_event() {
        let t = trade(serde_json::json!({
            "proxyWallet": "0xtrader",
            "side": "BUY",
            "asset": "7123",
            "conditionId": "0xcond",
            "size": 10,
            "price": 0.42,
            "timestamp": 1_717_000_000,
            "slug": "will-it-rain",
            "outcomeIndex": 1,
            "transactionHash": "0xhash"
        }));

        let ev = trade_to_event(&t).unwrap();
        assert_eq!(ev.event_id, "0xhash:7123");
        assert_eq!(ev.side, Side::Buy);
        assert_eq!(ev.outcome_index, 1);
        assert_eq!(ev.amount, Decimal::new(420, 2));
        assert_eq!(ev.shares, Some(Decimal::from(10)));
        assert_eq!(ev.market_slug.as_deref(), Some("will-it-rain"));
    }

    #[test]
    fn test_trade_without_hash_is_dropped() {
        let t = trade(serde_json::json!({
            "side": "SELL",
            "asset": "1",
            "conditionId": "0xcond",
            "timestamp": 1_717_000_000
        }));
        assert!(trade_to_event(&t).is_none());
    }

    #[test]
    fn test_parse_timestamp_forms() {
        let secs = serde_json::json!(1_717_000_000);
        let millis = serde_json::json!("1717000000000");
        let rfc = serde_json::json!("2024-05-29T16:26:40Z");

        let a = parse_trade_timestamp(Some(&secs)).unwrap();
        assert_eq!(parse_trade_timestamp(Some(&millis)).unwrap(), a);
        assert_eq!(parse_trade_timestamp(Some(&rfc)).unwrap(), a);
        assert!(parse_trade_timestamp(Some(&serde_json::json!(true))).is_none());
    }
}
