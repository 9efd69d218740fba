use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;

use super::data_client::DataClientError;
use super::types::ApiSignal;
use crate::external::ActivitySource;
use crate::models::{Side, SourceEvent, SourceSelector};

/// HTTP signal feed: `GET {base}/signals?since=&limit=&order=asc&category=`.
#[derive(Debug, Clone)]
pub struct SignalClient {
    http: Client,
    base_url: String,
}

impl SignalClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub async fn get_signals(
        &self,
        categories: &[String],
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ApiSignal>, DataClientError> {
        let url = format!("{}/signals", self.base_url);
        let mut query: Vec<(&str, String)> = vec![
            ("since", since.to_rfc3339()),
            ("limit", limit.to_string()),
            ("order", "asc".to_string()),
        ];
        query.extend(categories.iter().map(|c| ("category", c.clone())));

        let resp = self
            .http
            .get(&url)
            .query(&query)
            .send()
            .await?
            .error_for_status()?;

        let signals: Vec<ApiSignal> = resp.json().await?;
        Ok(signals)
    }
}

#[async_trait]
impl ActivitySource for SignalClient {
    async fn fetch(
        &self,
        selector: &SourceSelector,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<SourceEvent>> {
        let SourceSelector::Signals { categories } = selector else {
            return Err(DataClientError::Unexpected(
                "signal feed only serves signal selectors".into(),
            )
            .into());
        };

        let signals = self.get_signals(categories, since, limit).await?;
        let mut events: Vec<SourceEvent> = signals
            .into_iter()
            .filter_map(signal_to_event)
            .filter(|e| e.timestamp > since)
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(events)
    }
}

pub fn signal_to_event(signal: ApiSignal) -> Option<SourceEvent> {
    let side = Side::from_api_str(&signal.side)?;
    Some(SourceEvent {
        event_id: signal.id,
        market_id: signal.market_id,
        market_slug: signal.market_slug,
        asset_id: signal.asset_id,
        outcome_index: signal.outcome_index.unwrap_or(0),
        side,
        amount: signal.amount,
        price: signal.price,
        shares: signal.shares,
        tx_hash: None,
        category: signal.category,
        timestamp: signal.created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_signal_to_event() {
        let signal: ApiSignal = serde_json::from_value(serde_json::json!({
            "id": "sig-1",
            "marketId": "0xcond",
            "assetId": "42",
            "side": "buy",
            "amount": "25",
            "price": "0.5",
            "category": "politics",
            "createdAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap();

        let ev = signal_to_event(signal).unwrap();
        assert_eq!(ev.event_id, "sig-1");
        assert_eq!(ev.side, Side::Buy);
        assert_eq!(ev.category.as_deref(), Some("politics"));
        assert_eq!(ev.amount, Decimal::from(25));
        assert_eq!(ev.shares, None);
    }

    #[test]
    fn test_unknown_side_is_dropped() {
        let signal: ApiSignal = serde_json::from_value(serde_json::json!({
            "id": "sig-2",
            "marketId": "0xcond",
            "assetId": "42",
            "side": "hold",
            "amount": 1,
            "price": 0.5,
            "createdAt": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert!(signal_to_event(signal).is_none());
    }
}
