use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::TtlCache;
use crate::external::{MarketRef, MarketState, MarketStatusSource};

const GAMMA_API_BASE: &str = "https://gamma-api.polymarket.com";

/// Resolved outcome prices are exactly "1" for the winner.
const WINNING_PRICE: &str = "1";

#[derive(Debug, Error)]
pub enum GammaClientError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("market not found: {0}")]
    NotFound(String),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GammaEvent {
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GammaMarket {
    #[serde(alias = "conditionId")]
    pub condition_id: String,
    #[serde(default)]
    pub slug: Option<String>,
    #[serde(default)]
    pub events: Vec<GammaEvent>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub closed: Option<bool>,
    #[serde(default, alias = "acceptingOrders")]
    pub accepting_orders: Option<bool>,
    #[serde(default, alias = "umaResolutionStatus")]
    pub uma_resolution_status: Option<String>,
    /// Stringified JSON array of prices, one per outcome.
    #[serde(default, alias = "outcomePrices")]
    pub outcome_prices: Option<String>,
}

impl GammaMarket {
    /// Parse the stringified outcomePrices into one string per outcome.
    pub fn parse_outcome_prices(&self) -> Vec<String> {
        self.outcome_prices
            .as_deref()
            .and_then(|s| serde_json::from_str::<Vec<String>>(s).ok())
            .unwrap_or_default()
    }

    pub fn is_resolved(&self) -> bool {
        self.uma_resolution_status.as_deref() == Some("resolved")
            || (self.closed == Some(true) && self.winning_outcome().is_some())
    }

    /// Index of the outcome priced at exactly one, if any.
    pub fn winning_outcome(&self) -> Option<i32> {
        let prices = self.parse_outcome_prices();
        prices
            .iter()
            .position(|p| p.trim() == WINNING_PRICE || p.trim() == "1.0")
            .map(|i| i as i32)
    }

    pub fn to_state(&self) -> MarketState {
        let closed = self.closed.unwrap_or(false);
        let resolved = self.is_resolved();
        MarketState {
            accepting_orders: self.accepting_orders.unwrap_or(self.active.unwrap_or(false)),
            closed,
            resolved,
            winning_outcome: if resolved { self.winning_outcome() } else { None },
            category: self.category.clone(),
        }
    }
}

/// Gamma market lookups behind a short-lived cache.
#[derive(Clone)]
pub struct GammaClient {
    http: Client,
    base_url: String,
    cache: TtlCache<MarketRef, MarketState>,
}

impl GammaClient {
    pub fn new(http: Client, cache: TtlCache<MarketRef, MarketState>) -> Self {
        Self::with_base_url(http, GAMMA_API_BASE, cache)
    }

    pub fn with_base_url(
        http: Client,
        base_url: &str,
        cache: TtlCache<MarketRef, MarketState>,
    ) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            cache,
        }
    }

    /// Fetch a market by slug, falling back to condition id.
    pub async fn get_market(&self, market: &MarketRef) -> Result<GammaMarket, GammaClientError> {
        if let Some(slug) = market.slug.as_deref() {
            if let Some(m) = self.query_first(&[("slug", slug)]).await? {
                return Ok(m);
            }
        }

        self.query_first(&[("condition_ids", market.market_id.as_str())])
            .await?
            .ok_or_else(|| GammaClientError::NotFound(market.market_id.clone()))
    }

    async fn query_first(
        &self,
        query: &[(&str, &str)],
    ) -> Result<Option<GammaMarket>, GammaClientError> {
        let url = format!("{}/markets", self.base_url);
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;

        let markets: Vec<GammaMarket> = resp.json().await?;
        Ok(markets.into_iter().next())
    }
}

#[async_trait]
impl MarketStatusSource for GammaClient {
    async fn lookup(&self, market: &MarketRef) -> anyhow::Result<MarketState> {
        let state = self
            .cache
            .get_or_try_insert_with(market.clone(), || async {
                self.get_market(market).await.map(|m| m.to_state())
            })
            .await?;
        Ok(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn market(json: serde_json::Value) -> GammaMarket {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_open_market_state() {
        let m = market(serde_json::json!({
            "conditionId": "0xabc",
            "active": true,
            "closed": false,
            "acceptingOrders": true,
            "category": "Sports",
            "outcomePrices": "[\"0.41\", \"0.59\"]"
        }));
        let state = m.to_state();
        assert!(state.accepting_orders);
        assert!(!state.closed);
        assert!(!state.resolved);
        assert_eq!(state.winning_outcome, None);
        assert_eq!(state.category.as_deref(), Some("Sports"));
    }

    #[test]
    fn test_resolved_market_reports_winner() {
        let m = market(serde_json::json!({
            "conditionId": "0xabc",
            "closed": true,
            "acceptingOrders": false,
            "umaResolutionStatus": "resolved",
            "outcomePrices": "[\"0\", \"1\"]"
        }));
        let state = m.to_state();
        assert!(state.resolved);
        assert_eq!(state.winning_outcome, Some(1));
    }

    #[test]
    fn test_closed_without_prices_is_not_resolved() {
        let m = market(serde_json::json!({
            "conditionId": "0xabc",
            "closed": true
        }));
        assert!(!m.is_resolved());
        assert!(!m.to_state().accepting_orders);
    }
}
