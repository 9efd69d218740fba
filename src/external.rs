//! Contracts for the services the copy pipeline consumes.
//!
//! Production implementations live in `crate::polymarket`; tests supply
//! in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{OrderSubmission, Side, SourceEvent, SourceSelector};

/// Error surfaced by any external collaborator. The text is what gets
/// classified, so implementations keep the upstream message intact.
#[derive(Debug, Error)]
pub enum VenueError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("no signing credentials for owner {0}")]
    NoCredentials(String),

    #[error("unexpected response: {0}")]
    Unexpected(String),
}

// ---------------------------------------------------------------------------
// Activity source
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ActivitySource: Send + Sync {
    /// The oldest `limit` events for `selector` strictly newer than `since`,
    /// oldest first. Callers page forward by raising `since`.
    async fn fetch(
        &self,
        selector: &SourceSelector,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<SourceEvent>>;
}

// ---------------------------------------------------------------------------
// Market status
// ---------------------------------------------------------------------------

/// How to look a market up: by slug when the feed gave one, else by
/// condition id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarketRef {
    pub market_id: String,
    pub slug: Option<String>,
}

impl MarketRef {
    pub fn new(market_id: &str, slug: Option<&str>) -> Self {
        Self {
            market_id: market_id.to_string(),
            slug: slug.map(str::to_string),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarketState {
    pub accepting_orders: bool,
    pub closed: bool,
    pub resolved: bool,
    /// Index of the winning outcome, once known.
    pub winning_outcome: Option<i32>,
    pub category: Option<String>,
}

#[async_trait]
pub trait MarketStatusSource: Send + Sync {
    async fn lookup(&self, market: &MarketRef) -> anyhow::Result<MarketState>;
}

// ---------------------------------------------------------------------------
// Execution venue
// ---------------------------------------------------------------------------

/// A copy order as handed to the venue.
///
/// For buys `amount` is USDC to spend; for sells it is shares to sell.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub owner: String,
    pub market_id: String,
    pub asset_id: String,
    pub outcome_index: i32,
    pub side: Side,
    pub amount: Decimal,
    pub ref_price: Decimal,
    /// Fractional slippage tolerance applied to `ref_price`.
    pub slippage: Decimal,
}

/// Order state as reported by the venue.
#[derive(Debug, Clone, PartialEq)]
pub enum OrderState {
    /// Resting or partially matched.
    Live { size_matched: Decimal },
    Matched {
        price: Decimal,
        shares: Decimal,
        tx_hash: Option<String>,
    },
    Cancelled,
    Expired,
}

#[async_trait]
pub trait ExecutionVenue: Send + Sync {
    async fn submit_buy(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError>;

    async fn submit_sell(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError>;

    async fn order_status(&self, owner: &str, order_id: &str) -> Result<OrderState, VenueError>;
}

// ---------------------------------------------------------------------------
// Redemption venue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedemptionReceipt {
    pub tx_hash: String,
}

#[async_trait]
pub trait RedemptionVenue: Send + Sync {
    async fn redeem(&self, owner: &str, market_id: &str) -> Result<RedemptionReceipt, VenueError>;
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

#[async_trait]
pub trait BalanceService: Send + Sync {
    /// Spendable USDC.
    async fn collateral_balance(&self, owner: &str) -> Result<Decimal, VenueError>;

    /// Shares held of one outcome token.
    async fn outcome_token_balance(
        &self,
        owner: &str,
        market_id: &str,
        asset_id: &str,
    ) -> Result<Decimal, VenueError>;
}
