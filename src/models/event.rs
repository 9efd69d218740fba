use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::Side;

/// A trade or signal observed on an activity source: the thing being copied.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceEvent {
    /// Transaction hash for trades, signal id for signals. Unique per source.
    pub event_id: String,
    /// Market condition ID.
    pub market_id: String,
    pub market_slug: Option<String>,
    /// CTF token ID of the traded outcome.
    pub asset_id: String,
    pub outcome_index: i32,
    pub side: Side,
    /// USDC notional of the source trade.
    pub amount: Decimal,
    pub price: Decimal,
    pub shares: Option<Decimal>,
    pub tx_hash: Option<String>,
    pub category: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for SourceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Event: id={} market={} side={} amount={} price={}",
            short(&self.event_id),
            short(&self.market_id),
            self.side,
            self.amount,
            self.price,
        )
    }
}

fn short(id: &str) -> String {
    id.chars().take(10).collect()
}
