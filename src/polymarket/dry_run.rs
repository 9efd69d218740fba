//! Adapters used when no signing key is configured. Orders fill instantly at
//! the limit price and redemptions return synthetic hashes, so the pipeline
//! runs end to end without touching the venue.

use std::collections::HashMap;

use async_trait::async_trait;
use rust_decimal::Decimal;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::trading::limit_order_terms;
use crate::external::{
    BalanceService, ExecutionVenue, OrderRequest, OrderState, RedemptionReceipt, RedemptionVenue,
    VenueError,
};
use crate::models::OrderSubmission;

#[derive(Default)]
pub struct DryRunVenue {
    fills: RwLock<HashMap<String, (Decimal, Decimal)>>,
}

impl DryRunVenue {
    pub fn new() -> Self {
        Self::default()
    }

    async fn place(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        let (price, size) = limit_order_terms(order)?;
        let order_id = format!("dry-{}", Uuid::new_v4());
        self.fills
            .write()
            .await
            .insert(order_id.clone(), (price, size));

        tracing::info!(
            owner = %order.owner,
            market = %order.market_id,
            side = %order.side,
            price = %price,
            size = %size,
            order_id = %order_id,
            "DRY RUN: order would be submitted"
        );

        Ok(OrderSubmission {
            order_id,
            status: "live".into(),
            tx_hash: None,
        })
    }
}

#[async_trait]
impl ExecutionVenue for DryRunVenue {
    async fn submit_buy(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        self.place(order).await
    }

    async fn submit_sell(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        self.place(order).await
    }

    async fn order_status(&self, _owner: &str, order_id: &str) -> Result<OrderState, VenueError> {
        let fills = self.fills.read().await;
        let (price, shares) = fills
            .get(order_id)
            .copied()
            .ok_or_else(|| VenueError::Unexpected(format!("unknown order {order_id}")))?;
        Ok(OrderState::Matched {
            price,
            shares,
            tx_hash: None,
        })
    }
}

pub struct DryRunRedeemer;

#[async_trait]
impl RedemptionVenue for DryRunRedeemer {
    async fn redeem(&self, owner: &str, market_id: &str) -> Result<RedemptionReceipt, VenueError> {
        let tx_hash = format!("dry-{}", Uuid::new_v4().simple());
        tracing::info!(owner, market_id, tx_hash = %tx_hash, "DRY RUN: positions would be redeemed");
        Ok(RedemptionReceipt { tx_hash })
    }
}

/// Reports a fixed collateral balance and no outcome tokens unless seeded.
pub struct DryRunBalances {
    collateral: Decimal,
    tokens: RwLock<HashMap<String, Decimal>>,
}

impl DryRunBalances {
    pub fn new(collateral: Decimal) -> Self {
        Self {
            collateral,
            tokens: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_token_balance(&self, asset_id: &str, shares: Decimal) {
        self.tokens.write().await.insert(asset_id.to_string(), shares);
    }
}

#[async_trait]
impl BalanceService for DryRunBalances {
    async fn collateral_balance(&self, _owner: &str) -> Result<Decimal, VenueError> {
        Ok(self.collateral)
    }

    async fn outcome_token_balance(
        &self,
        _owner: &str,
        _market_id: &str,
        asset_id: &str,
    ) -> Result<Decimal, VenueError> {
        Ok(self
            .tokens
            .read()
            .await
            .get(asset_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}
