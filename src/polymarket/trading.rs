use std::sync::Arc;

use async_trait::async_trait;
use polymarket_client_sdk::clob::types::response::OpenOrderResponse;
use polymarket_client_sdk::clob::types::{OrderStatusType, Side as SdkSide};
use polymarket_client_sdk::types::U256;
use rust_decimal::{Decimal, RoundingStrategy};

use super::wallet::{is_auth_failure, WalletRegistry};
use crate::external::{ExecutionVenue, OrderRequest, OrderState, VenueError};
use crate::models::{OrderSubmission, Side};

/// CLOB prices are quoted in cents between 0.01 and 0.99.
const MIN_PRICE: Decimal = Decimal::from_parts(1, 0, 0, false, 2);
const MAX_PRICE: Decimal = Decimal::from_parts(99, 0, 0, false, 2);

/// Limit price and share size for a copy order.
///
/// Buys cross up to `ref·(1+slippage)` and spend `amount` USDC; sells cross
/// down to `ref·(1−slippage)` and sell `amount` shares.
pub fn limit_order_terms(order: &OrderRequest) -> Result<(Decimal, Decimal), VenueError> {
    if order.ref_price <= Decimal::ZERO {
        return Err(VenueError::Rejected(format!(
            "invalid reference price {}",
            order.ref_price
        )));
    }

    let (price, size) = match order.side {
        Side::Buy => {
            let price = (order.ref_price * (Decimal::ONE + order.slippage))
                .round_dp_with_strategy(2, RoundingStrategy::ToZero)
                .clamp(MIN_PRICE, MAX_PRICE);
            (price, order.amount / price)
        }
        Side::Sell => {
            let price = (order.ref_price * (Decimal::ONE - order.slippage))
                .round_dp_with_strategy(2, RoundingStrategy::AwayFromZero)
                .clamp(MIN_PRICE, MAX_PRICE);
            (price, order.amount)
        }
    };

    let size = size.round_dp_with_strategy(2, RoundingStrategy::ToZero);
    if size <= Decimal::ZERO {
        return Err(VenueError::Rejected(format!(
            "order size rounds to zero (amount {})",
            order.amount
        )));
    }
    Ok((price, size))
}

pub fn parse_token_id(token_id: &str) -> Result<U256, VenueError> {
    U256::from_str_radix(token_id, 10)
        .or_else(|_| {
            token_id
                .strip_prefix("0x")
                .map(|hex| U256::from_str_radix(hex, 16))
                .unwrap_or_else(|| U256::from_str_radix(token_id, 16))
        })
        .map_err(|e| VenueError::Rejected(format!("invalid token id {token_id}: {e}")))
}

/// Live execution venue backed by the Polymarket CLOB SDK.
pub struct PolymarketVenue {
    wallets: Arc<WalletRegistry>,
}

impl PolymarketVenue {
    pub fn new(wallets: Arc<WalletRegistry>) -> Self {
        Self { wallets }
    }

    async fn place(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        let (price, size) = limit_order_terms(order)?;
        let token_id = parse_token_id(&order.asset_id)?;
        let sdk_side = match order.side {
            Side::Buy => SdkSide::Buy,
            Side::Sell => SdkSide::Sell,
        };

        let wallet = self.wallets.wallet_for(&order.owner).await?;
        let client = wallet.client();

        let signable_order = client
            .limit_order()
            .token_id(token_id)
            .side(sdk_side)
            .price(price)
            .size(size)
            .build()
            .await
            .map_err(|e| VenueError::Rejected(e.to_string()))?;

        let signed_order = client
            .sign(wallet.signer(), signable_order)
            .await
            .map_err(|e| VenueError::Rejected(e.to_string()))?;

        let posted = client.post_order(signed_order).await.map_err(|e| {
            let message = e.to_string();
            if is_auth_failure(&message) {
                VenueError::Rejected(format!("unauthorized: {message}"))
            } else {
                VenueError::Transport(message)
            }
        });
        let response = self.wallets.check_auth(&order.owner, posted).await?;

        if response.order_id.is_empty() {
            return Err(VenueError::Rejected(format!(
                "order not accepted (status {:?})",
                response.status
            )));
        }

        tracing::info!(
            owner = %order.owner,
            order_id = %response.order_id,
            status = ?response.status,
            side = %order.side,
            price = %price,
            size = %size,
            "Order submitted to CLOB"
        );

        Ok(OrderSubmission {
            order_id: response.order_id,
            status: format!("{:?}", response.status).to_lowercase(),
            tx_hash: None,
        })
    }
}

#[async_trait]
impl ExecutionVenue for PolymarketVenue {
    async fn submit_buy(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        self.place(order).await
    }

    async fn submit_sell(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        self.place(order).await
    }

    async fn order_status(&self, owner: &str, order_id: &str) -> Result<OrderState, VenueError> {
        let wallet = self.wallets.wallet_for(owner).await?;
        let fetched = wallet
            .client()
            .order(order_id)
            .await
            .map_err(|e| VenueError::Transport(e.to_string()));
        let status = self.wallets.check_auth(owner, fetched).await?;
        Ok(order_state(&status))
    }
}

fn order_state(status: &OpenOrderResponse) -> OrderState {
    match status.status {
        OrderStatusType::Matched => OrderState::Matched {
            price: status.price,
            shares: status.size_matched,
            tx_hash: None,
        },
        OrderStatusType::Canceled => OrderState::Cancelled,
        OrderStatusType::Unmatched => OrderState::Expired,
        _ => OrderState::Live {
            size_matched: status.size_matched,
        },
    }
}
