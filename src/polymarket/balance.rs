use std::sync::Arc;

use async_trait::async_trait;
use polymarket_client_sdk::clob::types::request::BalanceAllowanceRequest;
use rust_decimal::Decimal;

use super::data_client::DataClient;
use super::wallet::WalletRegistry;
use crate::external::{BalanceService, VenueError};

/// USDC has six decimals; the CLOB reports collateral in base units.
const USDC_SCALE: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);

/// Queries USDC through the CLOB balance endpoint and outcome tokens
/// through the Data API positions feed.
pub struct PolymarketBalances {
    wallets: Arc<WalletRegistry>,
    data: DataClient,
}

impl PolymarketBalances {
    pub fn new(wallets: Arc<WalletRegistry>, data: DataClient) -> Self {
        Self { wallets, data }
    }
}

#[async_trait]
impl BalanceService for PolymarketBalances {
    async fn collateral_balance(&self, owner: &str) -> Result<Decimal, VenueError> {
        let wallet = self.wallets.wallet_for(owner).await?;
        let client = wallet.client();

        let request = BalanceAllowanceRequest::default();
        if let Err(e) = client.update_balance_allowance(request.clone()).await {
            tracing::warn!(owner, error = %e, "Failed to refresh balance/allowance cache (non-fatal)");
        }

        let fetched = client
            .balance_allowance(request)
            .await
            .map_err(|e| VenueError::Transport(format!("balance lookup failed: {e}")));
        let response = self.wallets.check_auth(owner, fetched).await?;

        Ok(response.balance / USDC_SCALE)
    }

    async fn outcome_token_balance(
        &self,
        owner: &str,
        market_id: &str,
        asset_id: &str,
    ) -> Result<Decimal, VenueError> {
        let wallet = self.wallets.wallet_for(owner).await?;
        let positions = self
            .data
            .get_positions(&wallet.wallet_address(), market_id)
            .await
            .map_err(|e| VenueError::Transport(format!("position lookup failed: {e}")))?;

        Ok(positions
            .iter()
            .filter(|p| p.asset.as_deref() == Some(asset_id))
            .filter_map(|p| p.size)
            .sum())
    }
}
