use std::sync::Arc;

use alloy::primitives::{Address, B256, U256};
use alloy::providers::ProviderBuilder;
use alloy::sol;
use async_trait::async_trait;

use super::wallet::WalletRegistry;
use crate::external::{RedemptionReceipt, RedemptionVenue, VenueError};

/// USDC contract address on Polygon mainnet.
const USDC_ADDRESS: &str = "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174";

/// Conditional Tokens Framework contract address on Polygon mainnet.
const CTF_ADDRESS: &str = "0x4D97DCd97eC945f40cF65F87097ACe5EA0476045";

sol! {
    #[sol(rpc)]
    contract ConditionalTokens {
        function redeemPositions(
            address collateralToken,
            bytes32 parentCollectionId,
            bytes32 conditionId,
            uint256[] calldata indexSets
        ) external;
    }
}

/// Redeems binary-market positions held by the owner's signing address.
///
/// Both index sets are passed so one call pays out the winning side and
/// burns the losing one.
pub struct CtfRedeemer {
    wallets: Arc<WalletRegistry>,
    rpc_url: String,
}

impl CtfRedeemer {
    pub fn new(wallets: Arc<WalletRegistry>, rpc_url: &str) -> Self {
        Self {
            wallets,
            rpc_url: rpc_url.to_string(),
        }
    }
}

pub fn parse_condition_id(market_id: &str) -> Result<B256, VenueError> {
    market_id
        .parse::<B256>()
        .map_err(|e| VenueError::Rejected(format!("invalid condition id {market_id}: {e}")))
}

#[async_trait]
impl RedemptionVenue for CtfRedeemer {
    async fn redeem(&self, owner: &str, market_id: &str) -> Result<RedemptionReceipt, VenueError> {
        let condition_id = parse_condition_id(market_id)?;
        let signer = self.wallets.signer_for(owner)?;

        let provider = ProviderBuilder::new()
            .wallet(signer)
            .connect(&self.rpc_url)
            .await
            .map_err(|e| VenueError::Transport(format!("rpc connect failed: {e}")))?;

        let ctf_address: Address = CTF_ADDRESS
            .parse()
            .map_err(|e| VenueError::Unexpected(format!("invalid CTF address: {e}")))?;
        let usdc_address: Address = USDC_ADDRESS
            .parse()
            .map_err(|e| VenueError::Unexpected(format!("invalid USDC address: {e}")))?;

        let ctf = ConditionalTokens::new(ctf_address, &provider);
        let pending_tx = ctf
            .redeemPositions(
                usdc_address,
                B256::ZERO,
                condition_id,
                vec![U256::from(1u64), U256::from(2u64)],
            )
            .send()
            .await
            .map_err(|e| VenueError::Rejected(format!("redeem transaction failed: {e}")))?;

        let tx_hash = format!("{:#x}", pending_tx.tx_hash());
        tracing::debug!(owner, market_id, tx_hash = %tx_hash, "Redeem submitted, awaiting receipt");

        let receipt = pending_tx
            .get_receipt()
            .await
            .map_err(|e| VenueError::Transport(format!("receipt unavailable for {tx_hash}: {e}")))?;

        if !receipt.status() {
            return Err(VenueError::Rejected(format!("redeem transaction {tx_hash} reverted")));
        }

        tracing::info!(
            owner,
            market_id,
            tx_hash = %tx_hash,
            block = receipt.block_number.unwrap_or(0),
            "Positions redeemed on-chain"
        );

        Ok(RedemptionReceipt { tx_hash })
    }
}
