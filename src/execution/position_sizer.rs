use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use thiserror::Error;

use crate::models::{AmountPolicy, AmountType, Side};

/// USDC and CTF outcome tokens both use 6 decimals on-chain.
pub const BASE_UNIT_DECIMALS: u32 = 6;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("fixed amount must be positive, got {0}")]
    NonPositiveFixed(Decimal),

    #[error("percentage must be within 0-100, got {0}")]
    PercentageOutOfRange(Decimal),
}

/// Source-side inputs for sizing.
#[derive(Debug, Clone)]
pub struct OriginalTrade {
    pub side: Side,
    /// USDC notional.
    pub amount: Decimal,
    pub price: Decimal,
    pub shares: Option<Decimal>,
}

impl OriginalTrade {
    fn share_count(&self) -> Decimal {
        match self.shares {
            Some(s) => s,
            None => per_price(self.amount, self.price),
        }
    }
}

/// Result of sizing a copy.
///
/// `amount` is in the unit being spent: USDC for buys, shares for sells.
/// `balance` is the matching balance it was checked against.
#[derive(Debug, Clone, PartialEq)]
pub struct SizingResult {
    pub amount: Decimal,
    pub amount_in_base_units: u64,
    pub is_sufficient: bool,
    pub balance: Decimal,
    pub shares: Decimal,
    pub notional: Decimal,
}

/// Check that the policy amount for `side` makes sense for its type.
pub fn validate_policy(policy: &AmountPolicy, side: Side) -> Result<(), PolicyError> {
    let value = policy_amount(policy, side);
    match policy.amount_type {
        AmountType::Fixed => {
            if value <= Decimal::ZERO {
                return Err(PolicyError::NonPositiveFixed(value));
            }
        }
        AmountType::Percentage | AmountType::PercentageOfOriginal => {
            if value <= Decimal::ZERO || value > Decimal::ONE_HUNDRED {
                return Err(PolicyError::PercentageOutOfRange(value));
            }
        }
    }
    Ok(())
}

/// Size a copy of `original` under `policy`.
///
/// `balance` is collateral (USDC) for buys and the held outcome-token share
/// count for sells. Insufficient balance is reported, not raised.
pub fn calculate_size(
    policy: &AmountPolicy,
    original: &OriginalTrade,
    balance: Decimal,
) -> SizingResult {
    match original.side {
        Side::Buy => size_buy(policy, original, balance),
        Side::Sell => size_sell(policy, original, balance),
    }
}

fn size_buy(policy: &AmountPolicy, original: &OriginalTrade, balance: Decimal) -> SizingResult {
    let pct = policy.buy_amount / Decimal::ONE_HUNDRED;
    let raw = match policy.amount_type {
        AmountType::Fixed => policy.buy_amount,
        AmountType::Percentage => balance * pct,
        AmountType::PercentageOfOriginal => original.amount * pct,
    };

    let amount = truncate(clamp(raw, policy));
    let shares = truncate(per_price(amount, original.price));

    SizingResult {
        amount,
        amount_in_base_units: to_base_units(amount),
        is_sufficient: amount > Decimal::ZERO && balance >= amount,
        balance,
        shares,
        notional: amount,
    }
}

fn size_sell(policy: &AmountPolicy, original: &OriginalTrade, balance: Decimal) -> SizingResult {
    let pct = policy.sell_amount / Decimal::ONE_HUNDRED;
    let raw_shares = match policy.amount_type {
        // Amount-denominated: convert the USDC amount into shares.
        AmountType::Fixed => per_price(policy.sell_amount, original.price),
        AmountType::Percentage => balance * pct,
        AmountType::PercentageOfOriginal => original.share_count() * pct,
    };

    // Bounds are USDC amounts, so clamp on notional and convert back.
    let shares = if original.price > Decimal::ZERO
        && (policy.min_amount.is_some() || policy.max_amount.is_some())
    {
        per_price(clamp(raw_shares * original.price, policy), original.price)
    } else {
        raw_shares
    };
    let shares = truncate(shares);

    SizingResult {
        amount: shares,
        amount_in_base_units: to_base_units(shares),
        is_sufficient: shares > Decimal::ZERO && balance >= shares,
        balance,
        shares,
        notional: truncate(shares * original.price),
    }
}

fn policy_amount(policy: &AmountPolicy, side: Side) -> Decimal {
    match side {
        Side::Buy => policy.buy_amount,
        Side::Sell => policy.sell_amount,
    }
}

fn clamp(value: Decimal, policy: &AmountPolicy) -> Decimal {
    let mut v = value.max(Decimal::ZERO);
    if let Some(min) = policy.min_amount {
        v = v.max(min);
    }
    if let Some(max) = policy.max_amount {
        v = v.min(max);
    }
    v
}

fn per_price(amount: Decimal, price: Decimal) -> Decimal {
    if price <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    amount / price
}

fn truncate(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(BASE_UNIT_DECIMALS, RoundingStrategy::ToZero)
}

fn to_base_units(value: Decimal) -> u64 {
    (truncate(value) * Decimal::from(10u64.pow(BASE_UNIT_DECIMALS)))
        .to_u64()
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(amount_type: AmountType, buy: i64, sell: i64) -> AmountPolicy {
        AmountPolicy {
            amount_type,
            buy_amount: Decimal::from(buy),
            sell_amount: Decimal::from(sell),
            min_amount: None,
            max_amount: None,
        }
    }

    fn trade(side: Side, amount: i64, price: Decimal, shares: Option<i64>) -> OriginalTrade {
        OriginalTrade {
            side,
            amount: Decimal::from(amount),
            price,
            shares: shares.map(Decimal::from),
        }
    }

    #[test]
    fn test_fixed_buy_ignores_source_size() {
        let p = policy(AmountType::Fixed, 25, 25);
        let r = calculate_size(&p, &trade(Side::Buy, 10_000, Decimal::new(50, 2), None), Decimal::from(100));
        assert_eq!(r.amount, Decimal::from(25));
        assert_eq!(r.amount_in_base_units, 25_000_000);
        assert_eq!(r.shares, Decimal::from(50));
        assert!(r.is_sufficient);
    }

    #[test]
    fn test_fixed_buy_clamped_to_bounds() {
        let mut p = policy(AmountType::Fixed, 25, 25);
        p.max_amount = Some(Decimal::from(10));
        let r = calculate_size(&p, &trade(Side::Buy, 100, Decimal::new(50, 2), None), Decimal::from(100));
        assert_eq!(r.amount, Decimal::from(10));

        let mut p = policy(AmountType::PercentageOfOriginal, 1, 1);
        p.min_amount = Some(Decimal::from(5));
        let r = calculate_size(&p, &trade(Side::Buy, 100, Decimal::new(50, 2), None), Decimal::from(100));
        assert_eq!(r.amount, Decimal::from(5));
    }

    #[test]
    fn test_percentage_of_balance_buy() {
        let p = policy(AmountType::Percentage, 10, 10);
        let r = calculate_size(&p, &trade(Side::Buy, 500, Decimal::new(40, 2), None), Decimal::from(200));
        assert_eq!(r.amount, Decimal::from(20));
        assert_eq!(r.balance, Decimal::from(200));
    }

    #[test]
    fn test_percentage_of_original_buy() {
        let p = policy(AmountType::PercentageOfOriginal, 50, 50);
        let r = calculate_size(&p, &trade(Side::Buy, 80, Decimal::new(40, 2), None), Decimal::from(1_000));
        assert_eq!(r.amount, Decimal::from(40));
        assert_eq!(r.shares, Decimal::from(100));
    }

    #[test]
    fn test_percentage_of_original_sell_uses_shares() {
        let p = policy(AmountType::PercentageOfOriginal, 50, 50);
        let r = calculate_size(&p, &trade(Side::Sell, 6, Decimal::new(60, 2), Some(10)), Decimal::from(20));
        assert_eq!(r.shares, Decimal::from(5));
        assert_eq!(r.amount, Decimal::from(5));
        assert_eq!(r.notional, Decimal::from(3));
        assert!(r.is_sufficient);
    }

    #[test]
    fn test_sell_shares_derived_from_amount_when_missing() {
        let p = policy(AmountType::PercentageOfOriginal, 50, 50);
        // 6 USDC at 0.60 = 10 shares
        let r = calculate_size(&p, &trade(Side::Sell, 6, Decimal::new(60, 2), None), Decimal::from(20));
        assert_eq!(r.shares, Decimal::from(5));
    }

    #[test]
    fn test_fixed_sell_converts_amount_to_shares() {
        let p = policy(AmountType::Fixed, 10, 10);
        let r = calculate_size(&p, &trade(Side::Sell, 100, Decimal::new(25, 2), None), Decimal::from(100));
        assert_eq!(r.shares, Decimal::from(40));
    }

    #[test]
    fn test_insufficient_balance_is_reported() {
        let p = policy(AmountType::Fixed, 50, 50);
        let r = calculate_size(&p, &trade(Side::Buy, 100, Decimal::new(50, 2), None), Decimal::from(20));
        assert!(!r.is_sufficient);
        assert_eq!(r.amount, Decimal::from(50));
        assert_eq!(r.balance, Decimal::from(20));

        let r = calculate_size(&p, &trade(Side::Sell, 100, Decimal::new(50, 2), None), Decimal::from(20));
        assert_eq!(r.shares, Decimal::from(100));
        assert!(!r.is_sufficient);
    }

    #[test]
    fn test_zero_size_is_not_sufficient() {
        let p = policy(AmountType::Percentage, 10, 10);
        let r = calculate_size(&p, &trade(Side::Buy, 100, Decimal::new(50, 2), None), Decimal::ZERO);
        assert_eq!(r.amount, Decimal::ZERO);
        assert!(!r.is_sufficient);
    }

    #[test]
    fn test_amount_truncated_to_base_units() {
        let p = policy(AmountType::PercentageOfOriginal, 33, 33);
        let r = calculate_size(&p, &trade(Side::Buy, 1, Decimal::new(50, 2), None), Decimal::from(10));
        assert_eq!(r.amount, Decimal::new(33, 2));
        assert_eq!(r.amount_in_base_units, 330_000);
    }

    #[test]
    fn test_validate_policy() {
        assert!(validate_policy(&policy(AmountType::Fixed, 5, 5), Side::Buy).is_ok());
        assert_eq!(
            validate_policy(&policy(AmountType::Fixed, 0, 5), Side::Buy),
            Err(PolicyError::NonPositiveFixed(Decimal::ZERO))
        );
        assert!(validate_policy(&policy(AmountType::Percentage, 100, 100), Side::Sell).is_ok());
        assert_eq!(
            validate_policy(&policy(AmountType::PercentageOfOriginal, 10, 150), Side::Sell),
            Err(PolicyError::PercentageOutOfRange(Decimal::from(150)))
        );
    }
}
