use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse failure bucket stored on a failed copy record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureCategory {
    Balance,
    Validation,
    Market,
    Execution,
    Other,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::Balance => "balance",
            FailureCategory::Validation => "validation",
            FailureCategory::Market => "market",
            FailureCategory::Execution => "execution",
            FailureCategory::Other => "other",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Specific failure reason within a category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    InsufficientBalance,
    InsufficientAllowance,
    BelowMinimumSize,
    InvalidPrice,
    OrderbookUnavailable,
    MarketClosed,
    MarketNotAcceptingOrders,
    InvalidSignature,
    RateLimited,
    OrderCancelled,
    SettlementTimeout,
    SubmissionInterrupted,
    UnknownError,
}

impl FailureReason {
    pub fn category(&self) -> FailureCategory {
        match self {
            FailureReason::InsufficientBalance | FailureReason::InsufficientAllowance => {
                FailureCategory::Balance
            }
            FailureReason::BelowMinimumSize | FailureReason::InvalidPrice => {
                FailureCategory::Validation
            }
            FailureReason::OrderbookUnavailable
            | FailureReason::MarketClosed
            | FailureReason::MarketNotAcceptingOrders => FailureCategory::Market,
            FailureReason::InvalidSignature
            | FailureReason::RateLimited
            | FailureReason::OrderCancelled
            | FailureReason::SettlementTimeout => FailureCategory::Execution,
            FailureReason::SubmissionInterrupted | FailureReason::UnknownError => {
                FailureCategory::Other
            }
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::InsufficientBalance => "insufficient_balance",
            FailureReason::InsufficientAllowance => "insufficient_allowance",
            FailureReason::BelowMinimumSize => "below_minimum_size",
            FailureReason::InvalidPrice => "invalid_price",
            FailureReason::OrderbookUnavailable => "orderbook_unavailable",
            FailureReason::MarketClosed => "market_closed",
            FailureReason::MarketNotAcceptingOrders => "market_not_accepting_orders",
            FailureReason::InvalidSignature => "invalid_signature",
            FailureReason::RateLimited => "rate_limited",
            FailureReason::OrderCancelled => "order_cancelled",
            FailureReason::SettlementTimeout => "settlement_timeout",
            FailureReason::SubmissionInterrupted => "submission_interrupted",
            FailureReason::UnknownError => "unknown_error",
        }
    }

    /// Reasons worth another venue attempt when retries are enabled.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            FailureReason::RateLimited | FailureReason::OrderbookUnavailable
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failure with its category, reason and the raw message kept for diagnosis.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedFailure {
    pub category: FailureCategory,
    pub reason: FailureReason,
    pub message: String,
}

impl ClassifiedFailure {
    pub fn new(reason: FailureReason, message: impl Into<String>) -> Self {
        Self {
            category: reason.category(),
            reason,
            message: message.into(),
        }
    }
}

impl fmt::Display for ClassifiedFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}: {}", self.category, self.reason, self.message)
    }
}

/// Ordered (pattern, reason) table. First match wins, so the more specific
/// phrases sit above the generic ones.
const PATTERNS: &[(&[&str], FailureReason)] = &[
    (&["allowance"], FailureReason::InsufficientAllowance),
    (
        &["insufficient balance", "insufficient_balance", "not enough balance", "insufficient funds"],
        FailureReason::InsufficientBalance,
    ),
    (
        &["invalid price", "tick size", "price must be", "breaks minimum tick"],
        FailureReason::InvalidPrice,
    ),
    (
        &["minimum size", "min size", "size too small", "lower than the minimum"],
        FailureReason::BelowMinimumSize,
    ),
    (
        &["not accepting orders", "accepting_orders"],
        FailureReason::MarketNotAcceptingOrders,
    ),
    (
        &["orderbook", "order book", "no match", "no liquidity"],
        FailureReason::OrderbookUnavailable,
    ),
    (
        &["market closed", "market is closed", "closed market", "market resolved", "market has resolved", "market is resolved"],
        FailureReason::MarketClosed,
    ),
    (&["signature"], FailureReason::InvalidSignature),
    (
        &["rate limit", "too many requests", "status 429", "http 429", "throttl"],
        FailureReason::RateLimited,
    ),
];

/// Classify a venue error message into the failure taxonomy.
pub fn classify(message: &str) -> ClassifiedFailure {
    let lower = message.to_lowercase();
    let reason = PATTERNS
        .iter()
        .find(|(needles, _)| needles.iter().any(|n| lower.contains(n)))
        .map(|(_, reason)| *reason)
        .unwrap_or(FailureReason::UnknownError);

    ClassifiedFailure::new(reason, message)
}
