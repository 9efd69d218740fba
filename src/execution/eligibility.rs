use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::models::{ConfigStatus, CopyConfig, Side};

/// Why a config may not execute right now. These are skips, not failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum Ineligible {
    #[error("copy config is disabled")]
    Disabled,

    #[error("copy config is not authorized for trading")]
    Unauthorized,

    #[error("copy config is {0}")]
    NotActive(ConfigStatus),

    #[error("copy duration of {days} days has elapsed")]
    DurationExpired { days: i32 },

    #[error("daily buy limit reached: {count}/{max}")]
    DailyQuotaReached { count: i32, max: i32 },
}

/// Gate a config for execution of a trade on `side`.
///
/// The daily quota only bounds buys.
pub fn check_eligibility(
    config: &CopyConfig,
    side: Side,
    now: DateTime<Utc>,
) -> Result<(), Ineligible> {
    if !config.enabled {
        return Err(Ineligible::Disabled);
    }

    if !config.authorized {
        return Err(Ineligible::Unauthorized);
    }

    if config.status != ConfigStatus::Active {
        return Err(Ineligible::NotActive(config.status));
    }

    if config.duration_expired(now) {
        return Err(Ineligible::DurationExpired {
            days: config.duration_days.unwrap_or_default(),
        });
    }

    if side == Side::Buy {
        if let Some(max) = config.max_buy_trades_per_day {
            let count = config.effective_buy_count(now);
            if count >= max {
                return Err(Ineligible::DailyQuotaReached { count, max });
            }
        }
    }

    Ok(())
}
