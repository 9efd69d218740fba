use std::env;
use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::execution::copy_executor::ExecutorSettings;
use crate::queue::RetryPolicy;
use crate::services::activity_monitor::MonitorSettings;
use crate::services::redemption_scanner::RedemptionSettings;

const DEFAULT_POLYGON_RPC: &str = "https://polygon-rpc.com";

#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Unset runs on the in-memory store and queue.
    pub database_url: Option<String>,
    pub host: String,
    pub port: u16,
    pub log_json: bool,

    // Signing (optional; without a key the venue runs dry)
    pub private_key: Option<String>,
    pub owner_id: String,
    pub polygon_rpc_url: String,
    pub dry_run: bool,
    pub dry_run_balance: Decimal,

    // Sources
    pub signal_feed_url: Option<String>,
    pub trade_monitor_interval: Duration,
    pub signal_monitor_interval: Duration,
    pub max_events_per_cycle: usize,
    pub fetch_limit: usize,
    pub stranded_grace: Duration,

    // Queue
    pub worker_concurrency: usize,
    pub job_max_attempts: u32,
    pub job_lease: Duration,
    pub job_retry_base_delay: Duration,
    pub job_retry_max_delay: Duration,
    pub worker_idle_wait: Duration,
    /// How long done and dead jobs are kept before purging.
    pub job_retention: Duration,
    pub job_purge_interval: Duration,

    // Execution
    pub venue_retry_enabled: bool,
    pub venue_retry_base_delay: Duration,
    pub venue_retry_max_delay: Duration,
    pub settlement_poll_interval: Duration,
    pub settlement_timeout: Duration,

    // Redemption
    pub redemption_interval: Duration,
    pub redemption_item_delay: Duration,
    pub redemption_max_attempts: i32,
    pub redemption_batch_size: i64,
    pub redeem_when_status_unknown: bool,

    // Caches
    pub market_cache_ttl: Duration,
    pub wallet_session_ttl: Duration,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let monitor = MonitorSettings::default();
        let redemption = RedemptionSettings::default();
        let retry = RetryPolicy::default();
        let executor = ExecutorSettings::default();

        Ok(Self {
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.is_empty()),
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            log_json: env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),

            private_key: env::var("PRIVATE_KEY").ok().filter(|s| !s.is_empty()),
            owner_id: env::var("OWNER_ID").unwrap_or_else(|_| "default".into()),
            polygon_rpc_url: env::var("POLYGON_RPC_URL")
                .unwrap_or_else(|_| DEFAULT_POLYGON_RPC.into()),
            dry_run: parse_or("DRY_RUN", false),
            dry_run_balance: parse_or("DRY_RUN_BALANCE", Decimal::from(1_000)),

            signal_feed_url: env::var("SIGNAL_FEED_URL").ok().filter(|s| !s.is_empty()),
            trade_monitor_interval: secs_or("TRADE_MONITOR_INTERVAL_SECS", monitor.interval),
            signal_monitor_interval: secs_or("SIGNAL_MONITOR_INTERVAL_SECS", monitor.interval),
            max_events_per_cycle: parse_or("MAX_EVENTS_PER_CYCLE", monitor.max_events_per_cycle),
            fetch_limit: parse_or("FETCH_LIMIT", monitor.fetch_limit),
            stranded_grace: secs_or("STRANDED_GRACE_SECS", monitor.stranded_grace),

            worker_concurrency: parse_or("WORKER_CONCURRENCY", 5usize).max(1),
            job_max_attempts: parse_or("JOB_MAX_ATTEMPTS", retry.max_attempts).max(1),
            job_lease: secs_or("JOB_LEASE_SECS", Duration::from_secs(300)),
            job_retry_base_delay: secs_or("JOB_RETRY_BASE_DELAY_SECS", retry.base_delay),
            job_retry_max_delay: secs_or("JOB_RETRY_MAX_DELAY_SECS", retry.max_delay),
            worker_idle_wait: millis_or("WORKER_IDLE_WAIT_MS", Duration::from_millis(500)),
            job_retention: secs_or("JOB_RETENTION_SECS", Duration::from_secs(24 * 3_600)),
            job_purge_interval: secs_or("JOB_PURGE_INTERVAL_SECS", Duration::from_secs(3_600)),

            venue_retry_enabled: parse_or("VENUE_RETRY_ENABLED", executor.venue_retry_enabled),
            venue_retry_base_delay: secs_or("VENUE_RETRY_BASE_DELAY_SECS", executor.retry_base_delay),
            venue_retry_max_delay: secs_or("VENUE_RETRY_MAX_DELAY_SECS", executor.retry_max_delay),
            settlement_poll_interval: secs_or("SETTLEMENT_POLL_INTERVAL_SECS", Duration::from_secs(5)),
            settlement_timeout: secs_or("SETTLEMENT_TIMEOUT_SECS", Duration::from_secs(300)),

            redemption_interval: secs_or("REDEMPTION_INTERVAL_SECS", redemption.interval),
            redemption_item_delay: secs_or("REDEMPTION_ITEM_DELAY_SECS", redemption.item_delay),
            redemption_max_attempts: parse_or("REDEMPTION_MAX_ATTEMPTS", redemption.max_attempts),
            redemption_batch_size: parse_or("REDEMPTION_BATCH_SIZE", redemption.batch_size),
            redeem_when_status_unknown: parse_or(
                "REDEEM_WHEN_STATUS_UNKNOWN",
                redemption.redeem_when_status_unknown,
            ),

            market_cache_ttl: secs_or("MARKET_CACHE_TTL_SECS", Duration::from_secs(60)),
            wallet_session_ttl: secs_or("WALLET_SESSION_TTL_SECS", Duration::from_secs(3_600)),
        })
    }

    /// True when orders go to the live venue.
    pub fn is_live(&self) -> bool {
        self.private_key.is_some() && !self.dry_run
    }

    pub fn monitor_settings(&self, interval: Duration) -> MonitorSettings {
        MonitorSettings {
            interval,
            max_events_per_cycle: self.max_events_per_cycle,
            fetch_limit: self.fetch_limit,
            stranded_grace: self.stranded_grace,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.job_max_attempts,
            base_delay: self.job_retry_base_delay,
            max_delay: self.job_retry_max_delay,
        }
    }

    pub fn executor_settings(&self) -> ExecutorSettings {
        ExecutorSettings {
            venue_retry_enabled: self.venue_retry_enabled,
            retry_base_delay: self.venue_retry_base_delay,
            retry_max_delay: self.venue_retry_max_delay,
        }
    }

    pub fn redemption_settings(&self) -> RedemptionSettings {
        RedemptionSettings {
            interval: self.redemption_interval,
            item_delay: self.redemption_item_delay,
            max_attempts: self.redemption_max_attempts,
            batch_size: self.redemption_batch_size,
            redeem_when_status_unknown: self.redeem_when_status_unknown,
        }
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn secs_or(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn millis_or(key: &str, default: Duration) -> Duration {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_helpers_fall_back_on_missing_or_invalid() {
        assert_eq!(parse_or("POLYCOPY_TEST_UNSET_KEY", 7u32), 7);
        assert_eq!(
            secs_or("POLYCOPY_TEST_UNSET_KEY", Duration::from_secs(3)),
            Duration::from_secs(3)
        );

        env::set_var("POLYCOPY_TEST_BAD_NUMBER", "abc");
        assert_eq!(parse_or("POLYCOPY_TEST_BAD_NUMBER", 5usize), 5);

        env::set_var("POLYCOPY_TEST_SECS", "12");
        assert_eq!(
            secs_or("POLYCOPY_TEST_SECS", Duration::ZERO),
            Duration::from_secs(12)
        );
        assert_eq!(
            millis_or("POLYCOPY_TEST_SECS", Duration::ZERO),
            Duration::from_millis(12)
        );
    }

    #[test]
    fn test_settings_projection() {
        let cfg = AppConfig::from_env().unwrap();
        let retry = cfg.retry_policy();
        assert!(retry.max_attempts >= 1);
        assert_eq!(cfg.redemption_settings().max_attempts, cfg.redemption_max_attempts);
        assert_eq!(cfg.monitor_settings(Duration::from_secs(9)).interval, Duration::from_secs(9));
        if env::var("WORKER_CONCURRENCY").is_err() {
            assert_eq!(cfg.worker_concurrency, 5);
        }
        assert!(cfg.job_retention > Duration::ZERO);
    }
}
