use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use metrics::counter;
use tokio::time::MissedTickBehavior;

use crate::db::CopyStore;
use crate::external::{MarketRef, MarketStatusSource, RedemptionVenue};
use crate::models::{CopyRecord, Resolution};

#[derive(Debug, Clone)]
pub struct RedemptionSettings {
    pub interval: Duration,
    /// Pause between candidates within one scan.
    pub item_delay: Duration,
    /// Redemption attempts before a failed record stops being retried.
    pub max_attempts: i32,
    pub batch_size: i64,
    /// Redeem when the market lookup fails. The on-chain call reverts for an
    /// unresolved condition, so a wrong guess costs one failed attempt.
    pub redeem_when_status_unknown: bool,
}

impl Default for RedemptionSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            item_delay: Duration::from_secs(2),
            max_attempts: 5,
            batch_size: 100,
            redeem_when_status_unknown: true,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub candidates: usize,
    pub redeemed: usize,
    pub failed: usize,
    pub unresolved: usize,
    pub orphaned: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ItemOutcome {
    Redeemed(String),
    Failed,
    Unresolved,
    Orphaned,
}

/// Periodically redeems winning (and burns losing) positions of settled
/// buy copies once their market has resolved.
pub struct RedemptionScanner {
    store: Arc<dyn CopyStore>,
    markets: Arc<dyn MarketStatusSource>,
    redeemer: Arc<dyn RedemptionVenue>,
    settings: RedemptionSettings,
}

impl RedemptionScanner {
    pub fn new(
        store: Arc<dyn CopyStore>,
        markets: Arc<dyn MarketStatusSource>,
        redeemer: Arc<dyn RedemptionVenue>,
        settings: RedemptionSettings,
    ) -> Self {
        Self {
            store,
            markets,
            redeemer,
            settings,
        }
    }

    pub async fn run(self) {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            max_attempts = self.settings.max_attempts,
            "Redemption scanner started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match self.run_scan().await {
                Ok(report) if report.redeemed > 0 || report.failed > 0 => {
                    tracing::info!(?report, "Redemption scan complete");
                }
                Ok(report) => tracing::debug!(?report, "Redemption scan complete"),
                Err(e) => tracing::error!(error = %e, "Redemption scan failed"),
            }
        }
    }

    /// One serial pass over the current candidates.
    pub async fn run_scan(&self) -> anyhow::Result<ScanReport> {
        let candidates = self
            .store
            .list_redemption_candidates(self.settings.max_attempts, self.settings.batch_size)
            .await?;

        let mut report = ScanReport {
            candidates: candidates.len(),
            ..Default::default()
        };
        // One on-chain redeem covers every record of the same owner and market.
        let mut redeemed_markets: HashMap<(String, String), String> = HashMap::new();

        for (i, record) in candidates.iter().enumerate() {
            if i > 0 && !self.settings.item_delay.is_zero() {
                tokio::time::sleep(self.settings.item_delay).await;
            }

            match self.process_record(record, &mut redeemed_markets).await {
                Ok(ItemOutcome::Redeemed(_)) => report.redeemed += 1,
                Ok(ItemOutcome::Failed) => report.failed += 1,
                Ok(ItemOutcome::Unresolved) => report.unresolved += 1,
                Ok(ItemOutcome::Orphaned) => report.orphaned += 1,
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(record_id = %record.id, error = %e, "Redemption: record failed");
                }
            }
        }

        Ok(report)
    }

    async fn process_record(
        &self,
        record: &CopyRecord,
        redeemed_markets: &mut HashMap<(String, String), String>,
    ) -> anyhow::Result<ItemOutcome> {
        let market = MarketRef::new(&record.market_id, record.market_slug.as_deref());

        match self.markets.lookup(&market).await {
            Ok(state) if state.resolved => {
                if let (Some(winner), None) = (state.winning_outcome, record.resolved_at) {
                    let resolution = Resolution::for_record(record, winner, Utc::now());
                    self.store.record_resolution(record.id, &resolution).await?;
                    tracing::info!(
                        record_id = %record.id,
                        winning_outcome = winner,
                        pnl = %resolution.pnl,
                        "Redemption: market resolved"
                    );
                }
            }
            Ok(_) => return Ok(ItemOutcome::Unresolved),
            Err(e) if self.settings.redeem_when_status_unknown => {
                tracing::debug!(
                    record_id = %record.id,
                    market = %record.market_id,
                    error = %e,
                    "Redemption: market status unknown, attempting redeem"
                );
            }
            Err(e) => {
                tracing::debug!(record_id = %record.id, error = %e, "Redemption: market status unknown, skipping");
                return Ok(ItemOutcome::Unresolved);
            }
        }

        let Some(config_id) = record.config_id else {
            tracing::warn!(record_id = %record.id, "Redemption: config deleted, owner unknown");
            return Ok(ItemOutcome::Orphaned);
        };
        let Some(config) = self.store.get_config(config_id).await? else {
            return Ok(ItemOutcome::Orphaned);
        };

        if !self.store.begin_redemption(record.id).await? {
            return Ok(ItemOutcome::Unresolved);
        }

        let key = (config.owner.clone(), record.market_id.clone());
        if let Some(tx_hash) = redeemed_markets.get(&key) {
            self.store.mark_redeemed(record.id, tx_hash).await?;
            counter!("redemptions_succeeded").increment(1);
            return Ok(ItemOutcome::Redeemed(tx_hash.clone()));
        }

        match self.redeemer.redeem(&config.owner, &record.market_id).await {
            Ok(receipt) => {
                self.store.mark_redeemed(record.id, &receipt.tx_hash).await?;
                counter!("redemptions_succeeded").increment(1);
                tracing::info!(
                    record_id = %record.id,
                    market = %record.market_id,
                    tx_hash = %receipt.tx_hash,
                    "Redemption: positions redeemed"
                );
                redeemed_markets.insert(key, receipt.tx_hash.clone());
                Ok(ItemOutcome::Redeemed(receipt.tx_hash))
            }
            Err(e) => {
                let message = e.to_string();
                self.store.mark_redemption_failed(record.id, &message).await?;
                counter!("redemptions_failed").increment(1);
                tracing::warn!(
                    record_id = %record.id,
                    market = %record.market_id,
                    attempt = record.redemption_attempts + 1,
                    error = %message,
                    "Redemption: redeem failed, will retry"
                );
                Ok(ItemOutcome::Failed)
            }
        }
    }
}
