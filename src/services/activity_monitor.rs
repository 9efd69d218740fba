use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use metrics::{counter, histogram};
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use uuid::Uuid;

use crate::db::CopyStore;
use crate::execution::position_sizer::{calculate_size, validate_policy, OriginalTrade};
use crate::external::{ActivitySource, BalanceService, MarketRef, MarketState, MarketStatusSource};
use crate::models::{CopyConfig, CopyRecord, ExecutionJob, NewCopyRecord, Side, SourceEvent, SourceKind};
use crate::queue::{EnqueueOutcome, JobQueue};

#[derive(Debug, Clone)]
pub struct MonitorSettings {
    pub interval: Duration,
    /// Events turned into records per config per cycle; the rest wait.
    pub max_events_per_cycle: usize,
    /// Page size asked of the activity source.
    pub fetch_limit: usize,
    /// Age after which a pending, unclaimed record is re-enqueued.
    pub stranded_grace: Duration,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_events_per_cycle: 10,
            fetch_limit: 100,
            stranded_grace: Duration::from_secs(120),
        }
    }
}

/// Tally of one monitor cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CycleReport {
    pub configs: usize,
    pub events_seen: usize,
    pub records_created: usize,
    pub skipped: usize,
    pub enqueued: usize,
    pub not_queued: usize,
    pub deferred: usize,
    pub recovered: usize,
    pub paused: usize,
    pub errors: usize,
}

impl CycleReport {
    fn absorb(&mut self, other: CycleReport) {
        self.events_seen += other.events_seen;
        self.records_created += other.records_created;
        self.skipped += other.skipped;
        self.enqueued += other.enqueued;
        self.not_queued += other.not_queued;
        self.deferred += other.deferred;
        self.recovered += other.recovered;
        self.paused += other.paused;
        self.errors += other.errors;
    }
}

/// Watches one activity source and turns new events into pending copy
/// records plus execution jobs.
///
/// Each tick runs in its own task, so a slow cycle can overlap the next.
/// That is safe because a record is unique per (config, event) and every
/// config mutation is a compare-and-set.
/// Pages fetched per config per cycle while catching up on handled events.
const MAX_PAGES_PER_CYCLE: usize = 10;

/// Failed attempts after which an event is recorded as skipped.
const MAX_EVENT_ATTEMPTS: u32 = 5;

#[derive(Default)]
struct IngestState {
    watermarks: HashMap<Uuid, DateTime<Utc>>,
    failures: HashMap<(Uuid, String), u32>,
}

#[derive(Clone)]
pub struct ActivityMonitor {
    kind: SourceKind,
    store: Arc<dyn CopyStore>,
    source: Arc<dyn ActivitySource>,
    markets: Arc<dyn MarketStatusSource>,
    balances: Arc<dyn BalanceService>,
    queue: Arc<dyn JobQueue>,
    settings: MonitorSettings,
    ingest: Arc<Mutex<IngestState>>,
}

impl ActivityMonitor {
    pub fn new(
        kind: SourceKind,
        store: Arc<dyn CopyStore>,
        source: Arc<dyn ActivitySource>,
        markets: Arc<dyn MarketStatusSource>,
        balances: Arc<dyn BalanceService>,
        queue: Arc<dyn JobQueue>,
        settings: MonitorSettings,
    ) -> Self {
        Self {
            kind,
            store,
            source,
            markets,
            balances,
            queue,
            settings,
            ingest: Arc::new(Mutex::new(IngestState::default())),
        }
    }

    /// Tick forever, one detached cycle per tick.
    pub async fn run(self) {
        tracing::info!(
            kind = %self.kind,
            interval_secs = self.settings.interval.as_secs(),
            max_events = self.settings.max_events_per_cycle,
            "Activity monitor started"
        );

        let mut ticker = tokio::time::interval(self.settings.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            let monitor = self.clone();
            tokio::spawn(async move {
                match monitor.run_cycle().await {
                    Ok(report) if report.records_created > 0 || report.errors > 0 => {
                        tracing::info!(kind = %monitor.kind, ?report, "Monitor cycle complete");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::error!(kind = %monitor.kind, error = %e, "Monitor cycle failed");
                    }
                }
            });
        }
    }

    /// One pass over every monitored config. A failing config is logged and
    /// counted; the others still run.
    pub async fn run_cycle(&self) -> anyhow::Result<CycleReport> {
        let started = Instant::now();
        let configs = self.store.list_monitored_configs(self.kind).await?;

        let mut report = CycleReport {
            configs: configs.len(),
            ..Default::default()
        };

        for config in &configs {
            match self.process_config(config, Utc::now()).await {
                Ok(r) => report.absorb(r),
                Err(e) => {
                    report.errors += 1;
                    tracing::error!(
                        config_id = %config.id,
                        kind = %self.kind,
                        error = %e,
                        "Monitor: config cycle failed"
                    );
                }
            }
        }

        histogram!("monitor_cycle_seconds", "kind" => self.kind.as_str())
            .record(started.elapsed().as_secs_f64());
        Ok(report)
    }

    async fn process_config(
        &self,
        config: &CopyConfig,
        now: DateTime<Utc>,
    ) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();

        if config.duration_expired(now) {
            if self.store.pause_config(config.id).await? {
                report.paused += 1;
                tracing::info!(
                    config_id = %config.id,
                    duration_days = config.duration_days.unwrap_or_default(),
                    "Monitor: copy duration elapsed, config paused"
                );
            }
            return Ok(report);
        }

        if config.quota_window_elapsed(now)
            && self
                .store
                .reset_daily_counter(config.id, config.last_reset_date, now)
                .await?
        {
            tracing::debug!(config_id = %config.id, "Monitor: daily buy counter reset");
        }

        report.recovered = self.recover_stranded(config, now).await?;

        let mut since = self.watermark(config).await;
        for _ in 0..MAX_PAGES_PER_CYCLE {
            let events = self
                .source
                .fetch(&config.source, since, self.settings.fetch_limit)
                .await?;
            report.events_seen += events.len();
            if events.is_empty() {
                break;
            }
            let page_full = events.len() >= self.settings.fetch_limit;

            let ids: Vec<String> = events.iter().map(|e| e.event_id.clone()).collect();
            let mut done = self.store.recorded_event_ids(config.id, &ids).await?;

            let mut candidates: Vec<SourceEvent> = Vec::new();
            for event in &events {
                if done.contains(&event.event_id) {
                    continue;
                }
                let wanted = event.timestamp > config.created_at
                    && match event.side {
                        Side::Buy => config.copy_buys,
                        Side::Sell => config.copy_sells,
                    };
                if wanted {
                    candidates.push(event.clone());
                } else {
                    done.insert(event.event_id.clone());
                }
            }

            if !candidates.is_empty() {
                counter!("copy_events_detected", "kind" => self.kind.as_str())
                    .increment(candidates.len() as u64);
            }

            candidates.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
            if candidates.len() > self.settings.max_events_per_cycle {
                report.deferred += candidates.len() - self.settings.max_events_per_cycle;
                candidates.truncate(self.settings.max_events_per_cycle);
            }

            let processed_any = !candidates.is_empty();
            let mut markets: HashMap<MarketRef, MarketState> = HashMap::new();
            for event in &candidates {
                match self.process_event(config, event, &mut markets).await {
                    Ok(r) => {
                        report.absorb(r);
                        done.insert(event.event_id.clone());
                        self.ingest
                            .lock()
                            .await
                            .failures
                            .remove(&(config.id, event.event_id.clone()));
                    }
                    Err(e) => match self.note_failure(config, event, &e).await {
                        Some(r) => {
                            report.absorb(r);
                            done.insert(event.event_id.clone());
                        }
                        None => {
                            report.deferred += 1;
                            tracing::warn!(
                                config_id = %config.id,
                                event_id = %event.event_id,
                                error = %e,
                                "Monitor: event deferred"
                            );
                        }
                    },
                }
            }

            let Some(next) = ingested_through(&events, &done) else {
                break;
            };
            self.advance_watermark(config.id, next).await;

            // Walk forward only over pages that were already fully handled,
            // so one cycle still touches at most `max_events_per_cycle`.
            if processed_any || !page_full || next <= since {
                break;
            }
            since = next;
        }

        Ok(report)
    }

    /// Fetch lower bound for a config: its creation time, or the newest
    /// timestamp below which every event has been handled.
    async fn watermark(&self, config: &CopyConfig) -> DateTime<Utc> {
        let ingest = self.ingest.lock().await;
        ingest
            .watermarks
            .get(&config.id)
            .copied()
            .map_or(config.created_at, |w| w.max(config.created_at))
    }

    async fn advance_watermark(&self, config_id: Uuid, to: DateTime<Utc>) {
        let mut ingest = self.ingest.lock().await;
        let entry = ingest.watermarks.entry(config_id).or_insert(to);
        if to > *entry {
            *entry = to;
        }
    }

    /// Count a failed attempt at an event. Once it has failed
    /// `MAX_EVENT_ATTEMPTS` times it is recorded as skipped so it stops
    /// holding the watermark back.
    async fn note_failure(
        &self,
        config: &CopyConfig,
        event: &SourceEvent,
        error: &anyhow::Error,
    ) -> Option<CycleReport> {
        let key = (config.id, event.event_id.clone());
        let attempts = {
            let mut ingest = self.ingest.lock().await;
            let attempts = ingest.failures.entry(key.clone()).or_insert(0);
            *attempts += 1;
            *attempts
        };
        if attempts < MAX_EVENT_ATTEMPTS {
            return None;
        }

        let reason = format!("gave up after {attempts} attempts: {error}");
        match self.record_skip(config, event, &reason).await {
            Ok(report) => {
                self.ingest.lock().await.failures.remove(&key);
                Some(report)
            }
            Err(e) => {
                tracing::warn!(
                    config_id = %config.id,
                    event_id = %event.event_id,
                    error = %e,
                    "Monitor: could not record abandoned event"
                );
                None
            }
        }
    }

    async fn process_event(
        &self,
        config: &CopyConfig,
        event: &SourceEvent,
        markets: &mut HashMap<MarketRef, MarketState>,
    ) -> anyhow::Result<CycleReport> {
        if let Err(err) = validate_policy(&config.amount_policy(), event.side) {
            return self.record_skip(config, event, &err.to_string()).await;
        }

        let market = MarketRef::new(&event.market_id, event.market_slug.as_deref());

        let has_allow_list = config
            .market_categories
            .as_ref()
            .map(|c| !c.is_empty())
            .unwrap_or(false);
        if has_allow_list {
            let category = match &event.category {
                Some(c) => Some(c.clone()),
                None => self.market_state(&market, markets).await?.category,
            };
            if !config.allows_category(category.as_deref()) {
                let reason = format!(
                    "market category {} not in allow-list",
                    category.as_deref().unwrap_or("unknown")
                );
                return self.record_skip(config, event, &reason).await;
            }
        }

        let state = self.market_state(&market, markets).await?;
        if !(state.accepting_orders && !state.closed) {
            return self
                .record_skip(config, event, "market closed or not accepting orders")
                .await;
        }

        if event.side == Side::Sell {
            let held = self
                .balances
                .outcome_token_balance(&config.owner, &event.market_id, &event.asset_id)
                .await?;
            let sizing = calculate_size(
                &config.amount_policy(),
                &OriginalTrade {
                    side: Side::Sell,
                    amount: event.amount,
                    price: event.price,
                    shares: event.shares,
                },
                held,
            );
            if !sizing.is_sufficient {
                let reason = format!(
                    "insufficient outcome token balance: need {} have {}",
                    sizing.shares, held
                );
                return self.record_skip(config, event, &reason).await;
            }
        }

        let mut report = CycleReport::default();
        let Some(record) = self
            .store
            .insert_record(NewCopyRecord::pending(config, event))
            .await?
        else {
            // An overlapping cycle got there first.
            return Ok(report);
        };

        report.records_created += 1;
        counter!("copy_records_created", "kind" => self.kind.as_str()).increment(1);
        tracing::info!(
            config_id = %config.id,
            record_id = %record.id,
            event = %event,
            "Monitor: copy record created"
        );

        match self.enqueue(config, &record).await {
            Some(_) => report.enqueued += 1,
            None => report.not_queued += 1,
        }
        Ok(report)
    }

    async fn market_state(
        &self,
        market: &MarketRef,
        cache: &mut HashMap<MarketRef, MarketState>,
    ) -> anyhow::Result<MarketState> {
        if let Some(state) = cache.get(market) {
            return Ok(state.clone());
        }
        let state = self.markets.lookup(market).await?;
        cache.insert(market.clone(), state.clone());
        Ok(state)
    }

    /// Write a skipped record so the event counts as processed.
    async fn record_skip(
        &self,
        config: &CopyConfig,
        event: &SourceEvent,
        reason: &str,
    ) -> anyhow::Result<CycleReport> {
        let mut report = CycleReport::default();
        if self
            .store
            .insert_record(NewCopyRecord::skipped(config, event, reason))
            .await?
            .is_some()
        {
            report.skipped += 1;
            counter!("records_skipped").increment(1);
            tracing::info!(
                config_id = %config.id,
                event_id = %event.event_id,
                reason,
                "Monitor: event skipped"
            );
        }
        Ok(report)
    }

    /// `None` when the queue is unreachable; the record stays pending and is
    /// picked up by stranded-record recovery.
    async fn enqueue(&self, config: &CopyConfig, record: &CopyRecord) -> Option<EnqueueOutcome> {
        let job = ExecutionJob::new(self.kind, record.id, config.id, &record.source_event_id);
        match self.queue.enqueue(&job).await {
            Ok(outcome @ EnqueueOutcome::Enqueued) => {
                counter!("jobs_enqueued").increment(1);
                Some(outcome)
            }
            Ok(outcome @ EnqueueOutcome::Duplicate) => {
                counter!("jobs_duplicate").increment(1);
                tracing::debug!(job_id = %job.id, "Monitor: job already queued");
                Some(outcome)
            }
            Err(e) => {
                tracing::warn!(
                    record_id = %record.id,
                    job_id = %job.id,
                    error = %e,
                    "Monitor: record created, not yet queued"
                );
                None
            }
        }
    }

    async fn recover_stranded(&self, config: &CopyConfig, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let grace = chrono::Duration::from_std(self.settings.stranded_grace)?;
        let stranded = self.store.list_stranded_records(config.id, now - grace).await?;

        let mut recovered = 0;
        for record in &stranded {
            if self.enqueue(config, record).await == Some(EnqueueOutcome::Enqueued) {
                recovered += 1;
            }
        }
        if recovered > 0 {
            tracing::info!(config_id = %config.id, count = recovered, "Monitor: re-enqueued stranded records");
        }
        Ok(recovered)
    }
}

/// Newest timestamp such that every event of the page at or before it has
/// been handled. Events sharing a timestamp with an unhandled one hold it
/// back.
fn ingested_through(events: &[SourceEvent], done: &HashSet<String>) -> Option<DateTime<Utc>> {
    let first_open = events
        .iter()
        .filter(|e| !done.contains(&e.event_id))
        .map(|e| e.timestamp)
        .min();
    events
        .iter()
        .map(|e| e.timestamp)
        .filter(|ts| first_open.map_or(true, |open| *ts < open))
        .max()
}
