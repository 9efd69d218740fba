#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::Mutex;
use uuid::Uuid;

use polycopy::db::{CopyStore, MemoryStore};
use polycopy::errors::ClassifiedFailure;
use polycopy::execution::{CopyExecutor, ExecutorSettings};
use polycopy::external::{
    ActivitySource, BalanceService, ExecutionVenue, MarketRef, MarketState, MarketStatusSource,
    OrderRequest, OrderState, RedemptionReceipt, RedemptionVenue, VenueError,
};
use polycopy::models::{
    ClaimedJob, CopyConfig, CopyRecord, CopySizing, ExecutionJob, NewCopyConfig, NewCopyRecord,
    OrderSubmission, RecordStatus, RecordWithConfig, Resolution, Settlement, Side, SourceEvent,
    SourceKind, SourceSelector,
};
use polycopy::queue::{EnqueueOutcome, JobQueue, QueueError};
use polycopy::services::SettlementMonitor;

pub const OWNER: &str = "0xowner";
pub const TRADER: &str = "0xtrader";
pub const MARKET: &str = "0xmarket";
pub const ASSET: &str = "1001";

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

pub fn open_market() -> MarketState {
    MarketState {
        accepting_orders: true,
        closed: false,
        resolved: false,
        winning_outcome: None,
        category: Some("sports".into()),
    }
}

pub fn resolved_market(winner: i32) -> MarketState {
    MarketState {
        accepting_orders: false,
        closed: true,
        resolved: true,
        winning_outcome: Some(winner),
        category: Some("sports".into()),
    }
}

/// A source event a few seconds in the future so it always postdates the
/// config it is matched against.
pub fn event(id: &str, side: Side, amount: i64, price: Decimal) -> SourceEvent {
    event_at(id, side, amount, price, Utc::now() + chrono::Duration::seconds(5))
}

pub fn event_at(
    id: &str,
    side: Side,
    amount: i64,
    price: Decimal,
    timestamp: DateTime<Utc>,
) -> SourceEvent {
    let amount = Decimal::from(amount);
    SourceEvent {
        event_id: id.to_string(),
        market_id: MARKET.to_string(),
        market_slug: None,
        asset_id: ASSET.to_string(),
        outcome_index: 0,
        side,
        amount,
        price,
        shares: Some(amount / price),
        tx_hash: None,
        category: None,
        timestamp,
    }
}

pub fn half() -> Decimal {
    Decimal::new(50, 2)
}

pub async fn trader_config(store: &MemoryStore, amount: i64) -> CopyConfig {
    store
        .create_config(NewCopyConfig::trader(OWNER, TRADER, Decimal::from(amount)))
        .await
        .expect("create config")
}

pub async fn config_with(
    store: &MemoryStore,
    f: impl FnOnce(&mut NewCopyConfig),
) -> CopyConfig {
    let mut new = NewCopyConfig::trader(OWNER, TRADER, Decimal::from(10));
    f(&mut new);
    store.create_config(new).await.expect("create config")
}

pub fn signal_selector(categories: &[&str]) -> SourceSelector {
    SourceSelector::Signals {
        categories: categories.iter().map(|c| c.to_string()).collect(),
    }
}

// ---------------------------------------------------------------------------
// Activity source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeSource {
    events: Mutex<Vec<SourceEvent>>,
    fail: AtomicBool,
    pub fetches: AtomicUsize,
}

impl FakeSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn push(&self, event: SourceEvent) {
        self.events.lock().await.push(event);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ActivitySource for FakeSource {
    async fn fetch(
        &self,
        _selector: &SourceSelector,
        since: DateTime<Utc>,
        limit: usize,
    ) -> anyhow::Result<Vec<SourceEvent>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("activity feed unreachable");
        }
        let mut events: Vec<SourceEvent> = self
            .events
            .lock()
            .await
            .iter()
            .filter(|e| e.timestamp > since)
            .cloned()
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        events.truncate(limit);
        Ok(events)
    }
}

// ---------------------------------------------------------------------------
// Market status
// ---------------------------------------------------------------------------

pub struct FakeMarkets {
    states: Mutex<HashMap<String, MarketState>>,
    default: MarketState,
    fail: AtomicBool,
    pub lookups: AtomicUsize,
}

impl FakeMarkets {
    pub fn open() -> Arc<Self> {
        Self::with_default(open_market())
    }

    pub fn with_default(default: MarketState) -> Arc<Self> {
        Arc::new(Self {
            states: Mutex::new(HashMap::new()),
            default,
            fail: AtomicBool::new(false),
            lookups: AtomicUsize::new(0),
        })
    }

    pub async fn set(&self, market_id: &str, state: MarketState) {
        self.states.lock().await.insert(market_id.to_string(), state);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl MarketStatusSource for FakeMarkets {
    async fn lookup(&self, market: &MarketRef) -> anyhow::Result<MarketState> {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("gamma unavailable");
        }
        Ok(self
            .states
            .lock()
            .await
            .get(&market.market_id)
            .cloned()
            .unwrap_or_else(|| self.default.clone()))
    }
}

// ---------------------------------------------------------------------------
// Execution venue
// ---------------------------------------------------------------------------

pub enum Scripted {
    Accept,
    Reject(&'static str),
    Transport(&'static str),
}

pub struct FakeVenue {
    script: Mutex<VecDeque<Scripted>>,
    statuses: Mutex<HashMap<String, OrderState>>,
    /// Status reported for orders without an explicit one.
    default_status: Mutex<OrderState>,
    pub submitted: Mutex<Vec<OrderRequest>>,
    next_id: AtomicUsize,
}

impl FakeVenue {
    /// Accepts every order; orders report matched at the reference price.
    pub fn filling() -> Arc<Self> {
        Self::with_default_status(OrderState::Matched {
            price: half(),
            shares: Decimal::from(20),
            tx_hash: Some("0xfill".into()),
        })
    }

    pub fn with_default_status(status: OrderState) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            statuses: Mutex::new(HashMap::new()),
            default_status: Mutex::new(status),
            submitted: Mutex::new(Vec::new()),
            next_id: AtomicUsize::new(1),
        })
    }

    /// Queue outcomes for the next submissions; once drained, orders are accepted.
    pub async fn script(&self, outcomes: Vec<Scripted>) {
        self.script.lock().await.extend(outcomes);
    }

    pub async fn set_status(&self, order_id: &str, status: OrderState) {
        self.statuses.lock().await.insert(order_id.to_string(), status);
    }

    pub async fn submission_count(&self) -> usize {
        self.submitted.lock().await.len()
    }

    async fn submit(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        self.submitted.lock().await.push(order.clone());
        let next = self.script.lock().await.pop_front().unwrap_or(Scripted::Accept);
        match next {
            Scripted::Accept => {
                let n = self.next_id.fetch_add(1, Ordering::SeqCst);
                Ok(OrderSubmission {
                    order_id: format!("order-{n}"),
                    status: "live".into(),
                    tx_hash: None,
                })
            }
            Scripted::Reject(msg) => Err(VenueError::Rejected(msg.into())),
            Scripted::Transport(msg) => Err(VenueError::Transport(msg.into())),
        }
    }
}

#[async_trait]
impl ExecutionVenue for FakeVenue {
    async fn submit_buy(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        self.submit(order).await
    }

    async fn submit_sell(&self, order: &OrderRequest) -> Result<OrderSubmission, VenueError> {
        self.submit(order).await
    }

    async fn order_status(&self, _owner: &str, order_id: &str) -> Result<OrderState, VenueError> {
        if let Some(status) = self.statuses.lock().await.get(order_id) {
            return Ok(status.clone());
        }
        Ok(self.default_status.lock().await.clone())
    }
}

// ---------------------------------------------------------------------------
// Balances
// ---------------------------------------------------------------------------

pub struct FakeBalances {
    collateral: Mutex<Decimal>,
    tokens: Mutex<HashMap<String, Decimal>>,
    fail: AtomicBool,
}

impl FakeBalances {
    pub fn with_collateral(amount: i64) -> Arc<Self> {
        Arc::new(Self {
            collateral: Mutex::new(Decimal::from(amount)),
            tokens: Mutex::new(HashMap::new()),
            fail: AtomicBool::new(false),
        })
    }

    pub async fn set_tokens(&self, asset_id: &str, shares: Decimal) {
        self.tokens.lock().await.insert(asset_id.to_string(), shares);
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl BalanceService for FakeBalances {
    async fn collateral_balance(&self, _owner: &str) -> Result<Decimal, VenueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VenueError::Transport("balance endpoint timed out".into()));
        }
        Ok(*self.collateral.lock().await)
    }

    async fn outcome_token_balance(
        &self,
        _owner: &str,
        _market_id: &str,
        asset_id: &str,
    ) -> Result<Decimal, VenueError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(VenueError::Transport("balance endpoint timed out".into()));
        }
        Ok(self
            .tokens
            .lock()
            .await
            .get(asset_id)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }
}

// ---------------------------------------------------------------------------
// Redemption
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRedeemer {
    pub calls: Mutex<Vec<(String, String)>>,
    fail: AtomicBool,
}

impl FakeRedeemer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub async fn call_count(&self) -> usize {
        self.calls.lock().await.len()
    }
}

#[async_trait]
impl RedemptionVenue for FakeRedeemer {
    async fn redeem(&self, owner: &str, market_id: &str) -> Result<RedemptionReceipt, VenueError> {
        let mut calls = self.calls.lock().await;
        calls.push((owner.to_string(), market_id.to_string()));
        if self.fail.load(Ordering::SeqCst) {
            return Err(VenueError::Rejected("execution reverted: result for condition not received yet".into()));
        }
        Ok(RedemptionReceipt {
            tx_hash: format!("0xredeem{}", calls.len()),
        })
    }
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// A broker that is down.
pub struct UnavailableQueue;

#[async_trait]
impl JobQueue for UnavailableQueue {
    async fn enqueue(&self, _job: &ExecutionJob) -> Result<EnqueueOutcome, QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn claim(&self) -> Result<Option<ClaimedJob>, QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn ack(&self, _job_id: &str) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn retry_later(&self, _job_id: &str, _delay: Duration, _error: &str) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn dead_letter(&self, _job_id: &str, _error: &str) -> Result<(), QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }

    async fn purge_finished(&self, _older_than: Duration) -> Result<u64, QueueError> {
        Err(QueueError::Unavailable("connection refused".into()))
    }
}

/// A `MemoryStore` whose writes around submission can be made to fail.
pub struct FlakyStore {
    pub inner: Arc<MemoryStore>,
    mark_submitted_failures: AtomicUsize,
    fail_claim: AtomicBool,
    fail_release: AtomicBool,
}

impl FlakyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Arc<Self> {
        Arc::new(Self {
            inner,
            mark_submitted_failures: AtomicUsize::new(0),
            fail_claim: AtomicBool::new(false),
            fail_release: AtomicBool::new(false),
        })
    }

    /// Fail the next `n` calls to `mark_submitted`.
    pub fn fail_mark_submitted(&self, n: usize) {
        self.mark_submitted_failures.store(n, Ordering::SeqCst);
    }

    pub fn set_claim_failing(&self, fail: bool) {
        self.fail_claim.store(fail, Ordering::SeqCst);
    }

    pub fn set_release_failing(&self, fail: bool) {
        self.fail_release.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl CopyStore for FlakyStore {
    async fn ping(&self) -> anyhow::Result<()> {
        self.inner.ping().await
    }

    async fn create_config(&self, new: NewCopyConfig) -> anyhow::Result<CopyConfig> {
        self.inner.create_config(new).await
    }

    async fn get_config(&self, id: Uuid) -> anyhow::Result<Option<CopyConfig>> {
        self.inner.get_config(id).await
    }

    async fn list_monitored_configs(&self, kind: SourceKind) -> anyhow::Result<Vec<CopyConfig>> {
        self.inner.list_monitored_configs(kind).await
    }

    async fn pause_config(&self, id: Uuid) -> anyhow::Result<bool> {
        self.inner.pause_config(id).await
    }

    async fn reset_daily_counter(
        &self,
        id: Uuid,
        expected_last_reset: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        self.inner.reset_daily_counter(id, expected_last_reset, now).await
    }

    async fn reserve_buy_slot(&self, id: Uuid, now: DateTime<Utc>) -> anyhow::Result<bool> {
        self.inner.reserve_buy_slot(id, now).await
    }

    async fn release_buy_slot(&self, id: Uuid) -> anyhow::Result<()> {
        if self.fail_release.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset while releasing slot");
        }
        self.inner.release_buy_slot(id).await
    }

    async fn delete_config(&self, id: Uuid) -> anyhow::Result<()> {
        self.inner.delete_config(id).await
    }

    async fn recorded_event_ids(
        &self,
        config_id: Uuid,
        event_ids: &[String],
    ) -> anyhow::Result<HashSet<String>> {
        self.inner.recorded_event_ids(config_id, event_ids).await
    }

    async fn insert_record(&self, new: NewCopyRecord) -> anyhow::Result<Option<CopyRecord>> {
        self.inner.insert_record(new).await
    }

    async fn get_record(&self, id: Uuid) -> anyhow::Result<Option<CopyRecord>> {
        self.inner.get_record(id).await
    }

    async fn get_record_with_config(&self, id: Uuid) -> anyhow::Result<Option<RecordWithConfig>> {
        self.inner.get_record_with_config(id).await
    }

    async fn list_records_by_status(
        &self,
        status: RecordStatus,
        limit: i64,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        self.inner.list_records_by_status(status, limit).await
    }

    async fn list_stranded_records(
        &self,
        config_id: Uuid,
        older_than: DateTime<Utc>,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        self.inner.list_stranded_records(config_id, older_than).await
    }

    async fn save_sizing(&self, id: Uuid, sizing: &CopySizing) -> anyhow::Result<()> {
        self.inner.save_sizing(id, sizing).await
    }

    async fn claim_submission(&self, id: Uuid) -> anyhow::Result<bool> {
        if self.fail_claim.load(Ordering::SeqCst) {
            anyhow::bail!("connection reset while claiming");
        }
        self.inner.claim_submission(id).await
    }

    async fn mark_skipped(&self, id: Uuid, reason: &str) -> anyhow::Result<bool> {
        self.inner.mark_skipped(id, reason).await
    }

    async fn mark_failed(&self, id: Uuid, failure: &ClassifiedFailure) -> anyhow::Result<bool> {
        self.inner.mark_failed(id, failure).await
    }

    async fn mark_submitted(&self, id: Uuid, submission: &OrderSubmission) -> anyhow::Result<bool> {
        let remaining = self.mark_submitted_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.mark_submitted_failures.store(remaining - 1, Ordering::SeqCst);
            anyhow::bail!("connection reset while recording submission");
        }
        self.inner.mark_submitted(id, submission).await
    }

    async fn mark_settled(&self, id: Uuid, settlement: &Settlement) -> anyhow::Result<bool> {
        self.inner.mark_settled(id, settlement).await
    }

    async fn list_redemption_candidates(
        &self,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<CopyRecord>> {
        self.inner.list_redemption_candidates(max_attempts, limit).await
    }

    async fn record_resolution(&self, id: Uuid, resolution: &Resolution) -> anyhow::Result<()> {
        self.inner.record_resolution(id, resolution).await
    }

    async fn begin_redemption(&self, id: Uuid) -> anyhow::Result<bool> {
        self.inner.begin_redemption(id).await
    }

    async fn mark_redeemed(&self, id: Uuid, tx_hash: &str) -> anyhow::Result<()> {
        self.inner.mark_redeemed(id, tx_hash).await
    }

    async fn mark_redemption_failed(&self, id: Uuid, error: &str) -> anyhow::Result<()> {
        self.inner.mark_redemption_failed(id, error).await
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

pub fn settlement(store: Arc<MemoryStore>, venue: Arc<FakeVenue>) -> SettlementMonitor {
    SettlementMonitor::new(
        store,
        venue,
        Duration::from_millis(10),
        Duration::from_millis(200),
    )
}

pub fn executor(
    store: Arc<MemoryStore>,
    venue: Arc<FakeVenue>,
    balances: Arc<FakeBalances>,
    settings: ExecutorSettings,
) -> CopyExecutor {
    let monitor = settlement(store.clone(), venue.clone());
    CopyExecutor::new(store, venue, balances, monitor, settings)
}

/// An executor over any store, e.g. a `FlakyStore`.
pub fn executor_over(
    store: Arc<dyn CopyStore>,
    venue: Arc<FakeVenue>,
    balances: Arc<FakeBalances>,
) -> CopyExecutor {
    let monitor = SettlementMonitor::new(
        store.clone(),
        venue.clone(),
        Duration::from_millis(10),
        Duration::from_millis(200),
    );
    CopyExecutor::new(store, venue, balances, monitor, ExecutorSettings::default())
}

pub fn fast_retries() -> ExecutorSettings {
    ExecutorSettings {
        venue_retry_enabled: true,
        retry_base_delay: Duration::from_millis(1),
        retry_max_delay: Duration::from_millis(5),
    }
}

/// Poll `check` until it holds or two seconds pass.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
