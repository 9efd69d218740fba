mod common;

use std::sync::Arc;

use rust_decimal::Decimal;
use uuid::Uuid;

use polycopy::db::{CopyStore, MemoryStore};
use polycopy::errors::FailureReason;
use polycopy::execution::{ExecutionOutcome, ExecutorSettings};
use polycopy::external::OrderState;
use polycopy::models::{CopyConfig, CopyRecord, NewCopyRecord, RecordStatus, Side};

use common::{FakeBalances, FakeVenue, Scripted};

async fn pending_record(store: &MemoryStore, config: &CopyConfig, id: &str, side: Side) -> CopyRecord {
    let ev = common::event(id, side, 40, common::half());
    store
        .insert_record(NewCopyRecord::pending(config, &ev))
        .await
        .unwrap()
        .expect("fresh record")
}

async fn reload(store: &MemoryStore, id: Uuid) -> CopyRecord {
    store.get_record(id).await.unwrap().expect("record exists")
}

#[tokio::test]
async fn test_buy_is_sized_submitted_and_settled() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::filling();
    let balances = FakeBalances::with_collateral(100);
    let exec = common::executor(store.clone(), venue.clone(), balances, ExecutorSettings::default());

    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xbuy1", Side::Buy).await;

    let outcome = exec.execute(record.id).await.unwrap();
    let ExecutionOutcome::Submitted(submission) = outcome else {
        panic!("expected submission, got {outcome:?}");
    };

    let submitted = venue.submitted.lock().await.clone();
    assert_eq!(submitted.len(), 1);
    assert_eq!(submitted[0].amount, Decimal::from(10));
    assert_eq!(submitted[0].owner, common::OWNER);
    assert_eq!(submitted[0].slippage, config.slippage);

    let after = reload(&store, record.id).await;
    assert_eq!(after.copied_amount, Some(Decimal::from(10)));
    assert_eq!(after.copied_shares, Some(Decimal::from(20)));
    assert_eq!(after.order_id.as_deref(), Some(submission.order_id.as_str()));

    let settled = common::eventually(|| {
        let store = store.clone();
        async move { reload(&store, record.id).await.status == RecordStatus::Settled }
    })
    .await;
    assert!(settled, "settlement watch should mark the record settled");

    let after = reload(&store, record.id).await;
    assert_eq!(after.copied_price, Some(common::half()));
    assert_eq!(after.order_status.as_deref(), Some("matched"));
    assert_eq!(after.settlement_tx_hash.as_deref(), Some("0xfill"));

    let config = store.get_config(config.id).await.unwrap().unwrap();
    assert_eq!(config.buy_trades_today, 1);
}

#[tokio::test]
async fn test_second_execution_is_a_noop() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::with_default_status(OrderState::Live {
        size_matched: Decimal::ZERO,
    });
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        ExecutorSettings::default(),
    );

    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xdup", Side::Buy).await;

    assert!(matches!(
        exec.execute(record.id).await.unwrap(),
        ExecutionOutcome::Submitted(_)
    ));
    assert_eq!(
        exec.execute(record.id).await.unwrap(),
        ExecutionOutcome::AlreadyProcessed(RecordStatus::PendingSettlement)
    );
    assert_eq!(venue.submission_count().await, 1);
}

#[tokio::test]
async fn test_missing_record() {
    let store = Arc::new(MemoryStore::new());
    let exec = common::executor(
        store,
        FakeVenue::filling(),
        FakeBalances::with_collateral(100),
        ExecutorSettings::default(),
    );
    assert_eq!(
        exec.execute(Uuid::new_v4()).await.unwrap(),
        ExecutionOutcome::Missing
    );
}

#[tokio::test]
async fn test_insufficient_balance_fails_without_submitting() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::filling();
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(5),
        ExecutorSettings::default(),
    );

    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xpoor", Side::Buy).await;

    let outcome = exec.execute(record.id).await.unwrap();
    let ExecutionOutcome::Failed(failure) = outcome else {
        panic!("expected failure, got {outcome:?}");
    };
    assert_eq!(failure.reason, FailureReason::InsufficientBalance);
    assert!(failure.message.contains("need 10 have 5"), "{}", failure.message);

    let after = reload(&store, record.id).await;
    assert_eq!(after.status, RecordStatus::Failed);
    assert_eq!(after.failure_category.as_deref(), Some("balance"));
    assert_eq!(after.failure_reason.as_deref(), Some("insufficient_balance"));
    assert_eq!(venue.submission_count().await, 0);
}

#[tokio::test]
async fn test_balance_lookup_error_is_classified() {
    let store = Arc::new(MemoryStore::new());
    let balances = FakeBalances::with_collateral(100);
    balances.set_failing(true);
    let exec = common::executor(
        store.clone(),
        FakeVenue::filling(),
        balances,
        ExecutorSettings::default(),
    );

    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xbal", Side::Buy).await;

    let outcome = exec.execute(record.id).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failed(ref f) if f.reason == FailureReason::UnknownError));
    assert_eq!(reload(&store, record.id).await.status, RecordStatus::Failed);
}

#[tokio::test]
async fn test_disabled_config_is_skipped() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::filling();
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        ExecutorSettings::default(),
    );

    let config = common::config_with(&store, |c| c.enabled = false).await;
    let record = pending_record(&store, &config, "0xoff", Side::Buy).await;

    assert_eq!(
        exec.execute(record.id).await.unwrap(),
        ExecutionOutcome::Skipped("copy config is disabled".into())
    );
    let after = reload(&store, record.id).await;
    assert_eq!(after.status, RecordStatus::Skipped);
    assert_eq!(after.error_message.as_deref(), Some("copy config is disabled"));
    assert_eq!(venue.submission_count().await, 0);
}

#[tokio::test]
async fn test_daily_quota_bounds_buys_but_not_sells() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::with_default_status(OrderState::Live {
        size_matched: Decimal::ZERO,
    });
    let balances = FakeBalances::with_collateral(100);
    balances.set_tokens(common::ASSET, Decimal::from(500)).await;
    let exec = common::executor(store.clone(), venue.clone(), balances, ExecutorSettings::default());

    let config = common::config_with(&store, |c| c.max_buy_trades_per_day = Some(1)).await;
    let first = pending_record(&store, &config, "0xq1", Side::Buy).await;
    let second = pending_record(&store, &config, "0xq2", Side::Buy).await;
    let sell = pending_record(&store, &config, "0xq3", Side::Sell).await;

    assert!(matches!(exec.execute(first.id).await.unwrap(), ExecutionOutcome::Submitted(_)));

    let outcome = exec.execute(second.id).await.unwrap();
    let ExecutionOutcome::Skipped(reason) = outcome else {
        panic!("expected skip, got {outcome:?}");
    };
    assert!(reason.starts_with("daily buy limit reached"), "{reason}");

    assert!(matches!(exec.execute(sell.id).await.unwrap(), ExecutionOutcome::Submitted(_)));

    let config = store.get_config(config.id).await.unwrap().unwrap();
    assert_eq!(config.buy_trades_today, 1);
    assert_eq!(venue.submission_count().await, 2);
}

#[tokio::test]
async fn test_venue_rejection_releases_quota_slot() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::filling();
    venue
        .script(vec![Scripted::Reject("not enough balance / allowance")])
        .await;
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        ExecutorSettings::default(),
    );

    let config = common::config_with(&store, |c| c.max_buy_trades_per_day = Some(3)).await;
    let record = pending_record(&store, &config, "0xrej", Side::Buy).await;

    let outcome = exec.execute(record.id).await.unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(ref f) if f.reason == FailureReason::InsufficientAllowance
    ));

    let config = store.get_config(config.id).await.unwrap().unwrap();
    assert_eq!(config.buy_trades_today, 0);

    let after = reload(&store, record.id).await;
    assert_eq!(after.status, RecordStatus::Failed);
    assert!(after.error_message.unwrap().contains("allowance"));
}

#[tokio::test]
async fn test_transient_errors_retry_when_enabled() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::with_default_status(OrderState::Live {
        size_matched: Decimal::ZERO,
    });
    venue
        .script(vec![
            Scripted::Transport("HTTP 429 Too Many Requests"),
            Scripted::Transport("the orderbook is unavailable"),
        ])
        .await;
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        common::fast_retries(),
    );

    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xretry", Side::Buy).await;

    assert!(matches!(exec.execute(record.id).await.unwrap(), ExecutionOutcome::Submitted(_)));
    assert_eq!(venue.submission_count().await, 3);
}

#[tokio::test]
async fn test_retries_stop_at_max_retries() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::filling();
    venue
        .script(vec![
            Scripted::Transport("status 429: too many requests"),
            Scripted::Transport("status 429: too many requests"),
            Scripted::Transport("status 429: too many requests"),
        ])
        .await;
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        common::fast_retries(),
    );

    let config = common::config_with(&store, |c| c.max_retries = 2).await;
    let record = pending_record(&store, &config, "0xcap", Side::Buy).await;

    let outcome = exec.execute(record.id).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failed(ref f) if f.reason == FailureReason::RateLimited));
    assert_eq!(venue.submission_count().await, 3);
}

#[tokio::test]
async fn test_no_retry_by_default_or_for_permanent_errors() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::filling();
    venue.script(vec![Scripted::Transport("status 429: too many requests")]).await;
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        ExecutorSettings::default(),
    );
    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xonce", Side::Buy).await;
    assert!(matches!(exec.execute(record.id).await.unwrap(), ExecutionOutcome::Failed(_)));
    assert_eq!(venue.submission_count().await, 1);

    let venue = FakeVenue::filling();
    venue.script(vec![Scripted::Reject("invalid signature")]).await;
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        common::fast_retries(),
    );
    let record = pending_record(&store, &config, "0xsig", Side::Buy).await;
    let outcome = exec.execute(record.id).await.unwrap();
    assert!(matches!(outcome, ExecutionOutcome::Failed(ref f) if f.reason == FailureReason::InvalidSignature));
    assert_eq!(venue.submission_count().await, 1);
}

#[tokio::test]
async fn test_unconfirmed_submission_is_not_resubmitted() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::filling();
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        ExecutorSettings::default(),
    );

    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xcrash", Side::Buy).await;
    // A previous worker claimed the submission and died before confirming.
    assert!(store.claim_submission(record.id).await.unwrap());

    let outcome = exec.execute(record.id).await.unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(ref f) if f.reason == FailureReason::SubmissionInterrupted
    ));
    assert_eq!(venue.submission_count().await, 0);
    assert_eq!(reload(&store, record.id).await.status, RecordStatus::Failed);
}

#[tokio::test]
async fn test_sell_sizes_in_shares_from_token_balance() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::filling();
    let balances = FakeBalances::with_collateral(0);
    balances.set_tokens(common::ASSET, Decimal::from(100)).await;
    let exec = common::executor(store.clone(), venue.clone(), balances, ExecutorSettings::default());

    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xsell", Side::Sell).await;

    assert!(matches!(exec.execute(record.id).await.unwrap(), ExecutionOutcome::Submitted(_)));

    let submitted = venue.submitted.lock().await.clone();
    assert_eq!(submitted[0].side, Side::Sell);
    // 10 USDC at 0.50 is 20 shares.
    assert_eq!(submitted[0].amount, Decimal::from(20));

    // Sells never touch the buy counter.
    let config = store.get_config(config.id).await.unwrap().unwrap();
    assert_eq!(config.buy_trades_today, 0);
}

#[tokio::test]
async fn test_cancelled_order_fails_record() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::with_default_status(OrderState::Cancelled);
    let exec = common::executor(
        store.clone(),
        venue,
        FakeBalances::with_collateral(100),
        ExecutorSettings::default(),
    );

    let config = common::trader_config(&store, 10).await;
    let record = pending_record(&store, &config, "0xcancel", Side::Buy).await;
    assert!(matches!(exec.execute(record.id).await.unwrap(), ExecutionOutcome::Submitted(_)));

    let failed = common::eventually(|| {
        let store = store.clone();
        async move { reload(&store, record.id).await.status == RecordStatus::Failed }
    })
    .await;
    assert!(failed);
    assert_eq!(
        reload(&store, record.id).await.failure_reason.as_deref(),
        Some("order_cancelled")
    );
}

#[tokio::test]
async fn test_accepted_order_survives_store_error_on_submit() {
    let inner = Arc::new(MemoryStore::new());
    let store = common::FlakyStore::new(inner.clone());
    let venue = FakeVenue::filling();
    let exec = common::executor_over(store.clone(), venue.clone(), FakeBalances::with_collateral(100));

    let config = common::trader_config(&inner, 10).await;
    let record = pending_record(&inner, &config, "0xlive", Side::Buy).await;
    store.fail_mark_submitted(2);

    let outcome = exec.execute(record.id).await.unwrap();
    let ExecutionOutcome::Submitted(submission) = outcome else {
        panic!("expected submission, got {outcome:?}");
    };

    let settled = common::eventually(|| {
        let inner = inner.clone();
        async move { reload(&inner, record.id).await.status == RecordStatus::Settled }
    })
    .await;
    assert!(settled, "order accepted by the venue should still be followed");

    let after = reload(&inner, record.id).await;
    assert_eq!(after.order_id.as_deref(), Some(submission.order_id.as_str()));
    assert_eq!(venue.submission_count().await, 1);

    // A redelivered job must not submit again.
    assert!(matches!(
        exec.execute(record.id).await.unwrap(),
        ExecutionOutcome::AlreadyProcessed(_)
    ));
    assert_eq!(venue.submission_count().await, 1);
}

#[tokio::test]
async fn test_claim_error_gives_back_quota_slot() {
    let inner = Arc::new(MemoryStore::new());
    let store = common::FlakyStore::new(inner.clone());
    let venue = FakeVenue::filling();
    let exec = common::executor_over(store.clone(), venue.clone(), FakeBalances::with_collateral(100));

    let config = common::config_with(&inner, |c| c.max_buy_trades_per_day = Some(1)).await;
    let record = pending_record(&inner, &config, "0xclaim", Side::Buy).await;
    store.set_claim_failing(true);

    assert!(exec.execute(record.id).await.is_err());
    let config_after = inner.get_config(config.id).await.unwrap().unwrap();
    assert_eq!(config_after.buy_trades_today, 0);
    assert_eq!(venue.submission_count().await, 0);

    // Once the store recovers the same record still fits the quota.
    store.set_claim_failing(false);
    assert!(matches!(
        exec.execute(record.id).await.unwrap(),
        ExecutionOutcome::Submitted(_)
    ));
}

#[tokio::test]
async fn test_failed_slot_release_still_fails_record() {
    let inner = Arc::new(MemoryStore::new());
    let store = common::FlakyStore::new(inner.clone());
    let venue = FakeVenue::filling();
    venue.script(vec![Scripted::Reject("Market closed")]).await;
    let exec = common::executor_over(store.clone(), venue, FakeBalances::with_collateral(100));

    let config = common::trader_config(&inner, 10).await;
    let record = pending_record(&inner, &config, "0xnorelease", Side::Buy).await;
    store.set_release_failing(true);

    let outcome = exec.execute(record.id).await.unwrap();
    assert!(matches!(
        outcome,
        ExecutionOutcome::Failed(ref f) if f.reason == FailureReason::MarketClosed
    ));

    let after = reload(&inner, record.id).await;
    assert_eq!(after.status, RecordStatus::Failed);
    assert_eq!(after.failure_reason.as_deref(), Some("market_closed"));
}

#[tokio::test]
async fn test_concurrent_buys_share_one_quota_slot() {
    let store = Arc::new(MemoryStore::new());
    let venue = FakeVenue::with_default_status(OrderState::Live {
        size_matched: Decimal::ZERO,
    });
    let exec = common::executor(
        store.clone(),
        venue.clone(),
        FakeBalances::with_collateral(100),
        ExecutorSettings::default(),
    );

    let config = common::config_with(&store, |c| c.max_buy_trades_per_day = Some(1)).await;
    let a = pending_record(&store, &config, "0xa", Side::Buy).await;
    let b = pending_record(&store, &config, "0xb", Side::Buy).await;

    let (ra, rb) = tokio::join!(exec.execute(a.id), exec.execute(b.id));
    let outcomes = [ra.unwrap(), rb.unwrap()];

    let submitted = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Submitted(_)))
        .count();
    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, ExecutionOutcome::Skipped(_)))
        .count();
    assert_eq!(submitted, 1);
    assert_eq!(skipped, 1);
    assert_eq!(venue.submission_count().await, 1);

    let config = store.get_config(config.id).await.unwrap().unwrap();
    assert_eq!(config.buy_trades_today, 1);
}
