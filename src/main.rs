use std::sync::Arc;

use polycopy::api::router::create_router;
use polycopy::cache::TtlCache;
use polycopy::config::AppConfig;
use polycopy::db::{self, CopyStore, MemoryStore, PgStore};
use polycopy::execution::CopyExecutor;
use polycopy::external::{
    ActivitySource, BalanceService, ExecutionVenue, MarketStatusSource, RedemptionVenue,
};
use polycopy::models::SourceKind;
use polycopy::polymarket::{
    CtfRedeemer, DataClient, DryRunBalances, DryRunRedeemer, DryRunVenue, GammaClient,
    PolymarketBalances, PolymarketVenue, SignalClient, WalletRegistry,
};
use polycopy::queue::{
    run_retention_sweep, run_worker_pool, JobQueue, MemoryJobQueue, PgJobQueue,
};
use polycopy::services::{ActivityMonitor, RedemptionScanner, SettlementMonitor};
use polycopy::AppState;

struct Adapters {
    venue: Arc<dyn ExecutionVenue>,
    balances: Arc<dyn BalanceService>,
    redeemer: Arc<dyn RedemptionVenue>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Install rustls CryptoProvider (must be before any TLS connection)
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls CryptoProvider"))?;

    let config = AppConfig::from_env()?;
    init_tracing(config.log_json);

    let metrics_handle = polycopy::metrics::init_metrics()?;
    let addr = format!("{}:{}", config.host, config.port);

    // --- Persistence + queue ---
    let (store, queue): (Arc<dyn CopyStore>, Arc<dyn JobQueue>) = match &config.database_url {
        Some(url) => {
            tracing::info!("Connecting to database...");
            let pool = db::init_pool(url).await?;
            tracing::info!("Database connected");
            (
                Arc::new(PgStore::new(pool.clone())),
                Arc::new(PgJobQueue::new(pool, config.job_lease)),
            )
        }
        None => {
            tracing::warn!("DATABASE_URL not set, using in-memory store and queue");
            (
                Arc::new(MemoryStore::new()),
                Arc::new(MemoryJobQueue::new(config.job_lease)),
            )
        }
    };

    // --- Venue adapters ---
    let http = reqwest::Client::new();
    let data_client = DataClient::new(http.clone());
    let markets: Arc<dyn MarketStatusSource> =
        Arc::new(GammaClient::new(http.clone(), TtlCache::new(config.market_cache_ttl)));
    let adapters = build_adapters(&config, data_client.clone());

    // --- Settlement: resume watches left over from a previous run ---
    let settlement = SettlementMonitor::new(
        store.clone(),
        adapters.venue.clone(),
        config.settlement_poll_interval,
        config.settlement_timeout,
    );
    match settlement.resume_pending().await {
        Ok(n) => tracing::info!(resumed = n, "Settlement monitor ready"),
        Err(e) => tracing::error!(error = %e, "Settlement resume failed"),
    }

    // --- Execution workers ---
    let executor = Arc::new(CopyExecutor::new(
        store.clone(),
        adapters.venue.clone(),
        adapters.balances.clone(),
        settlement,
        config.executor_settings(),
    ));
    let _workers = run_worker_pool(
        queue.clone(),
        executor,
        config.worker_concurrency,
        config.retry_policy(),
        config.worker_idle_wait,
    );
    let _sweep = run_retention_sweep(
        queue.clone(),
        config.job_retention,
        config.job_purge_interval,
    );

    // --- Activity monitors ---
    let trade_source: Arc<dyn ActivitySource> = Arc::new(data_client);
    let trade_monitor = ActivityMonitor::new(
        SourceKind::Trade,
        store.clone(),
        trade_source,
        markets.clone(),
        adapters.balances.clone(),
        queue.clone(),
        config.monitor_settings(config.trade_monitor_interval),
    );
    tokio::spawn(trade_monitor.run());

    match &config.signal_feed_url {
        Some(url) => {
            let signal_source: Arc<dyn ActivitySource> = Arc::new(SignalClient::new(http, url));
            let signal_monitor = ActivityMonitor::new(
                SourceKind::Signal,
                store.clone(),
                signal_source,
                markets.clone(),
                adapters.balances.clone(),
                queue.clone(),
                config.monitor_settings(config.signal_monitor_interval),
            );
            tokio::spawn(signal_monitor.run());
        }
        None => tracing::info!("SIGNAL_FEED_URL not set, signal monitor disabled"),
    }

    // --- Redemption ---
    let scanner = RedemptionScanner::new(
        store.clone(),
        markets,
        adapters.redeemer,
        config.redemption_settings(),
    );
    tokio::spawn(scanner.run());

    // --- HTTP surface ---
    let state = AppState {
        store,
        metrics_handle,
    };
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {addr}");
    axum::serve(listener, router).await?;

    Ok(())
}

fn build_adapters(config: &AppConfig, data_client: DataClient) -> Adapters {
    match (&config.private_key, config.is_live()) {
        (Some(key), true) => {
            let wallets = Arc::new(WalletRegistry::single(
                &config.owner_id,
                key,
                TtlCache::new(config.wallet_session_ttl),
            ));
            tracing::info!(owner = %config.owner_id, "Live trading enabled");
            Adapters {
                venue: Arc::new(PolymarketVenue::new(wallets.clone())),
                balances: Arc::new(PolymarketBalances::new(wallets.clone(), data_client)),
                redeemer: Arc::new(CtfRedeemer::new(wallets, &config.polygon_rpc_url)),
            }
        }
        _ => {
            tracing::warn!("No signing key or DRY_RUN set, orders and redemptions are simulated");
            Adapters {
                venue: Arc::new(DryRunVenue::new()),
                balances: Arc::new(DryRunBalances::new(config.dry_run_balance)),
                redeemer: Arc::new(DryRunRedeemer),
            }
        }
    }
}

fn init_tracing(json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer()).init();
    }
}
