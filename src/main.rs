//! Vapor Engine - Entry Point
//!
//! Initializes configuration, logging, the ledger connection and the
//! read API. Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create metrics registry, health state and trade log
//! 4. Create the ledger: JSON-RPC reader, or the in-process ledger
//! 5. Build the trade orchestrator over the ledger and a market cache
//! 6. Seed catalog markets (memory) or report missing ones (rpc)
//! 7. Spawn the health task and the HTTP API
//! 8. Wait for SIGINT → graceful shutdown

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::num::NonZeroU32;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use solana_pubkey::Pubkey;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use vapor_engine::adapters::http::{router, ApiState};
use vapor_engine::adapters::metrics::{HealthState, MetricsRegistry};
use vapor_engine::adapters::persistence::{InMemoryLedger, InMemoryMarketRepository, JsonlTradeLog};
use vapor_engine::adapters::rpc::{RpcClient, RpcClientConfig, RpcLedger};
use vapor_engine::config::{self, AppConfig, LedgerMode};
use vapor_engine::domain::address::AddressDeriver;
use vapor_engine::ports::ledger::LedgerReader;
use vapor_engine::ports::repository::{TradeHistory, TradeSink};
use vapor_engine::ports::submitter::TransactionSubmitter;
use vapor_engine::usecases::orchestrator::TradeOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ───────────────────────────────
    let config_path = std::env::var("VAPOR_CONFIG").unwrap_or_else(|_| "config.toml".to_string());
    let config = config::loader::load_config(&config_path)
        .context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        mode = ?config.ledger.mode,
        markets = config.markets.len(),
        "Starting Vapor engine"
    );

    // ── 3. Shared services ──────────────────────────────────
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to register metrics")?);
    let health = Arc::new(HealthState::new());
    let trade_log = Arc::new(
        JsonlTradeLog::new(&config.persistence.data_dir)
            .await
            .context("Failed to open trade log")?,
    );
    let deriver = AddressDeriver::new(config.ledger.program_id()?);

    // ── 4. Ledger, then run ─────────────────────────────────
    match config.ledger.mode {
        LedgerMode::Rpc => {
            let client = RpcClient::new(RpcClientConfig {
                url: config.ledger.rpc_url.clone(),
                timeout: Duration::from_millis(config.ledger.timeout_ms),
                max_retries: config.ledger.max_retries,
                retry_base_delay: Duration::from_millis(config.ledger.retry_base_delay_ms),
                requests_per_second: NonZeroU32::new(config.ledger.requests_per_second)
                    .unwrap_or(NonZeroU32::MIN),
            })
            .context("Failed to create RPC client")?;
            let ledger = Arc::new(
                RpcLedger::new(client, *deriver.program_id(), config.ledger.commitment.clone())
                    .with_batch_size(config.ledger.batch_size)
                    .with_metrics(Arc::clone(&metrics)),
            );
            run(config, deriver, Arc::clone(&ledger), ledger, metrics, health, trade_log).await
        }
        LedgerMode::Memory => {
            warn!("Memory mode: trades settle against an in-process ledger");
            let ledger = Arc::new(InMemoryLedger::new(deriver));
            run(config, deriver, Arc::clone(&ledger), ledger, metrics, health, trade_log).await
        }
    }
}

/// Wire the orchestrator and API over a concrete ledger, then serve until SIGINT.
async fn run<L, S>(
    config: AppConfig,
    deriver: AddressDeriver,
    ledger: Arc<L>,
    submitter: Arc<S>,
    metrics: Arc<MetricsRegistry>,
    health: Arc<HealthState>,
    trade_log: Arc<JsonlTradeLog>,
) -> Result<()>
where
    L: LedgerReader,
    S: TransactionSubmitter,
{
    // ── 5. Orchestrator ─────────────────────────────────────
    let orchestrator = Arc::new(
        TradeOrchestrator::new(
            deriver,
            Arc::clone(&ledger),
            submitter,
            Arc::new(InMemoryMarketRepository::new()),
            &config.trading,
        )
        .with_sink(Arc::clone(&trade_log) as Arc<dyn TradeSink>)
        .with_metrics(Arc::clone(&metrics)),
    );

    // ── 6. Catalog ──────────────────────────────────────────
    let catalog: Vec<(u64, String)> = config
        .markets
        .iter()
        .map(|m| (m.project_id, m.project_name.clone()))
        .collect();
    if !catalog.is_empty() {
        match config.ledger.mode {
            LedgerMode::Memory => {
                let authority = config.ledger.authority()?.unwrap_or_else(Pubkey::new_unique);
                info!(authority = %authority, "Seeding catalog markets");
                let report = orchestrator
                    .seed_markets(authority, &catalog, config.trading.confirm_timeout())
                    .await;
                if !report.failed.is_empty() {
                    warn!(failed = report.failed.len(), "Some catalog markets were not created");
                }
            }
            LedgerMode::Rpc => {
                let ids: Vec<u64> = catalog.iter().map(|(id, _)| *id).collect();
                match orchestrator.read_markets(&ids).await {
                    Ok(found) => {
                        let missing: Vec<u64> = ids
                            .iter()
                            .copied()
                            .filter(|id| !found.iter().any(|m| m.project_id == *id))
                            .collect();
                        if !missing.is_empty() {
                            warn!(?missing, "Catalog markets not yet created on the ledger");
                        }
                    }
                    Err(e) => warn!(error = %e, "Failed to check catalog markets"),
                }
            }
        }
    }

    // ── 7. Background tasks ─────────────────────────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);

    let health_handle = tokio::spawn(monitor_health(
        Arc::clone(&ledger),
        Arc::clone(&trade_log),
        Arc::clone(&health),
        Duration::from_secs(config.api.health_interval_seconds.max(1)),
        shutdown_tx.subscribe(),
    ));

    let app = router(
        Arc::new(ApiState {
            orchestrator: Arc::clone(&orchestrator),
            history: Arc::clone(&trade_log) as Arc<dyn TradeHistory>,
            metrics: Arc::clone(&metrics),
        }),
        Arc::clone(&health),
    );
    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_address))?;
    info!(address = %config.api.bind_address, "HTTP API listening");

    let mut api_shutdown = shutdown_tx.subscribe();
    let api_handle = tokio::spawn(async move {
        let served = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.recv().await;
            })
            .await;
        if let Err(e) = served {
            error!(error = %e, "HTTP API failed");
        }
    });

    info!("All tasks spawned, engine is running");

    // ── 8. Wait for SIGINT ──────────────────────────────────
    signal::ctrl_c().await.context("Failed to listen for SIGINT")?;
    info!("SIGINT received, initiating graceful shutdown");

    // Readiness goes 503 before the API stops accepting.
    health.ledger_healthy.store(false, Ordering::Relaxed);
    let _ = shutdown_tx.send(());

    let _ = tokio::time::timeout(Duration::from_secs(10), api_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;

    info!(trades = trade_log.recorded(), "Shutdown complete");
    Ok(())
}

/// Refresh readiness flags until shutdown.
async fn monitor_health<L: LedgerReader>(
    ledger: Arc<L>,
    trade_log: Arc<JsonlTradeLog>,
    health: Arc<HealthState>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => break,
            _ = ticker.tick() => {
                let ledger_ok = ledger.is_healthy().await;
                let sink_ok = trade_log.is_healthy().await;
                if !ledger_ok {
                    warn!("Ledger health check failed");
                }
                if !sink_ok {
                    warn!("Trade log is not writable");
                }
                health.ledger_healthy.store(ledger_ok, Ordering::Relaxed);
                health.sink_healthy.store(sink_ok, Ordering::Relaxed);
            }
        }
    }
}
