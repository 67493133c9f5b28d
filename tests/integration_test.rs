//! Integration Tests - End-to-end Engine Component Testing
//!
//! Tests the interaction between usecases, ports, and adapters. Uses
//! mockall for trait mocking where a failure must be injected, and the
//! in-memory ledger for full create → trade → resolve → claim flows.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::Utc;
use mockall::mock;
use solana_instruction::Instruction;
use solana_pubkey::Pubkey;
use tokio_test::{assert_err, assert_ok};

use vapor_engine::adapters::persistence::{
    InMemoryLedger, InMemoryMarketRepository, JsonlTradeLog, INITIAL_LIQUIDITY,
};
use vapor_engine::config::TradingConfig;
use vapor_engine::domain::address::AddressDeriver;
use vapor_engine::domain::codec::encode_market;
use vapor_engine::domain::cpmm::Odds;
use vapor_engine::domain::error::EngineError;
use vapor_engine::domain::market::{Market, MarketStatus, Side};
use vapor_engine::domain::trade::FillSource;
use vapor_engine::ports::repository::{MarketRepository, TradeSink};
use vapor_engine::ports::submitter::{ConfirmationStatus, TransactionSubmitter};
use vapor_engine::usecases::market_view::{load_history, HistoryRange, MarketStats, Participation};
use vapor_engine::usecases::orchestrator::TradeOrchestrator;
use vapor_engine::usecases::quote_service::quote;
use vapor_engine::usecases::settlement::{ClaimStatus, Settlement};

// ---- Mock Definitions ----

mock! {
    pub Ledger {}

    #[async_trait::async_trait]
    impl vapor_engine::ports::ledger::LedgerReader for Ledger {
        async fn get_account(&self, address: &Pubkey) -> anyhow::Result<Option<Vec<u8>>>;

        async fn get_multiple_accounts(
            &self,
            addresses: &[Pubkey],
        ) -> anyhow::Result<Vec<Option<Vec<u8>>>>;

        async fn program_accounts(
            &self,
            filters: &[vapor_engine::ports::ledger::MemcmpFilter],
        ) -> anyhow::Result<Vec<(Pubkey, Vec<u8>)>>;

        async fn is_healthy(&self) -> bool;
    }
}

mock! {
    pub Submitter {}

    #[async_trait::async_trait]
    impl vapor_engine::ports::submitter::TransactionSubmitter for Submitter {
        async fn submit(
            &self,
            instructions: &[solana_instruction::Instruction],
        ) -> anyhow::Result<String>;

        async fn confirmation(&self, signature: &str) -> anyhow::Result<ConfirmationStatus>;
    }
}

/// Lands another trader's instruction just ahead of the next submission.
struct InterleavingSubmitter {
    ledger: Arc<InMemoryLedger>,
    ahead: Mutex<Option<Instruction>>,
    /// Whether transaction logs are passed through.
    logs: bool,
}

#[async_trait::async_trait]
impl TransactionSubmitter for InterleavingSubmitter {
    async fn submit(&self, instructions: &[Instruction]) -> anyhow::Result<String> {
        let ahead = self.ahead.lock().unwrap().take();
        if let Some(ix) = ahead {
            let signature = self.ledger.submit(&[ix]).await?;
            self.ledger.confirmation(&signature).await?;
        }
        self.ledger.submit(instructions).await
    }

    async fn confirmation(&self, signature: &str) -> anyhow::Result<ConfirmationStatus> {
        self.ledger.confirmation(signature).await
    }

    async fn transaction_logs(&self, signature: &str) -> anyhow::Result<Vec<String>> {
        if self.logs {
            self.ledger.transaction_logs(signature).await
        } else {
            Ok(Vec::new())
        }
    }
}

// ---- Helpers ----

const WINDOW: Duration = Duration::from_secs(2);

fn trading() -> TradingConfig {
    TradingConfig {
        confirm_timeout_ms: 2_000,
        poll_interval_ms: 5,
        resolution_horizon_days: 7,
    }
}

type MemoryOrchestrator = TradeOrchestrator<InMemoryLedger, InMemoryLedger, InMemoryMarketRepository>;

fn memory(ledger: InMemoryLedger) -> (Arc<InMemoryLedger>, Arc<MemoryOrchestrator>) {
    let ledger = Arc::new(ledger);
    let orchestrator = memory_over(&ledger);
    (ledger, Arc::new(orchestrator))
}

fn memory_over(ledger: &Arc<InMemoryLedger>) -> MemoryOrchestrator {
    TradeOrchestrator::new(
        AddressDeriver::vapor(),
        Arc::clone(ledger),
        Arc::clone(ledger),
        Arc::new(InMemoryMarketRepository::new()),
        &trading(),
    )
}

fn mocked(
    ledger: MockLedger,
    submitter: MockSubmitter,
) -> TradeOrchestrator<MockLedger, MockSubmitter, InMemoryMarketRepository> {
    TradeOrchestrator::new(
        AddressDeriver::vapor(),
        Arc::new(ledger),
        Arc::new(submitter),
        Arc::new(InMemoryMarketRepository::new()),
        &trading(),
    )
}

async fn buy(orchestrator: &MemoryOrchestrator, owner: Pubkey, project_id: u64, side: Side, amount: u64) -> u64 {
    let prepared = orchestrator
        .build_buy_instruction(owner, project_id, side, amount)
        .unwrap();
    orchestrator.submit_trade(&prepared, WINDOW).await.unwrap().filled
}

// ---- Market Creation ----

#[tokio::test]
async fn test_ensure_market_is_idempotent() {
    let (ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let authority = Pubkey::new_unique();

    let first = orchestrator.ensure_market(authority, 42, "Vapor", WINDOW).await.unwrap();
    let second = orchestrator.ensure_market(authority, 42, "Vapor", WINDOW).await.unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert_eq!(first.address, second.address);
    assert_eq!(first.address, AddressDeriver::vapor().market(42));
    // the second call found the market on its pre-check read
    assert_eq!(ledger.submissions(), 1);

    let market = orchestrator.fetch_market(42).await.unwrap();
    assert_eq!(market.authority, authority);
    assert_eq!(market.yes_reserve, INITIAL_LIQUIDITY);
    assert_eq!(market.no_reserve, INITIAL_LIQUIDITY);
    assert_eq!(market.status, MarketStatus::Open);
    assert_eq!(market.bump, Some(first.address.bump));
}

#[tokio::test]
async fn test_creation_race_is_absorbed() {
    let mut ledger = MockLedger::new();
    ledger.expect_get_account().returning(|_| Ok(None));
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().times(1).returning(|_| {
        Err(anyhow!(
            "Transaction simulation failed: Error processing Instruction 0: \
             custom program error: 0x0 (Allocate: account Fk3 already in use)"
        ))
    });
    submitter.expect_confirmation().never();

    let orchestrator = mocked(ledger, submitter);
    let creation = assert_ok!(
        orchestrator
            .ensure_market(Pubkey::new_unique(), 7, "Raced", WINDOW)
            .await
    );
    assert!(!creation.created);
    assert_eq!(creation.address, AddressDeriver::vapor().market(7));
}

#[tokio::test]
async fn test_creation_rejects_invalid_name_before_submitting() {
    let mut ledger = MockLedger::new();
    ledger.expect_get_account().returning(|_| Ok(None));
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().never();

    let orchestrator = mocked(ledger, submitter);
    let err = orchestrator
        .ensure_market(Pubkey::new_unique(), 7, &"x".repeat(65), WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
}

#[tokio::test]
async fn test_seed_markets_continues_past_failures() {
    let (_ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let authority = Pubkey::new_unique();
    orchestrator.ensure_market(authority, 2, "Two", WINDOW).await.unwrap();

    let catalog = vec![
        (1, "One".to_string()),
        (2, "Two".to_string()),
        (3, String::new()),
        (4, "Four".to_string()),
    ];
    let report = orchestrator.seed_markets(authority, &catalog, WINDOW).await;
    assert_eq!(report.created, vec![1, 4]);
    assert_eq!(report.existing, vec![2]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].0, 3);

    let participation = Participation::from_positions(&orchestrator.all_positions().await.unwrap());
    let stats = MarketStats::from_markets(&orchestrator.list_markets().await.unwrap(), &participation);
    assert_eq!(stats.total_markets, 3);
    assert_eq!(stats.active_markets, 3);
    assert_eq!(stats.total_traders, 0);
}

#[tokio::test]
async fn test_confirmed_code_zero_is_an_existing_market() {
    let mut ledger = MockLedger::new();
    ledger.expect_get_account().returning(|_| Ok(None));
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().times(1).returning(|_| Ok("sig".to_string()));
    submitter.expect_confirmation().returning(|_| {
        Ok(ConfirmationStatus::Failed {
            reason: r#"Transaction sig failed: {"InstructionError":[0,{"Custom":0}]}"#.to_string(),
            code: Some(0),
        })
    });

    let orchestrator = mocked(ledger, submitter);
    let creation = assert_ok!(
        orchestrator
            .ensure_market(Pubkey::new_unique(), 12, "Landed twice", WINDOW)
            .await
    );
    assert!(!creation.created);
    assert_eq!(creation.address, AddressDeriver::vapor().market(12));
}

#[tokio::test]
async fn test_confirmed_program_error_is_not_an_existing_market() {
    let mut ledger = MockLedger::new();
    ledger.expect_get_account().returning(|_| Ok(None));
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().times(1).returning(|_| Ok("sig".to_string()));
    submitter.expect_confirmation().returning(|_| {
        Ok(ConfirmationStatus::Failed {
            reason: r#"Transaction sig failed: {"InstructionError":[0,{"Custom":6000}]}"#.to_string(),
            code: Some(6000),
        })
    });

    let orchestrator = mocked(ledger, submitter);
    let err = orchestrator
        .ensure_market(Pubkey::new_unique(), 12, "Too long", WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Remote(_)));
}

// ---- Trading ----

#[tokio::test]
async fn test_buy_then_sell_reconciles_from_ledger() {
    let dir = tempfile::tempdir().unwrap();
    let log = Arc::new(JsonlTradeLog::new(dir.path()).await.unwrap());
    let ledger = Arc::new(InMemoryLedger::new(AddressDeriver::vapor()));
    let orchestrator = TradeOrchestrator::new(
        AddressDeriver::vapor(),
        Arc::clone(&ledger),
        Arc::clone(&ledger),
        Arc::new(InMemoryMarketRepository::new()),
        &trading(),
    )
    .with_sink(Arc::clone(&log) as Arc<dyn TradeSink>);

    orchestrator.ensure_market(Pubkey::new_unique(), 42, "Vapor", WINDOW).await.unwrap();
    let trader = Pubkey::new_unique();

    // quote against the current view, then trade
    let snapshot = orchestrator.market_view(42).await.unwrap();
    let quoted = quote(&snapshot, Side::Yes, 100_000).unwrap();
    assert_eq!(quoted.shares_out, 90_910);

    let prepared = orchestrator.build_buy_instruction(trader, 42, Side::Yes, 100_000).unwrap();
    assert_eq!(
        prepared.position,
        AddressDeriver::vapor().position(&prepared.market.address, &trader, Side::Yes)
    );
    let bought = orchestrator.submit_trade(&prepared, WINDOW).await.unwrap();
    assert_eq!(bought.filled, quoted.shares_out);
    assert_eq!(bought.fill_source, FillSource::Event);
    assert_eq!(bought.view.market.yes_reserve, 909_090);
    assert_eq!(bought.view.market.no_reserve, 1_100_000);
    assert_eq!(bought.view.market.total_volume, 100_000);
    assert_eq!(bought.view.odds, Odds { yes: 55, no: 45 });
    assert_eq!(bought.view.shares(Side::Yes), 90_910);
    assert_eq!(bought.view.positions[0].avg_price, 1);

    // the cache now holds the reconciled view, not the pre-trade snapshot
    assert_eq!(orchestrator.market_view(42).await.unwrap(), bought.view.market);

    let prepared = orchestrator.build_sell_instruction(trader, 42, Side::Yes, 90_910).unwrap();
    let sold = orchestrator.submit_trade(&prepared, WINDOW).await.unwrap();
    assert_eq!(sold.filled, 100_001);
    assert_eq!(sold.fill_source, FillSource::Event);
    assert_eq!(sold.view.market.yes_reserve, 1_000_000);
    assert_eq!(sold.view.market.no_reserve, 999_999);
    assert!(sold.view.positions.is_empty());

    assert_eq!(log.recorded(), 2);
    let records = log.load_all().await.unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].filled, 90_910);
    assert_eq!(records[0].owner, trader.to_string());
    assert_eq!(records[0].fill_source, FillSource::Event);
    let pool = records[0].pool_after.unwrap();
    assert_eq!((pool.yes_reserve, pool.no_reserve), (909_090, 1_100_000));
    assert_eq!(pool.odds, Odds { yes: 55, no: 45 });

    let history = load_history(log.as_ref(), 42, HistoryRange::Hour, Utc::now())
        .await
        .unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!((history[0].yes_odds, history[0].no_odds), (55, 45));
    assert_eq!(history[1].yes_reserve, 1_000_000);
    assert!(load_history(log.as_ref(), 43, HistoryRange::All, Utc::now())
        .await
        .unwrap()
        .is_empty());
}

/// Our YES buy, then another trader's NO buy lands just before our sell.
async fn interleaved_sell(logs: bool) -> (u64, FillSource, Market) {
    let ledger = Arc::new(InMemoryLedger::new(AddressDeriver::vapor()));
    let setup = memory_over(&ledger);
    setup.ensure_market(Pubkey::new_unique(), 30, "Busy", WINDOW).await.unwrap();
    let trader = Pubkey::new_unique();
    assert_eq!(buy(&setup, trader, 30, Side::Yes, 100_000).await, 90_910);

    let other = setup
        .build_buy_instruction(Pubkey::new_unique(), 30, Side::No, 200_000)
        .unwrap()
        .instruction;
    let orchestrator = TradeOrchestrator::new(
        AddressDeriver::vapor(),
        Arc::clone(&ledger),
        Arc::new(InterleavingSubmitter {
            ledger: Arc::clone(&ledger),
            ahead: Mutex::new(Some(other)),
            logs,
        }),
        Arc::new(InMemoryMarketRepository::new()),
        &trading(),
    );
    let prepared = orchestrator.build_sell_instruction(trader, 30, Side::Yes, 90_910).unwrap();
    let sold = orchestrator.submit_trade(&prepared, WINDOW).await.unwrap();
    (sold.filled, sold.fill_source, sold.view.market)
}

#[tokio::test]
async fn test_sell_fill_comes_from_own_event_under_interleaving() {
    let (filled, source, market) = interleaved_sell(true).await;
    // the pool-wide NO reserve drop is 266_668; only 68_307 was ours
    assert_eq!(filled, 68_307);
    assert_eq!(source, FillSource::Event);
    assert_eq!(market.yes_reserve, 1_200_000);
    assert_eq!(market.no_reserve, 833_332);
}

#[tokio::test]
async fn test_sell_fill_without_logs_is_an_estimate() {
    let (filled, source, _) = interleaved_sell(false).await;
    assert_eq!(filled, 100_001);
    assert_eq!(source, FillSource::Estimate);
}

#[tokio::test]
async fn test_zero_amount_rejected_before_encoding() {
    let (ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let err = orchestrator
        .build_buy_instruction(Pubkey::new_unique(), 42, Side::No, 0)
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(ledger.submissions(), 0);
}

#[tokio::test]
async fn test_trade_on_resolved_market_is_stale_quote() {
    let (ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let authority = Pubkey::new_unique();
    orchestrator.ensure_market(authority, 5, "Stale", WINDOW).await.unwrap();

    let prepared = orchestrator
        .build_buy_instruction(Pubkey::new_unique(), 5, Side::Yes, 1_000)
        .unwrap();
    orchestrator.resolve_market(authority, 5, Side::No, WINDOW).await.unwrap();
    let submitted_before = ledger.submissions();

    let err = orchestrator.submit_trade(&prepared, WINDOW).await.unwrap_err();
    assert!(matches!(err, EngineError::StaleQuote(_)));
    assert_eq!(ledger.submissions(), submitted_before);
}

#[tokio::test]
async fn test_preflight_rejection_is_surfaced_verbatim() {
    let (_ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    orchestrator.ensure_market(Pubkey::new_unique(), 9, "Empty", WINDOW).await.unwrap();

    // selling with no position: the position account does not exist
    let prepared = orchestrator
        .build_sell_instruction(Pubkey::new_unique(), 9, Side::Yes, 10)
        .unwrap();
    match orchestrator.submit_trade(&prepared, WINDOW).await {
        Err(EngineError::Remote(reason)) => {
            assert!(reason.starts_with("Transaction simulation failed"), "{reason}");
            assert!(reason.contains("custom program error: 0xbc4"), "{reason}");
        }
        other => panic!("expected remote rejection, got {other:?}"),
    }
}

#[tokio::test]
async fn test_landed_failure_reports_program_error() {
    let (_ledger, orchestrator) =
        memory(InMemoryLedger::new(AddressDeriver::vapor()).with_skip_preflight());
    orchestrator.ensure_market(Pubkey::new_unique(), 3, "Oversell", WINDOW).await.unwrap();
    let trader = Pubkey::new_unique();
    let shares = buy(&orchestrator, trader, 3, Side::No, 50_000).await;

    let prepared = orchestrator
        .build_sell_instruction(trader, 3, Side::No, shares + 1)
        .unwrap();
    match orchestrator.submit_trade(&prepared, WINDOW).await {
        // InsufficientShares
        Err(EngineError::Remote(reason)) => assert!(reason.contains("0x1779"), "{reason}"),
        other => panic!("expected remote rejection, got {other:?}"),
    }
    let view = orchestrator.reconcile_after_submit(3, &trader).await.unwrap();
    assert_eq!(view.shares(Side::No), shares);
}

// ---- Confirmation ----

#[tokio::test]
async fn test_confirmation_poll_errors_are_retried_without_resubmitting() {
    let ledger = MockLedger::new();
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().times(1).returning(|_| Ok("5ig".to_string()));
    let polls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&polls);
    submitter.expect_confirmation().returning(move |_| {
        match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Err(anyhow!("connection reset by peer")),
            1 => Ok(ConfirmationStatus::Pending),
            _ => Ok(ConfirmationStatus::Confirmed),
        }
    });

    let orchestrator = mocked(ledger, submitter);
    let ix = orchestrator
        .build_resolve_instruction(Pubkey::new_unique(), 1, Side::Yes)
        .unwrap();
    let signature = orchestrator.submit_and_confirm(&[ix], WINDOW).await.unwrap();
    assert_eq!(signature, "5ig");
    assert_eq!(polls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_confirmation_timeout() {
    let ledger = MockLedger::new();
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().times(1).returning(|_| Ok("slow".to_string()));
    submitter
        .expect_confirmation()
        .returning(|_| Ok(ConfirmationStatus::Pending));

    let orchestrator = mocked(ledger, submitter);
    let ix = orchestrator
        .build_claim_instruction(Pubkey::new_unique(), 1, Side::Yes)
        .unwrap();
    let err = assert_err!(
        orchestrator
            .submit_and_confirm(&[ix], Duration::from_millis(50))
            .await
    );
    assert_eq!(err, EngineError::Timeout(50));
}

#[tokio::test]
async fn test_failed_confirmation_keeps_reason() {
    let ledger = MockLedger::new();
    let mut submitter = MockSubmitter::new();
    submitter.expect_submit().times(1).returning(|_| Ok("sig".to_string()));
    submitter.expect_confirmation().returning(|_| {
        Ok(ConfirmationStatus::Failed {
            reason: "Error processing Instruction 0: custom program error: 0x1772".to_string(),
            code: Some(6002),
        })
    });

    let orchestrator = mocked(ledger, submitter);
    let ix = orchestrator
        .build_resolve_instruction(Pubkey::new_unique(), 1, Side::No)
        .unwrap();
    let err = orchestrator.submit_and_confirm(&[ix], WINDOW).await.unwrap_err();
    assert_eq!(
        err,
        EngineError::Remote("Error processing Instruction 0: custom program error: 0x1772".into())
    );
}

#[tokio::test]
async fn test_delayed_confirmation_within_window() {
    let (_ledger, orchestrator) =
        memory(InMemoryLedger::new(AddressDeriver::vapor()).with_confirmation_delay(3));
    let creation = assert_ok!(
        orchestrator
            .ensure_market(Pubkey::new_unique(), 11, "Slow", WINDOW)
            .await
    );
    assert!(creation.created);
}

// ---- Resolution and Claims ----

#[tokio::test]
async fn test_resolve_twice_is_invalid_transition() {
    let (ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let authority = Pubkey::new_unique();
    orchestrator.ensure_market(authority, 8, "Twice", WINDOW).await.unwrap();

    orchestrator.resolve_market(authority, 8, Side::Yes, WINDOW).await.unwrap();
    let submitted = ledger.submissions();

    let err = orchestrator
        .resolve_market(authority, 8, Side::No, WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition(_)));
    assert_eq!(ledger.submissions(), submitted);

    let market = orchestrator.fetch_market(8).await.unwrap();
    assert_eq!(market.status, MarketStatus::Resolved);
    assert_eq!(market.resolution, Some(Side::Yes));
}

#[tokio::test]
async fn test_resolve_by_non_authority_is_rejected_locally() {
    let (ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    orchestrator.ensure_market(Pubkey::new_unique(), 8, "Owned", WINDOW).await.unwrap();
    let err = orchestrator
        .resolve_market(Pubkey::new_unique(), 8, Side::Yes, WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert_eq!(ledger.submissions(), 1);
}

#[tokio::test]
async fn test_losing_claim_is_rejected_and_winning_claim_pays() {
    let (ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let authority = Pubkey::new_unique();
    let trader = Pubkey::new_unique();
    orchestrator.ensure_market(authority, 21, "Claims", WINDOW).await.unwrap();
    let yes_shares = buy(&orchestrator, trader, 21, Side::Yes, 200_000).await;
    buy(&orchestrator, trader, 21, Side::No, 10_000).await;

    // claims before resolution are not allowed
    let err = orchestrator
        .claim_winnings(trader, 21, Side::Yes, WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::InvalidTransition(_)));

    orchestrator.resolve_market(authority, 21, Side::Yes, WINDOW).await.unwrap();
    let submitted = ledger.submissions();

    let err = orchestrator
        .claim_winnings(trader, 21, Side::No, WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ClaimRejected(_)));
    assert_eq!(ledger.submissions(), submitted);

    let (_, payout) = orchestrator
        .claim_winnings(trader, 21, Side::Yes, WINDOW)
        .await
        .unwrap();
    assert_eq!(payout, yes_shares);

    // a second claim finds nothing left
    let err = orchestrator
        .claim_winnings(trader, 21, Side::Yes, WINDOW)
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::ClaimRejected(_)));
}

#[tokio::test]
async fn test_settlement_sweep_classifies_positions() {
    let (_ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let authority = Pubkey::new_unique();
    let trader = Pubkey::new_unique();
    for (id, name) in [(1, "Won"), (2, "Lost"), (3, "Open")] {
        orchestrator.ensure_market(authority, id, name, WINDOW).await.unwrap();
    }
    let won = buy(&orchestrator, trader, 1, Side::Yes, 100_000).await;
    buy(&orchestrator, trader, 2, Side::Yes, 100_000).await;
    buy(&orchestrator, trader, 3, Side::No, 100_000).await;
    orchestrator.resolve_market(authority, 1, Side::Yes, WINDOW).await.unwrap();
    orchestrator.resolve_market(authority, 2, Side::No, WINDOW).await.unwrap();

    let settlement = Settlement::new(Arc::clone(&orchestrator));
    let report = settlement.sweep(trader, &[1, 2, 3, 4]).await.unwrap();

    assert_eq!(report.entries.len(), 3);
    assert_eq!(report.missing_markets, vec![4]);
    assert_eq!(report.total_claimable, won);
    assert!(matches!(report.entries[0].status, ClaimStatus::Claimable { payout, .. } if payout == won));
    assert_eq!(report.entries[1].status, ClaimStatus::Lost { winner: Side::No });
    assert_eq!(report.entries[2].status, ClaimStatus::Pending);

    let results = settlement.settle(&report, WINDOW).await;
    assert_eq!(results.len(), 1);
    assert!(results[0].error.is_none());

    let after = settlement.sweep(trader, &[1]).await.unwrap();
    assert!(after.entries.is_empty());
    assert_eq!(after.total_claimable, 0);
}

// ---- Reads ----

#[tokio::test]
async fn test_positions_by_owner_spans_markets() {
    let (_ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let authority = Pubkey::new_unique();
    let trader = Pubkey::new_unique();
    let other = Pubkey::new_unique();
    for id in [1, 2] {
        orchestrator.ensure_market(authority, id, "Market", WINDOW).await.unwrap();
    }
    buy(&orchestrator, trader, 1, Side::Yes, 10_000).await;
    buy(&orchestrator, trader, 2, Side::No, 10_000).await;
    buy(&orchestrator, other, 1, Side::Yes, 10_000).await;

    let positions = orchestrator.positions_by_owner(&trader).await.unwrap();
    assert_eq!(positions.len(), 2);
    assert!(positions.iter().all(|p| p.owner == trader));
    assert!(orchestrator
        .positions_by_owner(&Pubkey::new_unique())
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_malformed_accounts_are_skipped_in_listings() {
    let (ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    orchestrator.ensure_market(Pubkey::new_unique(), 1, "Good", WINDOW).await.unwrap();

    // a market-discriminated account cut short inside its name
    let good = Market {
        authority: Pubkey::new_unique(),
        project_id: 2,
        project_name: "Truncated".into(),
        yes_reserve: 1,
        no_reserve: 1,
        total_volume: 0,
        status: MarketStatus::Open,
        resolution: None,
        resolution_timestamp: 0,
        created_at: 0,
        bump: None,
    };
    let mut bytes = encode_market(&good);
    bytes.truncate(80);
    bytes[48] = 200;
    ledger.insert_account(AddressDeriver::vapor().market(2).address, bytes).await;

    let markets = orchestrator.list_markets().await.unwrap();
    assert_eq!(markets.len(), 1);
    assert_eq!(markets[0].project_id, 1);

    let err = orchestrator.fetch_market(2).await.unwrap_err();
    assert!(err.is_absent());
}

#[tokio::test]
async fn test_missing_market_is_not_found() {
    let (_ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let err = orchestrator.fetch_market(404).await.unwrap_err();
    assert!(matches!(err, EngineError::NotFound(_)));
    assert!(orchestrator.read_markets(&[404]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repository_is_invalidated_after_resolution() {
    let repository = Arc::new(InMemoryMarketRepository::new());
    let ledger = Arc::new(InMemoryLedger::new(AddressDeriver::vapor()));
    let orchestrator = TradeOrchestrator::new(
        AddressDeriver::vapor(),
        Arc::clone(&ledger),
        Arc::clone(&ledger),
        Arc::clone(&repository),
        &trading(),
    );
    let authority = Pubkey::new_unique();
    orchestrator.ensure_market(authority, 6, "Cached", WINDOW).await.unwrap();
    orchestrator.market_view(6).await.unwrap();
    assert!(repository.get(6).await.unwrap().is_some());

    orchestrator.resolve_market(authority, 6, Side::Yes, WINDOW).await.unwrap();
    assert!(repository.get(6).await.unwrap().is_none());
    assert_eq!(
        orchestrator.market_view(6).await.unwrap().status,
        MarketStatus::Resolved
    );
}

#[tokio::test]
async fn test_market_view_sees_out_of_band_trades() {
    let (ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    orchestrator.ensure_market(Pubkey::new_unique(), 14, "Outside", WINDOW).await.unwrap();
    let cached = orchestrator.market_view(14).await.unwrap();
    assert_eq!(cached.yes_reserve, INITIAL_LIQUIDITY);

    // another client trades straight against the ledger
    let prepared = orchestrator
        .build_buy_instruction(Pubkey::new_unique(), 14, Side::Yes, 500_000)
        .unwrap();
    let signature = ledger.submit(&[prepared.instruction]).await.unwrap();
    assert_eq!(ledger.confirmation(&signature).await.unwrap(), ConfirmationStatus::Confirmed);

    let fresh = orchestrator.market_view(14).await.unwrap();
    assert_eq!((fresh.yes_reserve, fresh.no_reserve), (666_666, 1_500_000));
    assert_eq!(fresh.total_volume, 500_000);
}

#[tokio::test]
async fn test_market_view_serves_cache_only_while_ledger_is_down() {
    let market = Market {
        authority: Pubkey::new_unique(),
        project_id: 15,
        project_name: "Flaky".into(),
        yes_reserve: 909_090,
        no_reserve: 1_100_000,
        total_volume: 100_000,
        status: MarketStatus::Open,
        resolution: None,
        resolution_timestamp: 0,
        created_at: 0,
        bump: Some(254),
    };
    let bytes = encode_market(&market);
    let reads = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&reads);
    let mut ledger = MockLedger::new();
    ledger
        .expect_get_account()
        .returning(move |_| match counter.fetch_add(1, Ordering::SeqCst) {
            0 => Ok(Some(bytes.clone())),
            1 | 3 => Err(anyhow!("connection refused")),
            _ => Ok(None),
        });

    let orchestrator = mocked(ledger, MockSubmitter::new());
    assert_eq!(orchestrator.market_view(15).await.unwrap(), market);
    // unreachable: the last good view
    assert_eq!(orchestrator.market_view(15).await.unwrap(), market);
    // gone from the ledger: not found, and the cached view is dropped
    assert!(matches!(
        orchestrator.market_view(15).await,
        Err(EngineError::NotFound(_))
    ));
    assert!(matches!(
        orchestrator.market_view(15).await,
        Err(EngineError::Remote(_))
    ));
    assert_eq!(reads.load(Ordering::SeqCst), 4);
}

#[tokio::test]
async fn test_participation_counts_distinct_owners() {
    let (_ledger, orchestrator) = memory(InMemoryLedger::new(AddressDeriver::vapor()));
    let authority = Pubkey::new_unique();
    let (alice, bob) = (Pubkey::new_unique(), Pubkey::new_unique());
    for id in [1, 2, 3] {
        orchestrator.ensure_market(authority, id, "Crowd", WINDOW).await.unwrap();
    }
    buy(&orchestrator, alice, 1, Side::Yes, 10_000).await;
    buy(&orchestrator, alice, 1, Side::No, 10_000).await;
    buy(&orchestrator, bob, 1, Side::Yes, 10_000).await;
    let shares = buy(&orchestrator, alice, 2, Side::No, 10_000).await;
    // selling out still counts as having traded
    let prepared = orchestrator.build_sell_instruction(alice, 2, Side::No, shares).unwrap();
    orchestrator.submit_trade(&prepared, WINDOW).await.unwrap();

    let deriver = AddressDeriver::vapor();
    let in_first = Participation::from_positions(&orchestrator.market_positions(1).await.unwrap());
    assert_eq!(in_first.participants(&deriver.market(1).address), 2);
    assert_eq!(in_first.participants(&deriver.market(2).address), 0);

    let everywhere = Participation::from_positions(&orchestrator.all_positions().await.unwrap());
    assert_eq!(everywhere.participants(&deriver.market(2).address), 1);
    assert_eq!(everywhere.participants(&deriver.market(3).address), 0);

    let stats = MarketStats::from_markets(&orchestrator.list_markets().await.unwrap(), &everywhere);
    assert_eq!(stats.total_traders, 2);
    assert_eq!(stats.total_markets, 3);
}
