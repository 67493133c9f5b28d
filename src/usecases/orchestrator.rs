//! Trade Orchestrator - Build, Submit, Reconcile
//!
//! Composes address derivation, instruction encoding and pricing into
//! submittable instructions, and re-reads the ledger after every
//! mutating call. The ledger is the only source of truth:
//! - cached market views are invalidated after each submission
//! - `reconcile_after_submit` is the only place local views are corrected
//! - a mutating instruction is submitted at most once; only reads retry
//!
//! Market creation is idempotent. An existing market found by the
//! pre-check read, or a remote "already in use" rejection (custom code 0
//! or its log text), both resolve to the existing address and never
//! surface as a failure.
//!
//! Trade fills come from the program's event in the transaction logs.
//! Without one, a buy falls back to the position delta and a sell to a
//! quote against the pre-trade reserves, flagged as an estimate.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use solana_instruction::Instruction;
use solana_pubkey::Pubkey;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::config::TradingConfig;
use crate::domain::address::{AddressDeriver, ProgramAddress};
use crate::domain::codec::account::{POSITION_MARKET_OFFSET, POSITION_OWNER_OFFSET};
use crate::domain::codec::instruction::{
  claim_accounts, create_market_accounts, resolve_accounts, trade_accounts,
};
use crate::domain::codec::{
  decode_market, decode_markets, decode_positions, parse_logs, BatchDecoded, VaporEvent,
  VaporInstruction, MARKET_DISCRIMINATOR, POSITION_DISCRIMINATOR,
};
use crate::domain::cpmm::Odds;
use crate::domain::error::EngineError;
use crate::domain::market::{Market, Position, Side};
use crate::domain::trade::{Fill, FillSource, PoolSnapshot, TradeKind, TradeRecord, TradeRequest};
use crate::ports::ledger::{LedgerReader, MemcmpFilter};
use crate::ports::repository::{MarketRepository, TradeSink};
use crate::ports::submitter::{ConfirmationStatus, Signature, TransactionSubmitter};

const SECONDS_PER_DAY: u64 = 86_400;

/// Custom error code the system program uses for "account already in use".
const ACCOUNT_ALREADY_IN_USE: u32 = 0;

/// A buy or sell ready for submission.
#[derive(Debug, Clone)]
pub struct PreparedTrade {
  pub request: TradeRequest,
  pub market: ProgramAddress,
  /// Position account the caller should watch for confirmation.
  pub position: ProgramAddress,
  pub instruction: Instruction,
}

/// Authoritative post-trade view read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciledView {
  pub market: Market,
  pub odds: Odds,
  /// The owner's non-empty positions in this market.
  pub positions: Vec<Position>,
}

impl ReconciledView {
  /// Shares currently held on `side`, zero when no position exists.
  pub fn shares(&self, side: Side) -> u64 {
    self
      .positions
      .iter()
      .find(|p| p.side == side)
      .map_or(0, |p| p.shares)
  }
}

/// Result of a confirmed trade.
#[derive(Debug, Clone)]
pub struct TradeOutcome {
  pub signature: Signature,
  /// Shares received (buy) or lamports received (sell).
  pub filled: u64,
  pub fill_source: FillSource,
  pub view: ReconciledView,
}

/// A failed submission with the custom error code it carried, if any.
#[derive(Debug)]
struct Rejected {
  error: EngineError,
  code: Option<u32>,
}

impl From<EngineError> for Rejected {
  fn from(error: EngineError) -> Self {
    Self { error, code: None }
  }
}

/// Result of `ensure_market`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarketCreation {
  pub address: ProgramAddress,
  /// False when the market already existed.
  pub created: bool,
}

/// Result of seeding markets from the catalog.
#[derive(Debug, Clone, Default)]
pub struct SeedReport {
  pub created: Vec<u64>,
  pub existing: Vec<u64>,
  pub failed: Vec<(u64, EngineError)>,
}

/// Coordinates instruction building, submission and reconciliation.
pub struct TradeOrchestrator<L, S, R>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  deriver: AddressDeriver,
  ledger: Arc<L>,
  submitter: Arc<S>,
  repository: Arc<R>,
  sink: Option<Arc<dyn TradeSink>>,
  metrics: Option<Arc<MetricsRegistry>>,
  /// Delay between confirmation polls.
  poll_interval: Duration,
  /// Default window for `submit_and_confirm` callers that have none.
  confirm_timeout: Duration,
  /// Resolution horizon for newly created markets.
  resolution_horizon: u64,
}

impl<L, S, R> TradeOrchestrator<L, S, R>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  /// Create a new orchestrator.
  pub fn new(
    deriver: AddressDeriver,
    ledger: Arc<L>,
    submitter: Arc<S>,
    repository: Arc<R>,
    config: &TradingConfig,
  ) -> Self {
    Self {
      deriver,
      ledger,
      submitter,
      repository,
      sink: None,
      metrics: None,
      poll_interval: Duration::from_millis(config.poll_interval_ms),
      confirm_timeout: Duration::from_millis(config.confirm_timeout_ms),
      resolution_horizon: u64::from(config.resolution_horizon_days) * SECONDS_PER_DAY,
    }
  }

  /// Record confirmed trades to `sink`.
  pub fn with_sink(mut self, sink: Arc<dyn TradeSink>) -> Self {
    self.sink = Some(sink);
    self
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  pub const fn deriver(&self) -> &AddressDeriver {
    &self.deriver
  }

  /// Default confirmation window from configuration.
  pub const fn confirm_timeout(&self) -> Duration {
    self.confirm_timeout
  }

  // ── 1. Instruction building (no I/O) ──

  /// Build a buy of `amount` lamports on `side`.
  ///
  /// Returns the position address alongside the instruction, with the
  /// bump that was encoded.
  pub fn build_buy_instruction(
    &self,
    owner: Pubkey,
    project_id: u64,
    side: Side,
    amount: u64,
  ) -> Result<PreparedTrade, EngineError> {
    let request = TradeRequest::new(owner, project_id, side, TradeKind::Buy, amount)?;
    self.prepare(request)
  }

  /// Build a sell of `shares` on `side`.
  pub fn build_sell_instruction(
    &self,
    owner: Pubkey,
    project_id: u64,
    side: Side,
    shares: u64,
  ) -> Result<PreparedTrade, EngineError> {
    let request = TradeRequest::new(owner, project_id, side, TradeKind::Sell, shares)?;
    self.prepare(request)
  }

  /// Build the instruction for an already validated request.
  pub fn prepare(&self, request: TradeRequest) -> Result<PreparedTrade, EngineError> {
    let market = self.deriver.market(request.project_id);
    let position = self
      .deriver
      .position(&market.address, &request.owner, request.side);
    let args = match request.kind {
      TradeKind::Buy => VaporInstruction::BuyShares {
        side: request.side,
        amount: request.amount,
        position_bump: position.bump,
      },
      TradeKind::Sell => VaporInstruction::SellShares {
        side: request.side,
        shares: request.amount,
        position_bump: position.bump,
      },
    };
    let instruction = self.encode(
      args,
      trade_accounts(request.owner, market.address, position.address),
    )?;
    Ok(PreparedTrade {
      request,
      market,
      position,
      instruction,
    })
  }

  /// Build `create_market` for `project_id`.
  pub fn build_create_market_instruction(
    &self,
    authority: Pubkey,
    project_id: u64,
    project_name: &str,
    resolution_timestamp: u64,
  ) -> Result<(ProgramAddress, Instruction), EngineError> {
    let market = self.deriver.market(project_id);
    let instruction = self.encode(
      VaporInstruction::CreateMarket {
        project_id,
        project_name: project_name.to_string(),
        resolution_timestamp,
        bump: market.bump,
      },
      create_market_accounts(authority, market.address),
    )?;
    Ok((market, instruction))
  }

  /// Build `resolve_market`. Authority and state are checked by `resolve_market`.
  pub fn build_resolve_instruction(
    &self,
    authority: Pubkey,
    project_id: u64,
    winner: Side,
  ) -> Result<Instruction, EngineError> {
    let market = self.deriver.market(project_id);
    self.encode(
      VaporInstruction::ResolveMarket { winner },
      resolve_accounts(authority, market.address),
    )
  }

  /// Build `claim_winnings` without any local checks.
  pub fn build_claim_instruction(
    &self,
    owner: Pubkey,
    project_id: u64,
    side: Side,
  ) -> Result<Instruction, EngineError> {
    let market = self.deriver.market(project_id);
    let position = self.deriver.position(&market.address, &owner, side);
    self.encode(
      VaporInstruction::ClaimWinnings { side },
      claim_accounts(owner, market.address, position.address),
    )
  }

  fn encode(
    &self,
    args: VaporInstruction,
    accounts: Vec<solana_instruction::AccountMeta>,
  ) -> Result<Instruction, EngineError> {
    let kind = args.kind();
    let instruction = args.into_instruction(*self.deriver.program_id(), accounts)?;
    if let Some(metrics) = &self.metrics {
      metrics.instructions_built.with_label_values(&[kind]).inc();
    }
    debug!(kind, bytes = instruction.data.len(), "Built instruction");
    Ok(instruction)
  }

  // ── 2. Ledger reads (idempotent) ──

  /// Read and decode the market for `project_id`, bypassing the cache.
  #[instrument(skip(self))]
  pub async fn fetch_market(&self, project_id: u64) -> Result<Market, EngineError> {
    let address = self.deriver.market(project_id).address;
    let data = self
      .ledger
      .get_account(&address)
      .await
      .map_err(|e| EngineError::remote(&e))?
      .ok_or_else(|| EngineError::NotFound(format!("market {project_id} at {address}")))?;
    decode_market(&data).inspect_err(|_| self.count_decode_failures("market", 1))
  }

  /// Current view of a market, refreshing the cache.
  ///
  /// The cached copy is served only while the ledger is unreachable.
  /// A market that no longer reads back is dropped from the cache.
  pub async fn market_view(&self, project_id: u64) -> Result<Market, EngineError> {
    match self.fetch_market(project_id).await {
      Ok(market) => {
        self.cache(market.clone()).await;
        Ok(market)
      }
      Err(e) if e.is_absent() => {
        self.invalidate(project_id).await;
        Err(e)
      }
      Err(e @ (EngineError::Remote(_) | EngineError::Timeout(_))) => {
        match self.repository.get(project_id).await {
          Ok(Some(market)) => {
            warn!(project_id, error = %e, "Ledger unreachable, serving cached market view");
            Ok(market)
          }
          Ok(None) => Err(e),
          Err(cache_err) => {
            warn!(project_id, error = %cache_err, "Failed to read cached market view");
            Err(e)
          }
        }
      }
      Err(e) => Err(e),
    }
  }

  /// Read many markets in one round trip; absent ones are left out.
  #[instrument(skip(self, project_ids), fields(count = project_ids.len()))]
  pub async fn read_markets(&self, project_ids: &[u64]) -> Result<Vec<Market>, EngineError> {
    let addresses: Vec<Pubkey> = project_ids
      .iter()
      .map(|id| self.deriver.market(*id).address)
      .collect();
    let accounts = self
      .ledger
      .get_multiple_accounts(&addresses)
      .await
      .map_err(|e| EngineError::remote(&e))?;
    let batch = decode_markets(
      addresses
        .iter()
        .copied()
        .zip(accounts.iter().map(Option::as_deref)),
    );
    Ok(self.keep_decoded("market", batch))
  }

  /// Every market account of the program, also refreshing the cache.
  #[instrument(skip(self))]
  pub async fn list_markets(&self) -> Result<Vec<Market>, EngineError> {
    let accounts = self
      .ledger
      .program_accounts(&[MemcmpFilter::new(0, MARKET_DISCRIMINATOR)])
      .await
      .map_err(|e| EngineError::remote(&e))?;
    let batch = decode_markets(
      accounts
        .iter()
        .map(|(address, data)| (*address, Some(data.as_slice()))),
    );
    let mut markets = self.keep_decoded("market", batch);
    markets.sort_by_key(|m| m.project_id);
    for market in &markets {
      self.cache(market.clone()).await;
    }
    Ok(markets)
  }

  /// Every non-empty position held by `owner`, across all markets.
  #[instrument(skip(self), fields(owner = %owner))]
  pub async fn positions_by_owner(&self, owner: &Pubkey) -> Result<Vec<Position>, EngineError> {
    let filters = [
      MemcmpFilter::new(0, POSITION_DISCRIMINATOR),
      MemcmpFilter::new(POSITION_OWNER_OFFSET, owner.to_bytes()),
    ];
    Ok(
      self
        .scan_positions(&filters)
        .await?
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect(),
    )
  }

  /// Every position account in `project_id`, emptied ones included.
  #[instrument(skip(self))]
  pub async fn market_positions(&self, project_id: u64) -> Result<Vec<Position>, EngineError> {
    let market = self.deriver.market(project_id).address;
    self
      .scan_positions(&[
        MemcmpFilter::new(0, POSITION_DISCRIMINATOR),
        MemcmpFilter::new(POSITION_MARKET_OFFSET, market.to_bytes()),
      ])
      .await
  }

  /// Every position account of the program, emptied ones included.
  #[instrument(skip(self))]
  pub async fn all_positions(&self) -> Result<Vec<Position>, EngineError> {
    self
      .scan_positions(&[MemcmpFilter::new(0, POSITION_DISCRIMINATOR)])
      .await
  }

  async fn scan_positions(&self, filters: &[MemcmpFilter]) -> Result<Vec<Position>, EngineError> {
    let accounts = self
      .ledger
      .program_accounts(filters)
      .await
      .map_err(|e| EngineError::remote(&e))?;
    let batch = decode_positions(
      accounts
        .iter()
        .map(|(address, data)| (*address, Some(data.as_slice()))),
    );
    Ok(self.keep_decoded("position", batch))
  }

  /// Both of `owner`'s positions in `project_id`, absent ones omitted.
  pub async fn read_positions(
    &self,
    owner: &Pubkey,
    project_id: u64,
  ) -> Result<Vec<Position>, EngineError> {
    let market = self.deriver.market(project_id).address;
    let addresses = [Side::Yes, Side::No].map(|side| self.deriver.position(&market, owner, side).address);
    let accounts = self
      .ledger
      .get_multiple_accounts(&addresses)
      .await
      .map_err(|e| EngineError::remote(&e))?;
    let batch = decode_positions(
      addresses
        .iter()
        .copied()
        .zip(accounts.iter().map(Option::as_deref)),
    );
    Ok(self.keep_decoded("position", batch))
  }

  /// Re-read market and positions after a submission.
  ///
  /// This is the only place a stale local view is replaced.
  #[instrument(skip(self), fields(owner = %owner))]
  pub async fn reconcile_after_submit(
    &self,
    project_id: u64,
    owner: &Pubkey,
  ) -> Result<ReconciledView, EngineError> {
    let market = self.fetch_market(project_id).await?;
    let positions = self
      .read_positions(owner, project_id)
      .await?
      .into_iter()
      .filter(|p| !p.is_empty())
      .collect();
    self.cache(market.clone()).await;
    Ok(ReconciledView {
      odds: market.reserves().odds(),
      market,
      positions,
    })
  }

  // ── 3. Submission ──

  /// Submit once, then poll for confirmation until `window` elapses.
  ///
  /// Confirmation polls are reads and may fail transiently; the
  /// submission itself is never repeated.
  #[instrument(skip(self, instructions), fields(count = instructions.len()))]
  pub async fn submit_and_confirm(
    &self,
    instructions: &[Instruction],
    window: Duration,
  ) -> Result<Signature, EngineError> {
    self
      .submit_once(instructions, window)
      .await
      .map_err(|rejected| rejected.error)
  }

  async fn submit_once(
    &self,
    instructions: &[Instruction],
    window: Duration,
  ) -> Result<Signature, Rejected> {
    let signature = self
      .submitter
      .submit(instructions)
      .await
      .map_err(|e| EngineError::remote(&e))?;
    debug!(signature = %signature, "Submitted transaction");

    let polled = timeout(window, async {
      loop {
        match self.submitter.confirmation(&signature).await {
          Ok(ConfirmationStatus::Confirmed) => return Ok(()),
          Ok(ConfirmationStatus::Failed { reason, code }) => {
            warn!(signature = %signature, ?code, reason = %reason, "Transaction failed");
            return Err(Rejected {
              error: EngineError::Remote(reason),
              code,
            });
          }
          Ok(ConfirmationStatus::Pending) => {}
          Err(e) => warn!(signature = %signature, error = %e, "Confirmation poll failed"),
        }
        sleep(self.poll_interval).await;
      }
    })
    .await;

    let outcome = match polled {
      Ok(result) => result,
      Err(_) => Err(Rejected::from(EngineError::Timeout(
        u64::try_from(window.as_millis()).unwrap_or(u64::MAX),
      ))),
    };
    self.count_confirmation(match &outcome {
      Ok(()) => "confirmed",
      Err(Rejected {
        error: EngineError::Timeout(_),
        ..
      }) => "timeout",
      Err(_) => "failed",
    });
    outcome.map(|()| signature)
  }

  /// Submit a prepared trade against a freshly read market.
  ///
  /// # Errors
  /// `StaleQuote` when the market is no longer Open; the remote
  /// rejection verbatim when the trade fails.
  #[instrument(skip(self, prepared), fields(project_id = prepared.request.project_id, side = %prepared.request.side, kind = %prepared.request.kind))]
  pub async fn submit_trade(
    &self,
    prepared: &PreparedTrade,
    window: Duration,
  ) -> Result<TradeOutcome, EngineError> {
    let request = prepared.request;
    let before = self.fetch_market(request.project_id).await?;
    if !before.is_open() {
      return Err(EngineError::StaleQuote(format!(
        "market {} is {:?}, quote no longer valid",
        request.project_id, before.status
      )));
    }
    let held_before = self
      .read_positions(&request.owner, request.project_id)
      .await?
      .iter()
      .find(|p| p.side == request.side)
      .map_or(0, |p| p.shares);

    let submitted = self
      .submit_and_confirm(std::slice::from_ref(&prepared.instruction), window)
      .await;
    self.invalidate(request.project_id).await;
    let signature = submitted?;

    let view = self.reconcile_after_submit(request.project_id, &request.owner).await?;
    let fill = match self.event_fill(&signature, &request, &prepared.market.address).await {
      Some(amount) => Fill::new(amount, FillSource::Event),
      None => fallback_fill(&request, &before, held_before, &view),
    };
    info!(
      signature = %signature,
      amount = request.amount,
      filled = fill.amount,
      source = ?fill.source,
      "Trade confirmed"
    );

    if let Some(sink) = &self.sink {
      let record = TradeRecord::confirmed(
        &request,
        signature.clone(),
        fill,
        PoolSnapshot::of(&view.market),
      );
      if let Err(e) = sink.record(&record).await {
        warn!(error = %e, "Failed to record trade");
      }
    }

    Ok(TradeOutcome {
      signature,
      filled: fill.amount,
      fill_source: fill.source,
      view,
    })
  }

  /// Amount reported by this trade's own event, if the logs carry one.
  async fn event_fill(
    &self,
    signature: &str,
    request: &TradeRequest,
    market: &Pubkey,
  ) -> Option<u64> {
    let logs = match self.submitter.transaction_logs(signature).await {
      Ok(logs) => logs,
      Err(e) => {
        warn!(signature, error = %e, "Failed to read transaction logs");
        return None;
      }
    };
    let fill = fill_from_events(&parse_logs(&logs), request, market);
    if fill.is_none() {
      debug!(signature, lines = logs.len(), "No trade event in transaction logs");
    }
    fill
  }

  // ── 4. Market lifecycle ──

  /// Make sure a market exists for `project_id`, creating it if needed.
  ///
  /// Never fails because the market already exists.
  #[instrument(skip(self, project_name), fields(authority = %authority))]
  pub async fn ensure_market(
    &self,
    authority: Pubkey,
    project_id: u64,
    project_name: &str,
    window: Duration,
  ) -> Result<MarketCreation, EngineError> {
    let address = self.deriver.market(project_id);
    match self.fetch_market(project_id).await {
      Ok(_) => {
        debug!(market = %address.address, "Market already exists");
        return Ok(MarketCreation {
          address,
          created: false,
        });
      }
      Err(e) if e.is_absent() => {}
      Err(e) => return Err(e),
    }

    let resolution_timestamp = unix_now().saturating_add(self.resolution_horizon);
    let (_, instruction) =
      self.build_create_market_instruction(authority, project_id, project_name, resolution_timestamp)?;

    let submitted = self
      .submit_once(&[instruction], window)
      .await
      .map_err(|rejected| already_exists(rejected, &address.address));
    match submitted {
      Ok(signature) => {
        info!(market = %address.address, signature = %signature, "Market created");
        self.invalidate(project_id).await;
        Ok(MarketCreation {
          address,
          created: true,
        })
      }
      Err(EngineError::AlreadyExists(_)) => {
        debug!(market = %address.address, "Creation raced an existing market");
        self.count_confirmation("already_exists");
        Ok(MarketCreation {
          address,
          created: false,
        })
      }
      Err(e) => Err(e),
    }
  }

  /// Ensure every `(project_id, project_name)` pair has a market.
  ///
  /// Failures are collected per project; one bad entry does not stop the rest.
  #[instrument(skip(self, catalog), fields(count = catalog.len()))]
  pub async fn seed_markets(
    &self,
    authority: Pubkey,
    catalog: &[(u64, String)],
    window: Duration,
  ) -> SeedReport {
    let mut report = SeedReport::default();
    for (project_id, name) in catalog {
      match self.ensure_market(authority, *project_id, name, window).await {
        Ok(MarketCreation { created: true, .. }) => report.created.push(*project_id),
        Ok(MarketCreation { created: false, .. }) => report.existing.push(*project_id),
        Err(e) => {
          warn!(project_id, error = %e, "Failed to seed market");
          report.failed.push((*project_id, e));
        }
      }
    }
    info!(
      created = report.created.len(),
      existing = report.existing.len(),
      failed = report.failed.len(),
      "Market seeding complete"
    );
    report
  }

  /// Resolve `project_id` to `winner` after checking state and authority locally.
  #[instrument(skip(self), fields(authority = %authority))]
  pub async fn resolve_market(
    &self,
    authority: Pubkey,
    project_id: u64,
    winner: Side,
    window: Duration,
  ) -> Result<Signature, EngineError> {
    let market = self.fetch_market(project_id).await?;
    market.check_resolve(&authority)?;
    let instruction = self.build_resolve_instruction(authority, project_id, winner)?;
    let submitted = self.submit_and_confirm(&[instruction], window).await;
    self.invalidate(project_id).await;
    let signature = submitted?;
    info!(winner = %winner, signature = %signature, "Market resolved");
    Ok(signature)
  }

  /// Check a claim against the ledger and build it.
  ///
  /// Losing-side and empty positions are rejected here, before anything
  /// is submitted. Returns the instruction and the expected payout.
  pub async fn prepare_claim(
    &self,
    owner: Pubkey,
    project_id: u64,
    side: Side,
  ) -> Result<(Instruction, u64), EngineError> {
    let market = self.fetch_market(project_id).await?;
    let position = self
      .read_positions(&owner, project_id)
      .await?
      .into_iter()
      .find(|p| p.side == side)
      .unwrap_or_else(|| Position::empty(owner, self.deriver.market(project_id).address, side));
    let payout = market.check_claim(&position)?;
    Ok((self.build_claim_instruction(owner, project_id, side)?, payout))
  }

  /// Claim winnings for `owner` on `side`, returning the lamports paid.
  #[instrument(skip(self), fields(owner = %owner))]
  pub async fn claim_winnings(
    &self,
    owner: Pubkey,
    project_id: u64,
    side: Side,
    window: Duration,
  ) -> Result<(Signature, u64), EngineError> {
    let (instruction, payout) = self.prepare_claim(owner, project_id, side).await?;
    let signature = self.submit_and_confirm(&[instruction], window).await?;
    info!(payout, signature = %signature, "Winnings claimed");
    Ok((signature, payout))
  }

  // ── 5. Helpers ──

  async fn cache(&self, market: Market) {
    if let Err(e) = self.repository.put(market).await {
      warn!(error = %e, "Failed to cache market view");
    }
  }

  async fn invalidate(&self, project_id: u64) {
    if let Err(e) = self.repository.invalidate(project_id).await {
      warn!(project_id, error = %e, "Failed to invalidate market view");
    }
  }

  fn keep_decoded<T>(&self, layout: &str, batch: BatchDecoded<T>) -> Vec<T> {
    let malformed = batch
      .skipped
      .iter()
      .filter(|(_, e)| matches!(e, EngineError::MalformedAccount(_)))
      .count();
    for (address, e) in &batch.skipped {
      match e {
        EngineError::MalformedAccount(_) => {
          warn!(layout, address = %address, error = %e, "Skipping malformed account");
        }
        _ => debug!(layout, address = %address, "Account absent"),
      }
    }
    self.count_decode_failures(layout, malformed as u64);
    batch.decoded.into_iter().map(|(_, record)| record).collect()
  }

  fn count_decode_failures(&self, layout: &str, n: u64) {
    if let (Some(metrics), true) = (&self.metrics, n > 0) {
      metrics.decode_failures.with_label_values(&[layout]).inc_by(n);
    }
  }

  fn count_confirmation(&self, outcome: &str) {
    if let Some(metrics) = &self.metrics {
      metrics.confirmations.with_label_values(&[outcome]).inc();
    }
  }
}

/// Map a remote "account already in use" rejection to `AlreadyExists`.
///
/// Only valid for single-instruction creation transactions, where code 0
/// can only come from the system program's allocation.
fn already_exists(rejected: Rejected, address: &Pubkey) -> EngineError {
  match rejected {
    Rejected {
      error: EngineError::Remote(_),
      code: Some(ACCOUNT_ALREADY_IN_USE),
    } => EngineError::AlreadyExists(address.to_string()),
    Rejected {
      error: EngineError::Remote(msg),
      ..
    } if is_already_in_use(&msg) => EngineError::AlreadyExists(address.to_string()),
    Rejected { error, .. } => error,
  }
}

/// The fill a trade event reports for `request`, matched on market, owner and side.
fn fill_from_events(events: &[VaporEvent], request: &TradeRequest, market: &Pubkey) -> Option<u64> {
  events.iter().find_map(|event| match (request.kind, event) {
    (
      TradeKind::Buy,
      VaporEvent::SharesBought {
        market: m,
        user,
        side,
        shares,
        ..
      },
    ) if m == market && *user == request.owner && *side == request.side => Some(*shares),
    (
      TradeKind::Sell,
      VaporEvent::SharesSold {
        market: m,
        user,
        side,
        payout,
        ..
      },
    ) if m == market && *user == request.owner && *side == request.side => Some(*payout),
    _ => None,
  })
}

/// Fill derived from account reads when no event is available.
fn fallback_fill(
  request: &TradeRequest,
  before: &Market,
  held_before: u64,
  view: &ReconciledView,
) -> Fill {
  match request.kind {
    TradeKind::Buy => Fill::new(
      view.shares(request.side).saturating_sub(held_before),
      FillSource::PositionDelta,
    ),
    // the reserves move with every trader's fills, so only a quote is possible
    TradeKind::Sell => Fill::new(
      before
        .reserves()
        .sell(request.side, request.amount)
        .map_or(0, |outcome| outcome.payout),
      FillSource::Estimate,
    ),
  }
}

/// Whether a remote rejection means the account to create already exists.
///
/// The system program reports this as custom error 0 with an
/// "already in use" log line.
pub fn is_already_in_use(message: &str) -> bool {
  message.contains("already in use")
    || message.contains("custom program error: 0x0 ")
    || message.ends_with("custom program error: 0x0")
}

fn unix_now() -> u64 {
  u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_already_in_use_detection() {
    assert!(is_already_in_use(
      "Transaction simulation failed: Error processing Instruction 0: custom program error: 0x0"
    ));
    assert!(is_already_in_use("Allocate: account Address { .. } already in use"));
    assert!(!is_already_in_use(
      "Error processing Instruction 0: custom program error: 0x0A"
    ));
    assert!(!is_already_in_use("custom program error: 0x1772"));
  }

  #[test]
  fn test_already_exists_mapping_keeps_other_errors() {
    let address = Pubkey::new_unique();
    assert!(matches!(
      already_exists(EngineError::Remote("already in use".into()).into(), &address),
      EngineError::AlreadyExists(_)
    ));
    assert_eq!(
      already_exists(EngineError::Timeout(10).into(), &address),
      EngineError::Timeout(10)
    );
  }

  #[test]
  fn test_already_exists_from_custom_code_zero() {
    let address = Pubkey::new_unique();
    let rejected = Rejected {
      error: EngineError::Remote(
        r#"Transaction sig failed: {"InstructionError":[0,{"Custom":0}]}"#.into(),
      ),
      code: Some(0),
    };
    assert_eq!(
      already_exists(rejected, &address),
      EngineError::AlreadyExists(address.to_string())
    );

    let program_error = Rejected {
      error: EngineError::Remote("custom program error: 0x1771".into()),
      code: Some(6001),
    };
    assert!(matches!(
      already_exists(program_error, &address),
      EngineError::Remote(_)
    ));
  }

  fn sell_request(owner: Pubkey) -> TradeRequest {
    TradeRequest::new(owner, 1, Side::Yes, TradeKind::Sell, 90_910).unwrap()
  }

  #[test]
  fn test_fill_from_events_matches_own_trade() {
    let owner = Pubkey::new_unique();
    let market = Pubkey::new_unique();
    let events = vec![
      VaporEvent::SharesSold {
        market,
        user: Pubkey::new_unique(),
        side: Side::Yes,
        shares: 10,
        payout: 11,
      },
      VaporEvent::SharesSold {
        market,
        user: owner,
        side: Side::No,
        shares: 10,
        payout: 12,
      },
      VaporEvent::SharesSold {
        market,
        user: owner,
        side: Side::Yes,
        shares: 90_910,
        payout: 68_307,
      },
    ];
    assert_eq!(fill_from_events(&events, &sell_request(owner), &market), Some(68_307));
    assert_eq!(
      fill_from_events(&events, &sell_request(owner), &Pubkey::new_unique()),
      None
    );
  }

  #[test]
  fn test_sell_fallback_is_an_estimate() {
    let owner = Pubkey::new_unique();
    let before = Market {
      authority: Pubkey::new_unique(),
      project_id: 1,
      project_name: "x".into(),
      yes_reserve: 909_090,
      no_reserve: 1_100_000,
      total_volume: 100_000,
      status: crate::domain::market::MarketStatus::Open,
      resolution: None,
      resolution_timestamp: 0,
      created_at: 0,
      bump: None,
    };
    let view = ReconciledView {
      odds: before.reserves().odds(),
      market: before.clone(),
      positions: Vec::new(),
    };
    assert_eq!(
      fallback_fill(&sell_request(owner), &before, 90_910, &view),
      Fill::new(100_001, FillSource::Estimate)
    );
  }
}
