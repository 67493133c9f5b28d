//! In-memory Ledger and Market Cache
//!
//! `InMemoryLedger` stands in for the remote ledger in tests and in the
//! service's `memory` mode: it serves raw account bytes, and applies
//! submitted instructions to its own account map with the same checks
//! and error codes the deployed program uses. Accounts are stored in the
//! program's binary layout, so every read goes through the real codec,
//! and each applied instruction logs the event the program would emit.
//!
//! A signature is tracked until its terminal status has been reported;
//! the logs of confirmed transactions are kept in a bounded ring.
//!
//! `InMemoryMarketRepository` is the cache of decoded market views.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use solana_instruction::Instruction;
use solana_pubkey::Pubkey;
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use crate::domain::address::AddressDeriver;
use crate::domain::codec::{
    decode_market, decode_position, encode_market, encode_position, VaporEvent, VaporInstruction,
    MAX_NAME_LEN,
};
use crate::domain::market::{Market, MarketStatus, Position, Side};
use crate::ports::ledger::{LedgerReader, MemcmpFilter};
use crate::ports::repository::MarketRepository;
use crate::ports::submitter::{ConfirmationStatus, Signature, TransactionSubmitter};

/// Liquidity placed on each side when a market is created.
pub const INITIAL_LIQUIDITY: u64 = 1_000_000;

/// Confirmed transactions whose logs stay readable.
const RECENT_LOGS: usize = 256;

/// Rejections raised while applying an instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    /// System program: the account to allocate already exists.
    AlreadyInUse,
    ConstraintSeeds,
    AccountNotInitialized,
    InstructionDidNotDeserialize,
    IncorrectProgramId,
    NotEnoughAccounts,
    NameTooLong,
    InvalidAmount,
    MarketClosed,
    MarketNotResolved,
    Overflow,
    Unauthorized,
    NoPosition,
    PositionLost,
    InsufficientShares,
}

impl Rejection {
    const fn code(self) -> u32 {
        match self {
            Self::AlreadyInUse => 0,
            Self::InstructionDidNotDeserialize => 102,
            Self::ConstraintSeeds => 2006,
            Self::AccountNotInitialized => 3012,
            Self::IncorrectProgramId => 3008,
            Self::NotEnoughAccounts => 3005,
            Self::NameTooLong => 6000,
            Self::InvalidAmount => 6001,
            Self::MarketClosed => 6002,
            Self::MarketNotResolved => 6003,
            Self::Overflow => 6004,
            Self::Unauthorized => 6005,
            Self::NoPosition => 6007,
            Self::PositionLost => 6008,
            Self::InsufficientShares => 6009,
        }
    }
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "custom program error: {:#x}", self.code())
    }
}

/// A failed instruction within a transaction.
#[derive(Debug, Clone)]
struct Failure {
    index: usize,
    rejection: Rejection,
    detail: String,
}

impl Failure {
    fn reason(&self) -> String {
        let mut reason = format!("Error processing Instruction {}: {}", self.index, self.rejection);
        if !self.detail.is_empty() {
            reason.push_str(&format!(" ({})", self.detail));
        }
        reason
    }
}

#[derive(Debug)]
struct SignatureEntry {
    outcome: ConfirmationStatus,
    /// Polls that still report `Pending` before `outcome` is visible.
    polls_left: u32,
    logs: Vec<String>,
}

#[derive(Debug, Default)]
struct LedgerState {
    accounts: BTreeMap<Pubkey, Vec<u8>>,
    /// Submitted transactions whose terminal status has not been polled yet.
    signatures: HashMap<Signature, SignatureEntry>,
    /// Oldest first, at most `RECENT_LOGS` entries.
    recent_logs: VecDeque<(Signature, Vec<String>)>,
}

/// Ledger double that executes Vapor instructions against an account map.
pub struct InMemoryLedger {
    deriver: AddressDeriver,
    state: RwLock<LedgerState>,
    /// Unix seconds reported as the current time to new markets.
    clock: AtomicU64,
    submissions: AtomicU64,
    /// Confirmation polls answered with `Pending` before the outcome.
    confirm_after: u32,
    /// Land failing transactions instead of rejecting them up front.
    skip_preflight: bool,
}

impl InMemoryLedger {
    pub fn new(deriver: AddressDeriver) -> Self {
        let now = u64::try_from(chrono::Utc::now().timestamp()).unwrap_or(0);
        Self {
            deriver,
            state: RwLock::new(LedgerState::default()),
            clock: AtomicU64::new(now),
            submissions: AtomicU64::new(0),
            confirm_after: 0,
            skip_preflight: false,
        }
    }

    /// Answer `polls` confirmation checks with `Pending` first.
    pub const fn with_confirmation_delay(mut self, polls: u32) -> Self {
        self.confirm_after = polls;
        self
    }

    /// Record failing transactions as landed-and-failed.
    pub const fn with_skip_preflight(mut self) -> Self {
        self.skip_preflight = true;
        self
    }

    pub fn set_clock(&self, unix_seconds: u64) {
        self.clock.store(unix_seconds, Ordering::Relaxed);
    }

    /// Number of `submit` calls seen, successful or not.
    pub fn submissions(&self) -> u64 {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Write raw bytes to an address, bypassing the program.
    pub async fn insert_account(&self, address: Pubkey, data: Vec<u8>) {
        self.state.write().await.accounts.insert(address, data);
    }

    fn apply(
        &self,
        accounts: &mut BTreeMap<Pubkey, Vec<u8>>,
        ix: &Instruction,
    ) -> Result<VaporEvent, (Rejection, String)> {
        if ix.program_id != *self.deriver.program_id() {
            return Err((Rejection::IncorrectProgramId, ix.program_id.to_string()));
        }
        let args = VaporInstruction::decode(&ix.data)
            .map_err(|e| (Rejection::InstructionDidNotDeserialize, e.to_string()))?;
        let key = |i: usize| {
            ix.accounts
                .get(i)
                .map(|meta| meta.pubkey)
                .ok_or((Rejection::NotEnoughAccounts, String::new()))
        };
        let signer = key(0)?;
        let market_key = key(1)?;

        let event = match args {
            VaporInstruction::CreateMarket {
                project_id,
                project_name,
                resolution_timestamp,
                bump,
            } => {
                if project_name.len() > MAX_NAME_LEN {
                    return Err((Rejection::NameTooLong, String::new()));
                }
                if self.deriver.market(project_id).address != market_key {
                    return Err((Rejection::ConstraintSeeds, market_key.to_string()));
                }
                if accounts.contains_key(&market_key) {
                    return Err((
                        Rejection::AlreadyInUse,
                        format!("Allocate: account {market_key} already in use"),
                    ));
                }
                let market = Market {
                    authority: signer,
                    project_id,
                    project_name,
                    yes_reserve: INITIAL_LIQUIDITY,
                    no_reserve: INITIAL_LIQUIDITY,
                    total_volume: 0,
                    status: MarketStatus::Open,
                    resolution: None,
                    resolution_timestamp,
                    created_at: self.clock.load(Ordering::Relaxed),
                    bump: Some(bump),
                };
                accounts.insert(market_key, encode_market(&market));
                VaporEvent::MarketCreated {
                    market: market_key,
                    project_id,
                    authority: signer,
                }
            }
            VaporInstruction::BuyShares {
                side,
                amount,
                position_bump,
            } => {
                if amount == 0 {
                    return Err((Rejection::InvalidAmount, String::new()));
                }
                let mut market = load_market(accounts, &market_key)?;
                if !market.is_open() {
                    return Err((Rejection::MarketClosed, String::new()));
                }
                let position_key = self.position_key(&market_key, &signer, side, key(2)?)?;
                let outcome = market
                    .reserves()
                    .buy(side, amount)
                    .map_err(|e| (Rejection::Overflow, e.to_string()))?;
                market.yes_reserve = outcome.reserves_after.yes;
                market.no_reserve = outcome.reserves_after.no;
                market.total_volume = market
                    .total_volume
                    .checked_add(amount)
                    .ok_or((Rejection::Overflow, String::new()))?;

                let mut position = load_position(accounts, &position_key).unwrap_or_else(|_| Position {
                    bump: Some(position_bump),
                    ..Position::empty(signer, market_key, side)
                });
                position
                    .record_buy(amount, outcome.shares_out)
                    .map_err(|e| (Rejection::Overflow, e.to_string()))?;
                accounts.insert(position_key, encode_position(&position));
                accounts.insert(market_key, encode_market(&market));
                VaporEvent::SharesBought {
                    market: market_key,
                    user: signer,
                    side,
                    amount,
                    shares: outcome.shares_out,
                }
            }
            VaporInstruction::SellShares { side, shares, .. } => {
                if shares == 0 {
                    return Err((Rejection::InvalidAmount, String::new()));
                }
                let mut market = load_market(accounts, &market_key)?;
                if !market.is_open() {
                    return Err((Rejection::MarketClosed, String::new()));
                }
                let position_key = self.position_key(&market_key, &signer, side, key(2)?)?;
                let mut position = load_position(accounts, &position_key)?;
                if position.shares < shares {
                    return Err((Rejection::InsufficientShares, String::new()));
                }
                let outcome = market
                    .reserves()
                    .sell(side, shares)
                    .map_err(|e| (Rejection::Overflow, e.to_string()))?;
                market.yes_reserve = outcome.reserves_after.yes;
                market.no_reserve = outcome.reserves_after.no;
                position
                    .record_sell(shares)
                    .map_err(|_| (Rejection::InsufficientShares, String::new()))?;
                accounts.insert(position_key, encode_position(&position));
                accounts.insert(market_key, encode_market(&market));
                VaporEvent::SharesSold {
                    market: market_key,
                    user: signer,
                    side,
                    shares,
                    payout: outcome.payout,
                }
            }
            VaporInstruction::ResolveMarket { winner } => {
                let mut market = load_market(accounts, &market_key)?;
                if !market.is_open() {
                    return Err((Rejection::MarketClosed, String::new()));
                }
                market
                    .resolve(&signer, winner)
                    .map_err(|_| (Rejection::Unauthorized, String::new()))?;
                accounts.insert(market_key, encode_market(&market));
                VaporEvent::MarketResolved {
                    market: market_key,
                    winner,
                }
            }
            VaporInstruction::ClaimWinnings { side } => {
                let market = load_market(accounts, &market_key)?;
                if market.status != MarketStatus::Resolved {
                    return Err((Rejection::MarketNotResolved, String::new()));
                }
                let position_key = self.position_key(&market_key, &signer, side, key(2)?)?;
                let mut position = load_position(accounts, &position_key)?;
                if position.shares == 0 {
                    return Err((Rejection::NoPosition, String::new()));
                }
                if market.resolution != Some(position.side) {
                    return Err((Rejection::PositionLost, String::new()));
                }
                // claims never touch the market account
                let payout = position.shares;
                position.shares = 0;
                accounts.insert(position_key, encode_position(&position));
                VaporEvent::WinningsClaimed {
                    market: market_key,
                    user: signer,
                    payout,
                }
            }
        };
        Ok(event)
    }

    fn position_key(
        &self,
        market: &Pubkey,
        owner: &Pubkey,
        side: Side,
        supplied: Pubkey,
    ) -> Result<Pubkey, (Rejection, String)> {
        let expected = self.deriver.position(market, owner, side).address;
        if expected == supplied {
            Ok(expected)
        } else {
            Err((Rejection::ConstraintSeeds, supplied.to_string()))
        }
    }
}

fn load_market(
    accounts: &BTreeMap<Pubkey, Vec<u8>>,
    address: &Pubkey,
) -> Result<Market, (Rejection, String)> {
    accounts
        .get(address)
        .and_then(|data| decode_market(data).ok())
        .ok_or((Rejection::AccountNotInitialized, address.to_string()))
}

fn load_position(
    accounts: &BTreeMap<Pubkey, Vec<u8>>,
    address: &Pubkey,
) -> Result<Position, (Rejection, String)> {
    accounts
        .get(address)
        .and_then(|data| decode_position(data).ok())
        .ok_or((Rejection::AccountNotInitialized, address.to_string()))
}

#[async_trait]
impl LedgerReader for InMemoryLedger {
    async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().await.accounts.get(address).cloned())
    }

    async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>> {
        let state = self.state.read().await;
        Ok(addresses
            .iter()
            .map(|address| state.accounts.get(address).cloned())
            .collect())
    }

    async fn program_accounts(&self, filters: &[MemcmpFilter]) -> Result<Vec<(Pubkey, Vec<u8>)>> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .iter()
            .filter(|(_, data)| filters.iter().all(|f| f.matches(data)))
            .map(|(address, data)| (*address, data.clone()))
            .collect())
    }

    async fn is_healthy(&self) -> bool {
        true
    }
}

#[async_trait]
impl TransactionSubmitter for InMemoryLedger {
    async fn submit(&self, instructions: &[Instruction]) -> Result<Signature> {
        self.submissions.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write().await;

        // Instructions in one transaction commit together or not at all.
        let mut scratch = state.accounts.clone();
        let mut failure = None;
        let mut logs = Vec::new();
        let program = self.deriver.program_id();
        for (index, ix) in instructions.iter().enumerate() {
            match self.apply(&mut scratch, ix) {
                Ok(event) => {
                    logs.push(format!("Program {program} invoke [1]"));
                    logs.push(event.to_log_line());
                    logs.push(format!("Program {program} success"));
                }
                Err((rejection, detail)) => {
                    failure = Some(Failure {
                        index,
                        rejection,
                        detail,
                    });
                    break;
                }
            }
        }

        let outcome = match failure {
            None => {
                state.accounts = scratch;
                ConfirmationStatus::Confirmed
            }
            Some(failure) if !self.skip_preflight => {
                debug!(reason = %failure.reason(), "Preflight rejected transaction");
                return Err(anyhow!("Transaction simulation failed: {}", failure.reason()));
            }
            Some(failure) => ConfirmationStatus::Failed {
                reason: failure.reason(),
                code: Some(failure.rejection.code()),
            },
        };

        let signature = Uuid::new_v4().simple().to_string();
        state.signatures.insert(
            signature.clone(),
            SignatureEntry {
                outcome,
                polls_left: self.confirm_after,
                logs,
            },
        );
        Ok(signature)
    }

    async fn confirmation(&self, signature: &str) -> Result<ConfirmationStatus> {
        let mut state = self.state.write().await;
        let entry = state
            .signatures
            .get_mut(signature)
            .ok_or_else(|| anyhow!("unknown signature {signature}"))?;
        if entry.polls_left > 0 {
            entry.polls_left -= 1;
            return Ok(ConfirmationStatus::Pending);
        }
        let Some(entry) = state.signatures.remove(signature) else {
            return Err(anyhow!("unknown signature {signature}"));
        };
        if entry.outcome == ConfirmationStatus::Confirmed {
            if state.recent_logs.len() == RECENT_LOGS {
                state.recent_logs.pop_front();
            }
            state.recent_logs.push_back((signature.to_string(), entry.logs));
        }
        Ok(entry.outcome)
    }

    async fn transaction_logs(&self, signature: &str) -> Result<Vec<String>> {
        let state = self.state.read().await;
        Ok(state
            .recent_logs
            .iter()
            .rev()
            .find(|(sig, _)| sig == signature)
            .map(|(_, logs)| logs.clone())
            .unwrap_or_default())
    }
}

/// Cache of decoded market views keyed by project id.
#[derive(Default)]
pub struct InMemoryMarketRepository {
    markets: RwLock<BTreeMap<u64, Market>>,
}

impl InMemoryMarketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MarketRepository for InMemoryMarketRepository {
    async fn get(&self, project_id: u64) -> Result<Option<Market>> {
        Ok(self.markets.read().await.get(&project_id).cloned())
    }

    async fn put(&self, market: Market) -> Result<()> {
        self.markets.write().await.insert(market.project_id, market);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Market>> {
        Ok(self.markets.read().await.values().cloned().collect())
    }

    async fn invalidate(&self, project_id: u64) -> Result<()> {
        self.markets.write().await.remove(&project_id);
        Ok(())
    }
}
