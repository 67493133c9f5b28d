//! Trade requests and trade records.
//!
//! Requests arriving from loosely typed callers are parsed into a
//! [`TradeRequest`] before they reach pricing or encoding; anything that
//! does not fit is rejected here.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;
use uuid::Uuid;

use super::cpmm::Odds;
use super::error::EngineError;
use super::market::{Market, Side};

/// Direction of a trade against the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    /// Deposit lamports, receive shares.
    Buy,
    /// Return shares, receive lamports.
    Sell,
}

impl fmt::Display for TradeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// A trade that has passed boundary validation.
///
/// `amount` is lamports for a buy and shares for a sell; it is never zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TradeRequest {
    pub owner: Pubkey,
    pub project_id: u64,
    pub side: Side,
    pub kind: TradeKind,
    pub amount: u64,
}

impl TradeRequest {
    pub fn new(
        owner: Pubkey,
        project_id: u64,
        side: Side,
        kind: TradeKind,
        amount: u64,
    ) -> Result<Self, EngineError> {
        if amount == 0 {
            return Err(EngineError::Validation(format!(
                "{kind} amount must be greater than zero"
            )));
        }
        Ok(Self {
            owner,
            project_id,
            side,
            kind,
            amount,
        })
    }

    /// Parse the string-typed fields a wallet or form would send.
    pub fn parse(
        owner: &str,
        project_id: u64,
        side: &str,
        kind: TradeKind,
        amount: u64,
    ) -> Result<Self, EngineError> {
        let owner = Pubkey::from_str(owner.trim())
            .map_err(|e| EngineError::Validation(format!("invalid owner {owner:?}: {e}")))?;
        Self::new(owner, project_id, side.parse()?, kind, amount)
    }
}

/// Where a reported fill amount came from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillSource {
    /// The program's own trade event in the transaction logs.
    Event,
    /// Change of the owner's position account across the trade.
    PositionDelta,
    /// Quote against the pre-trade reserves; other trades may have landed first.
    #[default]
    Estimate,
}

/// Amount a confirmed trade delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Fill {
    /// Shares received (buy) or lamports received (sell).
    pub amount: u64,
    pub source: FillSource,
}

impl Fill {
    pub const fn new(amount: u64, source: FillSource) -> Self {
        Self { amount, source }
    }
}

/// Pool state observed right after a trade, kept for price history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub yes_reserve: u64,
    pub no_reserve: u64,
    pub total_volume: u64,
    pub odds: Odds,
}

impl PoolSnapshot {
    pub fn of(market: &Market) -> Self {
        Self {
            yes_reserve: market.yes_reserve,
            no_reserve: market.no_reserve,
            total_volume: market.total_volume,
            odds: market.reserves().odds(),
        }
    }
}

/// A confirmed trade as handed to the analytics sink.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TradeRecord {
    pub id: Uuid,
    /// Transaction signature returned by the submitter.
    pub signature: String,
    pub project_id: u64,
    /// Base58 owner key.
    pub owner: String,
    pub side: Side,
    pub kind: TradeKind,
    /// Lamports in (buy) or shares in (sell).
    pub amount: u64,
    /// Shares received (buy) or lamports received (sell).
    pub filled: u64,
    #[serde(default)]
    pub fill_source: FillSource,
    /// Absent on records written before snapshots were kept.
    #[serde(default)]
    pub pool_after: Option<PoolSnapshot>,
    pub timestamp: DateTime<Utc>,
}

impl TradeRecord {
    pub fn confirmed(
        request: &TradeRequest,
        signature: impl Into<String>,
        fill: Fill,
        pool_after: PoolSnapshot,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            signature: signature.into(),
            project_id: request.project_id,
            owner: request.owner.to_string(),
            side: request.side,
            kind: request.kind,
            amount: request.amount,
            filled: fill.amount,
            fill_source: fill.source,
            pool_after: Some(pool_after),
            timestamp: Utc::now(),
        }
    }
}
