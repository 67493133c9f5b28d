//! Market and position records as held by the ledger program.
//!
//! These are decoded, read-only views. The ledger is the source of truth;
//! anything built from these values may be stale the moment it is read.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use solana_pubkey::Pubkey;

use super::cpmm::Reserves;
use super::error::EngineError;

/// Outcome side of a binary market.
///
/// The discriminant is the byte the program uses in seeds and payloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Yes = 0,
    No = 1,
}

impl Side {
    /// Wire byte for this side.
    pub const fn as_byte(self) -> u8 {
        self as u8
    }

    /// Parse a wire byte; anything other than 0 or 1 is not a side.
    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Yes),
            1 => Some(Self::No),
            _ => None,
        }
    }

    /// The other side of the market.
    pub const fn opposite(self) -> Self {
        match self {
            Self::Yes => Self::No,
            Self::No => Self::Yes,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Yes => write!(f, "yes"),
            Self::No => write!(f, "no"),
        }
    }
}

impl FromStr for Side {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yes" => Ok(Self::Yes),
            "no" => Ok(Self::No),
            other => Err(EngineError::Validation(format!(
                "invalid side {other:?}, expected \"yes\" or \"no\""
            ))),
        }
    }
}

/// Lifecycle status of a market account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MarketStatus {
    Open,
    Resolved,
    /// Present in the program's enum; no instruction currently sets it.
    Cancelled,
}

impl MarketStatus {
    pub const fn as_byte(self) -> u8 {
        match self {
            Self::Open => 0,
            Self::Resolved => 1,
            Self::Cancelled => 2,
        }
    }

    pub const fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(Self::Open),
            1 => Some(Self::Resolved),
            2 => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// Decoded market account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Market {
    /// The only key allowed to resolve this market.
    pub authority: Pubkey,
    /// Externally assigned project identifier.
    pub project_id: u64,
    /// Project display name (UTF-8, at most 64 bytes).
    pub project_name: String,
    /// Pooled balance backing the YES side, in lamports.
    pub yes_reserve: u64,
    /// Pooled balance backing the NO side, in lamports.
    pub no_reserve: u64,
    /// Cumulative deposits, never decreases.
    pub total_volume: u64,
    pub status: MarketStatus,
    /// Set exactly once, when `status` becomes `Resolved`.
    pub resolution: Option<Side>,
    /// Unix seconds after which the authority intends to resolve.
    pub resolution_timestamp: u64,
    /// Unix seconds of creation.
    pub created_at: u64,
    /// Canonical bump stored by the program, if the account carries it.
    pub bump: Option<u8>,
}

impl Market {
    /// Current pool reserves.
    pub const fn reserves(&self) -> Reserves {
        Reserves::new(self.yes_reserve, self.no_reserve)
    }

    pub fn is_open(&self) -> bool {
        self.status == MarketStatus::Open
    }

    /// Buys and sells require an Open market.
    pub fn ensure_open(&self) -> Result<(), EngineError> {
        if self.is_open() {
            Ok(())
        } else {
            Err(EngineError::MarketClosed(self.project_id))
        }
    }

    /// Check that `signer` may move this market from Open to Resolved.
    ///
    /// Resolving anything but an Open market is an invalid transition.
    pub fn check_resolve(&self, signer: &Pubkey) -> Result<(), EngineError> {
        if self.status != MarketStatus::Open {
            return Err(EngineError::InvalidTransition(format!(
                "market {} is {:?}, only Open markets can be resolved",
                self.project_id, self.status
            )));
        }
        if *signer != self.authority {
            return Err(EngineError::Validation(format!(
                "{signer} is not the authority of market {}",
                self.project_id
            )));
        }
        Ok(())
    }

    /// Apply the terminal Open → Resolved transition to this view.
    ///
    /// On error the view is left untouched.
    pub fn resolve(&mut self, signer: &Pubkey, winner: Side) -> Result<(), EngineError> {
        self.check_resolve(signer)?;
        self.status = MarketStatus::Resolved;
        self.resolution = Some(winner);
        Ok(())
    }

    /// Check a claim for `position` and return the payout in lamports.
    ///
    /// One winning share pays one lamport. Losing and empty positions
    /// are rejected rather than paying zero.
    pub fn check_claim(&self, position: &Position) -> Result<u64, EngineError> {
        let winner = match (self.status, self.resolution) {
            (MarketStatus::Resolved, Some(winner)) => winner,
            _ => {
                return Err(EngineError::InvalidTransition(format!(
                    "market {} is not resolved",
                    self.project_id
                )));
            }
        };
        if position.shares == 0 {
            return Err(EngineError::ClaimRejected(format!(
                "no {} shares to claim in market {}",
                position.side, self.project_id
            )));
        }
        if position.side != winner {
            return Err(EngineError::ClaimRejected(format!(
                "{} position lost, market {} resolved {winner}",
                position.side, self.project_id
            )));
        }
        Ok(position.shares)
    }
}

/// Decoded position account, one per (market, owner, side).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Position {
    pub owner: Pubkey,
    pub market: Pubkey,
    pub side: Side,
    pub shares: u64,
    /// Lamports per share, informational only.
    pub avg_price: u64,
    pub bump: Option<u8>,
}

impl Position {
    /// An empty position for `owner` on `side`, before its first buy.
    pub const fn empty(owner: Pubkey, market: Pubkey, side: Side) -> Self {
        Self {
            owner,
            market,
            side,
            shares: 0,
            avg_price: 0,
            bump: None,
        }
    }

    /// A zero-share record displays as "no position".
    pub const fn is_empty(&self) -> bool {
        self.shares == 0
    }

    /// Accumulate a buy into this position the way the program does.
    ///
    /// The first buy sets `avg_price = amount / shares`; later buys
    /// re-average over the combined cost basis with integer division.
    pub fn record_buy(&mut self, amount: u64, shares: u64) -> Result<(), EngineError> {
        let overflow = || EngineError::Validation("position bookkeeping overflow".into());
        if self.shares == 0 {
            self.shares = shares;
            self.avg_price = amount.checked_div(shares).unwrap_or(0);
            return Ok(());
        }
        let total_cost = self
            .avg_price
            .checked_mul(self.shares)
            .and_then(|c| c.checked_add(amount))
            .ok_or_else(overflow)?;
        self.shares = self.shares.checked_add(shares).ok_or_else(overflow)?;
        self.avg_price = total_cost.checked_div(self.shares).unwrap_or(0);
        Ok(())
    }

    /// Remove sold shares; selling more than held is rejected.
    pub fn record_sell(&mut self, shares: u64) -> Result<(), EngineError> {
        self.shares = self.shares.checked_sub(shares).ok_or_else(|| {
            EngineError::Validation(format!(
                "cannot sell {shares} {} shares, only {} held",
                self.side, self.shares
            ))
        })?;
        Ok(())
    }
}
