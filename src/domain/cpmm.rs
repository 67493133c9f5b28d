//! Constant-product market maker (CPMM) pricing.
//!
//! Integer-only. Every division floors, and every floor is taken in the
//! direction the ledger program takes it, so a quote computed here is the
//! exact number of shares (or lamports) the program will hand out.
//!
//! Buying a side deposits into the *opposite* reserve and pays shares out
//! of the bought side's reserve:
//!
//! ```text
//! k            = same * opposite
//! new_opposite = opposite + deposit
//! new_same     = floor(k / new_opposite)
//! shares_out   = same - new_same
//! ```
//!
//! `new_same * new_opposite <= k` always holds, so a buy never grows the
//! product. Displayed odds are inverse to reserves: a side's percentage is
//! the other side's share of the pool.

use rust_decimal::Decimal;
use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use super::error::EngineError;
use super::market::Side;

/// Price impact above this many percentage points gets a caller warning.
pub const PRICE_IMPACT_WARNING_POINTS: u32 = 5;

/// Lamports per SOL.
pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Compute shares issued for `deposit` against `(reserve_same, reserve_opposite)`.
///
/// `reserve_same` is the reserve of the side being bought.
///
/// # Errors
/// - zero deposit
/// - an empty reserve (the pool must never be drained)
/// - a deposit that would overflow the opposite reserve
/// - a deposit so large the bought reserve would round to zero
pub fn quote_buy(
    reserve_same: u64,
    reserve_opposite: u64,
    deposit: u64,
) -> Result<u64, EngineError> {
    if deposit == 0 {
        return Err(EngineError::Validation("deposit must be positive".into()));
    }
    ensure_reserves(reserve_same, reserve_opposite)?;

    let new_opposite = reserve_opposite.checked_add(deposit).ok_or_else(|| {
        EngineError::Validation(format!(
            "deposit {deposit} overflows reserve {reserve_opposite}"
        ))
    })?;

    let k = u128::from(reserve_same) * u128::from(reserve_opposite);
    let new_same = k / u128::from(new_opposite);
    if new_same == 0 {
        return Err(EngineError::Validation(format!(
            "deposit {deposit} would drain the reserve"
        )));
    }

    // new_same <= reserve_same because new_opposite >= reserve_opposite
    Ok(reserve_same - new_same as u64)
}

/// Compute lamports paid out for selling `shares` back into the pool.
///
/// The sold side's reserve grows by `shares`; the opposite reserve pays
/// out down to `floor(k / new_same)`.
pub fn quote_sell(
    reserve_same: u64,
    reserve_opposite: u64,
    shares: u64,
) -> Result<u64, EngineError> {
    if shares == 0 {
        return Err(EngineError::Validation("shares to sell must be positive".into()));
    }
    ensure_reserves(reserve_same, reserve_opposite)?;

    let new_same = reserve_same.checked_add(shares).ok_or_else(|| {
        EngineError::Validation(format!("selling {shares} overflows reserve {reserve_same}"))
    })?;

    let k = u128::from(reserve_same) * u128::from(reserve_opposite);
    let new_opposite = k / u128::from(new_same);
    if new_opposite == 0 {
        return Err(EngineError::Validation(format!(
            "selling {shares} would drain the opposite reserve"
        )));
    }

    Ok(reserve_opposite - new_opposite as u64)
}

fn ensure_reserves(reserve_same: u64, reserve_opposite: u64) -> Result<(), EngineError> {
    if reserve_same == 0 || reserve_opposite == 0 {
        return Err(EngineError::Validation(format!(
            "empty reserve ({reserve_same}, {reserve_opposite})"
        )));
    }
    Ok(())
}

/// Displayed odds in whole percentage points.
///
/// The two values are rounded independently and may not sum to 100.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Odds {
    pub yes: u32,
    pub no: u32,
}

impl Odds {
    pub const fn for_side(&self, side: Side) -> u32 {
        match side {
            Side::Yes => self.yes,
            Side::No => self.no,
        }
    }
}

/// Odds are inverse to reserves: YES shows NO's share of the pool.
///
/// Rounds half up like `Math.round`. An empty pool shows 50/50.
pub fn calculate_odds(yes_reserve: u64, no_reserve: u64) -> Odds {
    let total = u128::from(yes_reserve) + u128::from(no_reserve);
    if total == 0 {
        return Odds { yes: 50, no: 50 };
    }
    Odds {
        yes: round_percent(no_reserve, total),
        no: round_percent(yes_reserve, total),
    }
}

fn round_percent(part: u64, total: u128) -> u32 {
    // floor(part * 100 / total + 1/2)
    let scaled = u128::from(part) * 200 + total;
    (scaled / (2 * total)) as u32
}

/// Absolute move of the traded side's displayed percentage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceImpact {
    pub points: u32,
    /// Set when `points` exceeds [`PRICE_IMPACT_WARNING_POINTS`]; never blocks.
    pub warning: bool,
}

pub fn price_impact(old: Odds, new: Odds, side: Side) -> PriceImpact {
    let points = old.for_side(side).abs_diff(new.for_side(side));
    PriceImpact {
        points,
        warning: points > PRICE_IMPACT_WARNING_POINTS,
    }
}

/// YES/NO reserve pair of one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reserves {
    pub yes: u64,
    pub no: u64,
}

/// Result of simulating a buy against a reserve pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuyOutcome {
    pub shares_out: u64,
    pub reserves_after: Reserves,
}

/// Result of simulating a sell against a reserve pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SellOutcome {
    pub payout: u64,
    pub reserves_after: Reserves,
}

impl Reserves {
    pub const fn new(yes: u64, no: u64) -> Self {
        Self { yes, no }
    }

    /// Reserve backing `side`.
    pub const fn of(&self, side: Side) -> u64 {
        match side {
            Side::Yes => self.yes,
            Side::No => self.no,
        }
    }

    /// `yes * no`, exact.
    pub fn product(&self) -> u128 {
        u128::from(self.yes) * u128::from(self.no)
    }

    pub fn odds(&self) -> Odds {
        calculate_odds(self.yes, self.no)
    }

    /// Simulate buying `side` with `deposit` lamports.
    ///
    /// The deposit lands in the opposite reserve; shares leave the bought one.
    pub fn buy(&self, side: Side, deposit: u64) -> Result<BuyOutcome, EngineError> {
        let same = self.of(side);
        let opposite = self.of(side.opposite());
        let shares_out = quote_buy(same, opposite, deposit)?;
        let reserves_after = Self::from_sides(side, same - shares_out, opposite + deposit);
        Ok(BuyOutcome {
            shares_out,
            reserves_after,
        })
    }

    /// Simulate selling `shares` of `side` back to the pool.
    pub fn sell(&self, side: Side, shares: u64) -> Result<SellOutcome, EngineError> {
        let same = self.of(side);
        let opposite = self.of(side.opposite());
        let payout = quote_sell(same, opposite, shares)?;
        let reserves_after = Self::from_sides(side, same + shares, opposite - payout);
        Ok(SellOutcome {
            payout,
            reserves_after,
        })
    }

    const fn from_sides(side: Side, same: u64, opposite: u64) -> Self {
        match side {
            Side::Yes => Self::new(same, opposite),
            Side::No => Self::new(opposite, same),
        }
    }
}

/// Convert lamports to SOL for display.
pub fn lamports_to_sol(lamports: u64) -> Decimal {
    Decimal::from(lamports) / Decimal::from(LAMPORTS_PER_SOL)
}

/// Convert a SOL amount to lamports, truncating sub-lamport dust.
pub fn sol_to_lamports(sol: Decimal) -> Result<u64, EngineError> {
    if sol <= Decimal::ZERO {
        return Err(EngineError::Validation(format!("amount {sol} SOL must be positive")));
    }
    (sol * Decimal::from(LAMPORTS_PER_SOL))
        .trunc()
        .to_u64()
        .ok_or_else(|| EngineError::Validation(format!("amount {sol} SOL out of range")))
}

/// Lamports paid per share, rounded to 4 decimal places for display.
pub fn price_per_share(amount: u64, shares: u64) -> Option<Decimal> {
    if shares == 0 {
        return None;
    }
    Some((Decimal::from(amount) / Decimal::from(shares)).round_dp(4))
}
