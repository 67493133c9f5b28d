//! Quote Service - What-if Pricing Against a Snapshot
//!
//! Answers "what would happen if I traded X" from a market snapshot the
//! caller already holds. Nothing here reads the ledger, submits, or
//! mutates the snapshot; freshness is the caller's concern.

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::cpmm::{price_impact, price_per_share, Odds, PriceImpact, Reserves};
use crate::domain::error::EngineError;
use crate::domain::market::{Market, Side};

/// Caller-facing hint attached to high-impact quotes.
pub const HIGH_IMPACT_WARNING: &str = "High price impact. Consider splitting order.";

/// Simulated outcome of a buy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
  pub project_id: u64,
  pub side: Side,
  /// Lamports deposited.
  pub deposit: u64,
  /// Shares the pool would issue.
  pub shares_out: u64,
  /// Lamports per share for this fill, if any shares are issued.
  pub price_per_share: Option<Decimal>,
  pub current_odds: Odds,
  pub new_odds: Odds,
  pub price_impact: PriceImpact,
  /// Set when the impact crosses the warning threshold.
  pub warning: Option<&'static str>,
  pub reserves_after: Reserves,
}

/// Simulated outcome of a sell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SellQuote {
  pub project_id: u64,
  pub side: Side,
  pub shares: u64,
  /// Lamports the pool would pay out.
  pub payout: u64,
  pub current_odds: Odds,
  pub new_odds: Odds,
  pub price_impact: PriceImpact,
  pub warning: Option<&'static str>,
  pub reserves_after: Reserves,
}

/// Quote a buy of `deposit` lamports on `side`.
///
/// # Errors
/// `MarketClosed` when the snapshot is not Open, `Validation` for a zero
/// deposit or a trade the pool cannot absorb.
pub fn quote(snapshot: &Market, side: Side, deposit: u64) -> Result<Quote, EngineError> {
  snapshot.ensure_open()?;
  let reserves = snapshot.reserves();
  let outcome = reserves.buy(side, deposit)?;

  let current_odds = reserves.odds();
  let new_odds = outcome.reserves_after.odds();
  let impact = price_impact(current_odds, new_odds, side);

  Ok(Quote {
    project_id: snapshot.project_id,
    side,
    deposit,
    shares_out: outcome.shares_out,
    price_per_share: price_per_share(deposit, outcome.shares_out),
    current_odds,
    new_odds,
    price_impact: impact,
    warning: impact.warning.then_some(HIGH_IMPACT_WARNING),
    reserves_after: outcome.reserves_after,
  })
}

/// Quote selling `shares` of `side` back to the pool.
pub fn quote_sell(snapshot: &Market, side: Side, shares: u64) -> Result<SellQuote, EngineError> {
  snapshot.ensure_open()?;
  let reserves = snapshot.reserves();
  let outcome = reserves.sell(side, shares)?;

  let current_odds = reserves.odds();
  let new_odds = outcome.reserves_after.odds();
  let impact = price_impact(current_odds, new_odds, side);

  Ok(SellQuote {
    project_id: snapshot.project_id,
    side,
    shares,
    payout: outcome.payout,
    current_odds,
    new_odds,
    price_impact: impact,
    warning: impact.warning.then_some(HIGH_IMPACT_WARNING),
    reserves_after: outcome.reserves_after,
  })
}
