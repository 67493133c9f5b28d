//! Market Views - Display Summaries and Aggregate Statistics
//!
//! Read-side projections of decoded accounts for the HTTP API. Amounts
//! stay in lamports for exactness; the `_sol` fields are display copies.
//!
//! Trader counts come from position accounts: anyone who ever opened a
//! position in a market counts, even after selling out. Price history is
//! read back from the post-trade snapshots in the trade log.

use std::collections::{BTreeSet, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use solana_pubkey::Pubkey;

use crate::domain::address::AddressDeriver;
use crate::domain::cpmm::{lamports_to_sol, Odds};
use crate::domain::error::EngineError;
use crate::domain::market::{Market, MarketStatus, Position, Side};
use crate::domain::trade::{TradeKind, TradeRecord};
use crate::ports::repository::TradeHistory;

/// Distinct traders per market and overall.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Participation {
  per_market: HashMap<Pubkey, BTreeSet<Pubkey>>,
  traders: BTreeSet<Pubkey>,
}

impl Participation {
  pub fn from_positions(positions: &[Position]) -> Self {
    let mut participation = Self::default();
    for position in positions {
      participation
        .per_market
        .entry(position.market)
        .or_default()
        .insert(position.owner);
      participation.traders.insert(position.owner);
    }
    participation
  }

  /// Owners with a position account in the market at `address`.
  pub fn participants(&self, address: &Pubkey) -> usize {
    self.per_market.get(address).map_or(0, BTreeSet::len)
  }

  /// Owners with a position account in any market.
  pub fn total_traders(&self) -> usize {
    self.traders.len()
  }
}

/// One market as shown to a display client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketSummary {
  pub project_id: u64,
  pub project_name: String,
  pub address: String,
  pub yes_reserve: u64,
  pub no_reserve: u64,
  pub odds: Odds,
  pub total_volume: u64,
  pub total_volume_sol: Decimal,
  pub status: MarketStatus,
  pub resolution: Option<Side>,
  pub resolution_timestamp: u64,
  pub participants: usize,
}

impl MarketSummary {
  pub fn from_market(market: &Market, deriver: &AddressDeriver, participation: &Participation) -> Self {
    let address = deriver.market(market.project_id).address;
    Self {
      project_id: market.project_id,
      project_name: market.project_name.clone(),
      address: address.to_string(),
      yes_reserve: market.yes_reserve,
      no_reserve: market.no_reserve,
      odds: market.reserves().odds(),
      total_volume: market.total_volume,
      total_volume_sol: lamports_to_sol(market.total_volume),
      status: market.status,
      resolution: market.resolution,
      resolution_timestamp: market.resolution_timestamp,
      participants: participation.participants(&address),
    }
  }
}

/// Totals across every known market.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketStats {
  pub total_markets: usize,
  pub active_markets: usize,
  pub resolved_markets: usize,
  /// Lamports, saturating.
  pub total_volume: u64,
  pub total_volume_sol: Decimal,
  /// Distinct owners across all markets.
  pub total_traders: usize,
}

impl MarketStats {
  pub fn from_markets(markets: &[Market], participation: &Participation) -> Self {
    let total_volume = markets
      .iter()
      .map(|m| m.total_volume)
      .fold(0u64, u64::saturating_add);
    Self {
      total_markets: markets.len(),
      active_markets: markets.iter().filter(|m| m.is_open()).count(),
      resolved_markets: markets
        .iter()
        .filter(|m| m.status == MarketStatus::Resolved)
        .count(),
      total_volume,
      total_volume_sol: lamports_to_sol(total_volume),
      total_traders: participation.total_traders(),
    }
  }
}

/// Window of `GET /markets/:id/history`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub enum HistoryRange {
  #[serde(rename = "1h")]
  Hour,
  #[default]
  #[serde(rename = "24h")]
  Day,
  #[serde(rename = "7d")]
  Week,
  #[serde(rename = "30d")]
  Month,
  #[serde(rename = "all")]
  All,
}

impl HistoryRange {
  /// Unrecognised or missing ranges fall back to the default window.
  pub fn parse_or_default(raw: Option<&str>) -> Self {
    raw.and_then(|r| r.parse().ok()).unwrap_or_default()
  }

  /// Earliest timestamp inside the window, `None` for everything.
  pub fn since(self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let span = match self {
      Self::Hour => Duration::hours(1),
      Self::Day => Duration::hours(24),
      Self::Week => Duration::days(7),
      Self::Month => Duration::days(30),
      Self::All => return None,
    };
    Some(now - span)
  }
}

impl FromStr for HistoryRange {
  type Err = EngineError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim() {
      "1h" => Ok(Self::Hour),
      "24h" => Ok(Self::Day),
      "7d" => Ok(Self::Week),
      "30d" => Ok(Self::Month),
      "all" => Ok(Self::All),
      other => Err(EngineError::Validation(format!(
        "invalid range {other:?}, expected 1h, 24h, 7d, 30d or all"
      ))),
    }
  }
}

/// Pool state right after one confirmed trade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PricePoint {
  pub timestamp: DateTime<Utc>,
  pub yes_odds: u32,
  pub no_odds: u32,
  pub yes_reserve: u64,
  pub no_reserve: u64,
  pub total_volume: u64,
  pub side: Side,
  pub kind: TradeKind,
  pub signature: String,
}

/// Price history of `project_id` over `range`, ending at `now`.
pub async fn load_history(
  history: &dyn TradeHistory,
  project_id: u64,
  range: HistoryRange,
  now: DateTime<Utc>,
) -> Result<Vec<PricePoint>, EngineError> {
  let records = history
    .trades_since(project_id, range.since(now))
    .await
    .map_err(|e| EngineError::remote(&e))?;
  Ok(price_history(&records))
}

/// Price points for the records that carry a snapshot, oldest first.
pub fn price_history(records: &[TradeRecord]) -> Vec<PricePoint> {
  let mut points: Vec<PricePoint> = records
    .iter()
    .filter_map(|record| {
      let pool = record.pool_after?;
      Some(PricePoint {
        timestamp: record.timestamp,
        yes_odds: pool.odds.yes,
        no_odds: pool.odds.no,
        yes_reserve: pool.yes_reserve,
        no_reserve: pool.no_reserve,
        total_volume: pool.total_volume,
        side: record.side,
        kind: record.kind,
        signature: record.signature.clone(),
      })
    })
    .collect();
  points.sort_by_key(|p| p.timestamp);
  points
}

/// One position as shown to its owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PositionView {
  pub market: String,
  pub side: Side,
  pub shares: u64,
  /// Average lamports paid per share, floored.
  pub avg_price: u64,
  pub cost_basis_sol: Decimal,
}

impl From<&Position> for PositionView {
  fn from(position: &Position) -> Self {
    let cost = u128::from(position.shares) * u128::from(position.avg_price);
    Self {
      market: position.market.to_string(),
      side: position.side,
      shares: position.shares,
      avg_price: position.avg_price,
      cost_basis_sol: lamports_to_sol(u64::try_from(cost).unwrap_or(u64::MAX)),
    }
  }
}
