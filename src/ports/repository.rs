//! Repository Port - Decoded Views and Trade Records
//!
//! `MarketRepository` caches decoded market views keyed by project id.
//! It is never authoritative: entries must be invalidated after any
//! mutating call and re-read from the ledger. `TradeSink` is the
//! analytics write path for confirmed trades, and `TradeHistory` reads
//! them back for price charts.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::market::Market;
use crate::domain::trade::TradeRecord;

/// Cache of decoded market views.
#[async_trait]
pub trait MarketRepository: Send + Sync + 'static {
  /// Cached view for `project_id`, if any.
  async fn get(&self, project_id: u64) -> anyhow::Result<Option<Market>>;

  /// Insert or replace the view for `market.project_id`.
  async fn put(&self, market: Market) -> anyhow::Result<()>;

  /// All cached views, ordered by project id.
  async fn list(&self) -> anyhow::Result<Vec<Market>>;

  /// Drop the view for `project_id` so the next read goes to the ledger.
  async fn invalidate(&self, project_id: u64) -> anyhow::Result<()>;
}

/// Append-only sink for confirmed trades.
#[async_trait]
pub trait TradeSink: Send + Sync + 'static {
  /// Record one confirmed trade.
  async fn record(&self, record: &TradeRecord) -> anyhow::Result<()>;

  /// Total records written since startup.
  fn recorded(&self) -> u64;
}

/// Read path over recorded trades.
#[async_trait]
pub trait TradeHistory: Send + Sync + 'static {
  /// Records for `project_id` at or after `since`, oldest first.
  async fn trades_since(
    &self,
    project_id: u64,
    since: Option<DateTime<Utc>>,
  ) -> anyhow::Result<Vec<TradeRecord>>;
}
