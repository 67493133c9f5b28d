//! Settlement Use Case - Claim Sweep over Resolved Markets
//!
//! Classifies an owner's positions across a set of markets and builds
//! the claim instructions for the winning ones.
//!
//! Settlement flow:
//! 1. Read every market in one batch
//! 2. Read the owner's Yes and No positions per market
//! 3. Classify: claimable, lost, pending (still Open) or void (Cancelled)
//! 4. Optionally submit each claim and log results

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use solana_instruction::Instruction;
use solana_pubkey::Pubkey;
use tracing::{error, info, instrument, warn};

use crate::domain::error::EngineError;
use crate::domain::market::{Market, MarketStatus, Position, Side};
use crate::ports::ledger::LedgerReader;
use crate::ports::repository::MarketRepository;
use crate::ports::submitter::{Signature, TransactionSubmitter};
use crate::usecases::orchestrator::TradeOrchestrator;

/// Where a single position stands after resolution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum ClaimStatus {
  /// Winning side with shares; the claim instruction is ready.
  Claimable {
    payout: u64,
    #[serde(skip)]
    instruction: Instruction,
  },
  /// Resolved against this side.
  Lost { winner: Side },
  /// Market still Open.
  Pending,
  /// Market cancelled; nothing to claim.
  Void,
}

/// Classification of one position.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementEntry {
  pub project_id: u64,
  pub side: Side,
  pub shares: u64,
  #[serde(flatten)]
  pub status: ClaimStatus,
}

/// Aggregated report from a settlement sweep.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReport {
  pub owner: String,
  pub entries: Vec<SettlementEntry>,
  /// Sum of winning shares across claimable entries.
  pub total_claimable: u64,
  /// Project ids with no market account.
  pub missing_markets: Vec<u64>,
  pub timestamp: chrono::DateTime<Utc>,
}

impl SettlementReport {
  pub fn claimable(&self) -> impl Iterator<Item = &SettlementEntry> {
    self
      .entries
      .iter()
      .filter(|e| matches!(e.status, ClaimStatus::Claimable { .. }))
  }
}

/// Result of submitting one claim.
#[derive(Debug, Clone)]
pub struct ClaimResult {
  pub project_id: u64,
  pub side: Side,
  pub payout: u64,
  pub signature: Option<Signature>,
  pub error: Option<EngineError>,
}

/// Runs claim sweeps through the trade orchestrator.
pub struct Settlement<L, S, R>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  orchestrator: Arc<TradeOrchestrator<L, S, R>>,
}

impl<L, S, R> Settlement<L, S, R>
where
  L: LedgerReader,
  S: TransactionSubmitter,
  R: MarketRepository,
{
  pub fn new(orchestrator: Arc<TradeOrchestrator<L, S, R>>) -> Self {
    Self { orchestrator }
  }

  /// Classify every position `owner` holds in `project_ids`.
  ///
  /// Builds claim instructions but submits nothing.
  #[instrument(skip(self, project_ids), fields(owner = %owner, markets = project_ids.len()))]
  pub async fn sweep(
    &self,
    owner: Pubkey,
    project_ids: &[u64],
  ) -> Result<SettlementReport, EngineError> {
    let markets: HashMap<u64, Market> = self
      .orchestrator
      .read_markets(project_ids)
      .await?
      .into_iter()
      .map(|m| (m.project_id, m))
      .collect();

    let mut entries = Vec::new();
    let mut missing_markets = Vec::new();

    for project_id in project_ids {
      let Some(market) = markets.get(project_id) else {
        missing_markets.push(*project_id);
        continue;
      };
      let positions = self.orchestrator.read_positions(&owner, *project_id).await?;
      for position in positions.iter().filter(|p| !p.is_empty()) {
        let status = self.classify(market, position)?;
        entries.push(SettlementEntry {
          project_id: *project_id,
          side: position.side,
          shares: position.shares,
          status,
        });
      }
    }

    let total_claimable = entries
      .iter()
      .filter_map(|e| match e.status {
        ClaimStatus::Claimable { payout, .. } => Some(payout),
        _ => None,
      })
      .fold(0u64, u64::saturating_add);

    info!(
      positions = entries.len(),
      total_claimable,
      missing = missing_markets.len(),
      "Settlement sweep complete"
    );

    Ok(SettlementReport {
      owner: owner.to_string(),
      entries,
      total_claimable,
      missing_markets,
      timestamp: Utc::now(),
    })
  }

  fn classify(&self, market: &Market, position: &Position) -> Result<ClaimStatus, EngineError> {
    match (market.status, market.resolution) {
      (MarketStatus::Open, _) => Ok(ClaimStatus::Pending),
      (MarketStatus::Cancelled, _) => Ok(ClaimStatus::Void),
      (MarketStatus::Resolved, Some(winner)) if winner != position.side => {
        Ok(ClaimStatus::Lost { winner })
      }
      (MarketStatus::Resolved, _) => {
        let payout = market.check_claim(position)?;
        let instruction = self.orchestrator.build_claim_instruction(
          position.owner,
          market.project_id,
          position.side,
        )?;
        Ok(ClaimStatus::Claimable {
          payout,
          instruction,
        })
      }
    }
  }

  /// Submit every claimable entry of `report`, one transaction each.
  ///
  /// A failed claim is recorded and the rest continue.
  #[instrument(skip(self, report), fields(owner = %report.owner))]
  pub async fn settle(&self, report: &SettlementReport, window: Duration) -> Vec<ClaimResult> {
    let mut results = Vec::new();
    for entry in report.claimable() {
      let ClaimStatus::Claimable {
        payout,
        instruction,
      } = &entry.status
      else {
        continue;
      };
      let submitted = self
        .orchestrator
        .submit_and_confirm(std::slice::from_ref(instruction), window)
        .await;
      match submitted {
        Ok(signature) => {
          info!(project_id = entry.project_id, payout, signature = %signature, "Claim settled");
          results.push(ClaimResult {
            project_id: entry.project_id,
            side: entry.side,
            payout: *payout,
            signature: Some(signature),
            error: None,
          });
        }
        Err(e) => {
          error!(project_id = entry.project_id, error = %e, "Claim failed");
          results.push(ClaimResult {
            project_id: entry.project_id,
            side: entry.side,
            payout: *payout,
            signature: None,
            error: Some(e),
          });
        }
      }
    }
    let failed = results.iter().filter(|r| r.error.is_some()).count();
    if failed > 0 {
      warn!(failed, total = results.len(), "Some claims failed");
    }
    results
  }
}
