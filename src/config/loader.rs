//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use solana_pubkey::Pubkey;
use tracing::info;

use super::{AppConfig, LedgerConfig, LedgerMode};
use crate::adapters::rpc::MAX_MULTIPLE_ACCOUNTS;
use crate::domain::codec::MAX_NAME_LEN;

const COMMITMENTS: [&str; 3] = ["processed", "confirmed", "finalized"];

/// Read retries beyond this only lengthen the backoff tail.
pub const MAX_RETRIES_LIMIT: u32 = 10;

impl LedgerConfig {
  /// Parsed program id.
  pub fn program_id(&self) -> Result<Pubkey> {
    Pubkey::from_str(&self.program_id)
      .with_context(|| format!("Invalid program_id {:?}", self.program_id))
  }

  /// Parsed market authority, if configured.
  pub fn authority(&self) -> Result<Option<Pubkey>> {
    self
      .authority
      .as_deref()
      .map(|s| Pubkey::from_str(s).with_context(|| format!("Invalid authority {s:?}")))
      .transpose()
  }
}

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: impl AsRef<Path>) -> Result<AppConfig> {
  let path = path.as_ref();

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    mode = ?config.ledger.mode,
    program_id = %config.ledger.program_id,
    markets = config.markets.len(),
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  // Ledger validation
  let ledger = &config.ledger;
  ledger.program_id()?;
  ledger.authority()?;
  if ledger.mode == LedgerMode::Rpc {
    anyhow::ensure!(!ledger.rpc_url.is_empty(), "Ledger rpc_url must not be empty");
  }
  anyhow::ensure!(
    COMMITMENTS.contains(&ledger.commitment.as_str()),
    "Commitment must be one of {:?}, got {:?}",
    COMMITMENTS,
    ledger.commitment
  );
  anyhow::ensure!(ledger.timeout_ms > 0, "Ledger timeout_ms must be positive");
  anyhow::ensure!(
    ledger.max_retries <= MAX_RETRIES_LIMIT,
    "max_retries must be at most {}, got {}",
    MAX_RETRIES_LIMIT,
    ledger.max_retries
  );
  anyhow::ensure!(
    ledger.requests_per_second > 0,
    "requests_per_second must be positive"
  );
  anyhow::ensure!(
    ledger.batch_size > 0 && ledger.batch_size <= MAX_MULTIPLE_ACCOUNTS,
    "batch_size must be in (0, {}], got {}",
    MAX_MULTIPLE_ACCOUNTS,
    ledger.batch_size
  );

  // Trading validation
  let trading = &config.trading;
  anyhow::ensure!(
    trading.poll_interval_ms > 0,
    "poll_interval_ms must be positive"
  );
  anyhow::ensure!(
    trading.confirm_timeout_ms >= trading.poll_interval_ms,
    "confirm_timeout_ms ({}) must be at least poll_interval_ms ({})",
    trading.confirm_timeout_ms,
    trading.poll_interval_ms
  );
  anyhow::ensure!(
    trading.resolution_horizon_days > 0,
    "resolution_horizon_days must be positive"
  );

  // Market catalog validation
  let mut seen = HashSet::new();
  for (i, market) in config.markets.iter().enumerate() {
    anyhow::ensure!(
      !market.project_name.trim().is_empty(),
      "Market {} (project {}) has an empty project_name",
      i,
      market.project_id
    );
    anyhow::ensure!(
      market.project_name.len() <= MAX_NAME_LEN,
      "Market {} (project {}) name is {} bytes, max {}",
      i,
      market.project_id,
      market.project_name.len(),
      MAX_NAME_LEN
    );
    anyhow::ensure!(
      seen.insert(market.project_id),
      "Duplicate project_id {} in markets",
      market.project_id
    );
  }

  Ok(())
}
