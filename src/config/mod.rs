//! Configuration Module - TOML-based Engine Configuration
//!
//! Loads and validates configuration from `config.toml`. The program
//! id, RPC endpoint and market catalog are externalized here; the
//! domain layer only carries the deployed program id as a default.

pub mod loader;

use std::time::Duration;

use serde::Deserialize;

use crate::domain::address::VAPOR_PROGRAM_ID;

/// Top-level engine configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before the service begins operation.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  pub service: ServiceConfig,
  /// Ledger connection.
  pub ledger: LedgerConfig,
  /// Submission and confirmation parameters.
  #[serde(default)]
  pub trading: TradingConfig,
  /// HTTP API.
  #[serde(default)]
  pub api: ApiConfig,
  /// Persistence configuration.
  #[serde(default)]
  pub persistence: PersistenceConfig,
  /// Catalog of markets to ensure at startup.
  #[serde(default)]
  pub markets: Vec<MarketSeed>,
}

/// Service identity configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Where ledger reads and submissions go.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LedgerMode {
  /// Read a live cluster over JSON-RPC. Submission is external.
  Rpc,
  /// Run against the in-process ledger.
  Memory,
}

/// Ledger connection configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
  #[serde(default = "default_ledger_mode")]
  pub mode: LedgerMode,
  /// JSON-RPC endpoint.
  #[serde(default = "default_rpc_url")]
  pub rpc_url: String,
  /// Base58 program id.
  #[serde(default = "default_program_id")]
  pub program_id: String,
  /// Commitment level for reads (processed, confirmed, finalized).
  #[serde(default = "default_commitment")]
  pub commitment: String,
  /// Per-request timeout in milliseconds.
  #[serde(default = "default_timeout_ms")]
  pub timeout_ms: u64,
  /// Retries for idempotent reads.
  #[serde(default = "default_max_retries")]
  pub max_retries: u32,
  /// Base delay for exponential backoff in milliseconds.
  #[serde(default = "default_retry_base_delay_ms")]
  pub retry_base_delay_ms: u64,
  /// Ledger reads per second.
  #[serde(default = "default_requests_per_second")]
  pub requests_per_second: u32,
  /// Accounts per `getMultipleAccounts` call (at most 100).
  #[serde(default = "default_batch_size")]
  pub batch_size: usize,
  /// Authority used to create markets in memory mode (base58).
  pub authority: Option<String>,
}

/// Submission and confirmation configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct TradingConfig {
  /// Window for observing a confirmation, in milliseconds.
  #[serde(default = "default_confirm_timeout_ms")]
  pub confirm_timeout_ms: u64,
  /// Delay between confirmation polls, in milliseconds.
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
  /// Days from creation until a new market's resolution timestamp.
  #[serde(default = "default_resolution_horizon_days")]
  pub resolution_horizon_days: u32,
}

impl TradingConfig {
  pub const fn confirm_timeout(&self) -> Duration {
    Duration::from_millis(self.confirm_timeout_ms)
  }
}

impl Default for TradingConfig {
  fn default() -> Self {
    Self {
      confirm_timeout_ms: default_confirm_timeout_ms(),
      poll_interval_ms: default_poll_interval_ms(),
      resolution_horizon_days: default_resolution_horizon_days(),
    }
  }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Bind address for the read API, health checks and `/metrics`.
  #[serde(default = "default_bind_address")]
  pub bind_address: String,
  /// Seconds between background health checks.
  #[serde(default = "default_health_interval")]
  pub health_interval_seconds: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      bind_address: default_bind_address(),
      health_interval_seconds: default_health_interval(),
    }
  }
}

/// Persistence configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PersistenceConfig {
  /// Directory for JSONL trade logs.
  #[serde(default = "default_data_dir")]
  pub data_dir: String,
}

impl Default for PersistenceConfig {
  fn default() -> Self {
    Self {
      data_dir: default_data_dir(),
    }
  }
}

/// One `(project_id, project_name)` pair from the catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct MarketSeed {
  pub project_id: u64,
  pub project_name: String,
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

const fn default_ledger_mode() -> LedgerMode {
  LedgerMode::Rpc
}

fn default_rpc_url() -> String {
  "https://api.devnet.solana.com".to_string()
}

fn default_program_id() -> String {
  VAPOR_PROGRAM_ID.to_string()
}

fn default_commitment() -> String {
  "confirmed".to_string()
}

const fn default_timeout_ms() -> u64 {
  10_000
}

const fn default_max_retries() -> u32 {
  3
}

const fn default_retry_base_delay_ms() -> u64 {
  200
}

const fn default_requests_per_second() -> u32 {
  10
}

const fn default_batch_size() -> usize {
  100
}

const fn default_confirm_timeout_ms() -> u64 {
  30_000
}

const fn default_poll_interval_ms() -> u64 {
  500
}

const fn default_resolution_horizon_days() -> u32 {
  7
}

fn default_bind_address() -> String {
  "0.0.0.0:8080".to_string()
}

const fn default_health_interval() -> u64 {
  15
}

fn default_data_dir() -> String {
  "data".to_string()
}
