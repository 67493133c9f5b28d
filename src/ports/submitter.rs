//! Submitter Port - Transaction Submission and Confirmation
//!
//! Signing and fee payment live behind this port (wallet, keypair
//! service, relayer). The engine only hands over instructions and then
//! watches the signature. `submit` is called at most once per logical
//! trade; nothing in the engine resends a mutating instruction.
//!
//! Confirmed transactions may also expose their program logs, which
//! carry the events with the exact amounts each trade moved.

use async_trait::async_trait;
use solana_instruction::Instruction;

/// Transaction signature in its base58 text form.
pub type Signature = String;

/// Observed state of a submitted transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfirmationStatus {
  /// Not yet confirmed at the configured commitment.
  Pending,
  /// Landed and executed successfully.
  Confirmed,
  /// Landed and failed, or was dropped.
  Failed {
    /// Remote rejection text, verbatim.
    reason: String,
    /// Custom program error code, if the rejection carried one.
    code: Option<u32>,
  },
}

/// Trait for transaction submission providers.
#[async_trait]
pub trait TransactionSubmitter: Send + Sync + 'static {
  /// Sign and send one transaction carrying `instructions`.
  ///
  /// # Errors
  /// Returns the remote rejection (e.g. a failed preflight) verbatim.
  async fn submit(&self, instructions: &[Instruction]) -> anyhow::Result<Signature>;

  /// Current confirmation status of `signature`. Idempotent.
  async fn confirmation(&self, signature: &str) -> anyhow::Result<ConfirmationStatus>;

  /// Program log lines of a confirmed transaction.
  ///
  /// Providers that keep no logs return an empty list, and callers then
  /// fall back to account reads.
  async fn transaction_logs(&self, _signature: &str) -> anyhow::Result<Vec<String>> {
    Ok(Vec::new())
  }
}
