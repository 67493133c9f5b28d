//! Ledger Port - Raw Account Reads
//!
//! The remote ledger holds the only authoritative copy of every market
//! and position. This port hands back raw account bytes; decoding is the
//! codec's job. All methods are idempotent reads and may be retried.

use async_trait::async_trait;
use solana_pubkey::Pubkey;

/// Byte-equality filter applied to account data during a program scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcmpFilter {
  /// Offset into the account data.
  pub offset: usize,
  /// Bytes that must appear at `offset`.
  pub bytes: Vec<u8>,
}

impl MemcmpFilter {
  pub fn new(offset: usize, bytes: impl Into<Vec<u8>>) -> Self {
    Self {
      offset,
      bytes: bytes.into(),
    }
  }

  /// Whether `data` satisfies this filter.
  pub fn matches(&self, data: &[u8]) -> bool {
    data
      .get(self.offset..self.offset + self.bytes.len())
      .is_some_and(|window| window == self.bytes.as_slice())
  }
}

/// Read access to program-owned accounts.
#[async_trait]
pub trait LedgerReader: Send + Sync + 'static {
  /// Fetch one account's data, `None` when it does not exist.
  async fn get_account(&self, address: &Pubkey) -> anyhow::Result<Option<Vec<u8>>>;

  /// Fetch several accounts in one round trip.
  ///
  /// The result is aligned with `addresses`; absent accounts are `None`.
  async fn get_multiple_accounts(
    &self,
    addresses: &[Pubkey],
  ) -> anyhow::Result<Vec<Option<Vec<u8>>>>;

  /// Every program account whose data matches all `filters`.
  async fn program_accounts(
    &self,
    filters: &[MemcmpFilter],
  ) -> anyhow::Result<Vec<(Pubkey, Vec<u8>)>>;

  /// Check if the ledger connection is healthy.
  async fn is_healthy(&self) -> bool;
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_memcmp_filter_bounds() {
    let filter = MemcmpFilter::new(2, vec![9, 9]);
    assert!(filter.matches(&[0, 0, 9, 9, 1]));
    assert!(!filter.matches(&[0, 0, 9]));
    assert!(!filter.matches(&[0, 0, 9, 8]));
  }
}
