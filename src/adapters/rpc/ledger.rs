//! RPC Ledger Reader - `LedgerReader` over Solana JSON-RPC
//!
//! Reads program accounts with `getAccountInfo`, `getMultipleAccounts`
//! (chunked to the node's per-call limit) and `getProgramAccounts` with
//! `memcmp` filters. Accounts not owned by the program are reported as
//! absent.
//!
//! The reader also answers confirmation polls with
//! `getSignatureStatuses` and reads program logs with `getTransaction`.
//! It holds no keys, so `submit` always fails: signed transactions go
//! out through an external wallet or relayer.

use std::str::FromStr;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use solana_instruction::Instruction;
use serde_json::json;
use solana_pubkey::Pubkey;
use tracing::{debug, instrument, warn};

use super::client::RpcClient;
use super::types::{
  encode_filter_bytes, KeyedAccount, SignatureStatus, TransactionResult, UiAccount, WithContext,
};
use crate::adapters::metrics::MetricsRegistry;
use crate::ports::ledger::{LedgerReader, MemcmpFilter};
use crate::ports::submitter::{ConfirmationStatus, Signature, TransactionSubmitter};

/// Upper bound the node accepts for one `getMultipleAccounts` call.
pub const MAX_MULTIPLE_ACCOUNTS: usize = 100;

/// Ledger reader backed by a JSON-RPC node.
pub struct RpcLedger {
  client: RpcClient,
  program_id: Pubkey,
  /// Commitment level for every read (`processed`, `confirmed`, `finalized`).
  commitment: String,
  /// Addresses per `getMultipleAccounts` call.
  batch_size: usize,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl RpcLedger {
  pub fn new(client: RpcClient, program_id: Pubkey, commitment: impl Into<String>) -> Self {
    Self {
      client,
      program_id,
      commitment: commitment.into(),
      batch_size: MAX_MULTIPLE_ACCOUNTS,
      metrics: None,
    }
  }

  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size.clamp(1, MAX_MULTIPLE_ACCOUNTS);
    self
  }

  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  fn timer(&self, method: &str) -> Option<prometheus::HistogramTimer> {
    self
      .metrics
      .as_ref()
      .map(|m| m.ledger_read_seconds.with_label_values(&[method]).start_timer())
  }

  /// Raw bytes of `account`, or `None` when it is not ours.
  fn owned_data(&self, address: &str, account: &UiAccount) -> Result<Option<Vec<u8>>> {
    if account.owner != self.program_id.to_string() {
      warn!(address, owner = %account.owner, "Account not owned by program, treating as absent");
      return Ok(None);
    }
    account.decode_data().map(Some)
  }
}

#[async_trait]
impl LedgerReader for RpcLedger {
  #[instrument(skip(self), fields(address = %address))]
  async fn get_account(&self, address: &Pubkey) -> Result<Option<Vec<u8>>> {
    let _timer = self.timer("getAccountInfo");
    let address_str = address.to_string();
    let response: WithContext<Option<UiAccount>> = self
      .client
      .call(
        "getAccountInfo",
        json!([address_str, { "encoding": "base64", "commitment": self.commitment }]),
      )
      .await
      .context("getAccountInfo failed")?;

    match response.value {
      Some(account) => self.owned_data(&address_str, &account),
      None => Ok(None),
    }
  }

  #[instrument(skip(self, addresses), fields(count = addresses.len()))]
  async fn get_multiple_accounts(&self, addresses: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>> {
    let mut out = Vec::with_capacity(addresses.len());
    for chunk in addresses.chunks(self.batch_size) {
      let _timer = self.timer("getMultipleAccounts");
      let keys: Vec<String> = chunk.iter().map(ToString::to_string).collect();
      let response: WithContext<Vec<Option<UiAccount>>> = self
        .client
        .call(
          "getMultipleAccounts",
          json!([keys, { "encoding": "base64", "commitment": self.commitment }]),
        )
        .await
        .context("getMultipleAccounts failed")?;

      anyhow::ensure!(
        response.value.len() == chunk.len(),
        "getMultipleAccounts returned {} entries for {} addresses",
        response.value.len(),
        chunk.len()
      );
      for (key, account) in keys.iter().zip(response.value) {
        out.push(match account {
          Some(account) => self.owned_data(key, &account)?,
          None => None,
        });
      }
    }
    debug!(found = out.iter().filter(|a| a.is_some()).count(), "Fetched accounts");
    Ok(out)
  }

  #[instrument(skip(self, filters), fields(filters = filters.len()))]
  async fn program_accounts(&self, filters: &[MemcmpFilter]) -> Result<Vec<(Pubkey, Vec<u8>)>> {
    let _timer = self.timer("getProgramAccounts");
    let filters: Vec<_> = filters
      .iter()
      .map(|f| {
        json!({ "memcmp": {
          "offset": f.offset,
          "bytes": encode_filter_bytes(&f.bytes),
          "encoding": "base64",
        }})
      })
      .collect();
    let accounts: Vec<KeyedAccount> = self
      .client
      .call(
        "getProgramAccounts",
        json!([
          self.program_id.to_string(),
          { "encoding": "base64", "commitment": self.commitment, "filters": filters },
        ]),
      )
      .await
      .context("getProgramAccounts failed")?;

    accounts
      .into_iter()
      .map(|keyed| {
        let address = Pubkey::from_str(&keyed.pubkey)
          .with_context(|| format!("Invalid account key {}", keyed.pubkey))?;
        Ok((address, keyed.account.decode_data()?))
      })
      .collect()
  }

  async fn is_healthy(&self) -> bool {
    matches!(
      self.client.call::<_, String>("getHealth", json!([])).await.as_deref(),
      Ok("ok")
    )
  }
}

#[async_trait]
impl TransactionSubmitter for RpcLedger {
  async fn submit(&self, instructions: &[Instruction]) -> Result<Signature> {
    bail!(
      "RPC ledger holds no signing key; submit the {} instruction(s) through a wallet",
      instructions.len()
    )
  }

  #[instrument(skip(self))]
  async fn confirmation(&self, signature: &str) -> Result<ConfirmationStatus> {
    let _timer = self.timer("getSignatureStatuses");
    let response: WithContext<Vec<Option<SignatureStatus>>> = self
      .client
      .call(
        "getSignatureStatuses",
        json!([[signature], { "searchTransactionHistory": false }]),
      )
      .await
      .context("getSignatureStatuses failed")?;

    let Some(Some(status)) = response.value.into_iter().next() else {
      return Ok(ConfirmationStatus::Pending);
    };
    if let Some(err) = &status.err {
      return Ok(ConfirmationStatus::Failed {
        reason: format!("Transaction {signature} failed: {err}"),
        code: status.custom_code(),
      });
    }
    if status.reached(&self.commitment) {
      Ok(ConfirmationStatus::Confirmed)
    } else {
      Ok(ConfirmationStatus::Pending)
    }
  }

  #[instrument(skip(self))]
  async fn transaction_logs(&self, signature: &str) -> Result<Vec<String>> {
    let _timer = self.timer("getTransaction");
    // `getTransaction` accepts `confirmed` or `finalized` only
    let commitment = if self.commitment == "finalized" { "finalized" } else { "confirmed" };
    let transaction: Option<TransactionResult> = self
      .client
      .call_optional(
        "getTransaction",
        json!([
          signature,
          { "encoding": "json", "commitment": commitment, "maxSupportedTransactionVersion": 0 },
        ]),
      )
      .await
      .context("getTransaction failed")?;
    Ok(
      transaction
        .and_then(|t| t.meta)
        .and_then(|meta| meta.log_messages)
        .unwrap_or_default(),
    )
  }
}
