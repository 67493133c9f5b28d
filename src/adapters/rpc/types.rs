//! JSON-RPC wire types for the account-read methods.

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// JSON-RPC 2.0 request envelope.
#[derive(Debug, Serialize)]
pub struct RpcRequest<'a, P> {
  pub jsonrpc: &'static str,
  pub id: u64,
  pub method: &'a str,
  pub params: P,
}

/// JSON-RPC 2.0 response envelope.
#[derive(Debug, Deserialize)]
pub struct RpcResponse<T> {
  pub result: Option<T>,
  pub error: Option<RpcErrorObject>,
}

/// Error object returned by the node.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcErrorObject {
  pub code: i64,
  pub message: String,
}

/// `{ context, value }` wrapper used by most account methods.
#[derive(Debug, Deserialize)]
pub struct WithContext<T> {
  pub value: T,
}

/// Account as returned with `"encoding": "base64"`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UiAccount {
  /// `[payload, "base64"]`.
  pub data: (String, String),
  pub owner: String,
  pub lamports: u64,
}

impl UiAccount {
  /// Decode the base64 payload into raw account bytes.
  pub fn decode_data(&self) -> Result<Vec<u8>> {
    anyhow::ensure!(
      self.data.1 == "base64",
      "unexpected account encoding {:?}",
      self.data.1
    );
    STANDARD
      .decode(&self.data.0)
      .context("Invalid base64 account data")
  }
}

/// Element of a `getProgramAccounts` result.
#[derive(Debug, Deserialize)]
pub struct KeyedAccount {
  pub pubkey: String,
  pub account: UiAccount,
}

/// Entry of a `getSignatureStatuses` result.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignatureStatus {
  pub slot: u64,
  /// Transaction error, `null` on success.
  pub err: Option<serde_json::Value>,
  /// `processed`, `confirmed` or `finalized`.
  pub confirmation_status: Option<String>,
}

impl SignatureStatus {
  /// Whether the status has reached `commitment` or beyond.
  pub fn reached(&self, commitment: &str) -> bool {
    let rank = |level: &str| match level {
      "processed" => 0,
      "confirmed" => 1,
      "finalized" => 2,
      _ => 3,
    };
    self
      .confirmation_status
      .as_deref()
      .is_some_and(|status| rank(status) >= rank(commitment) && rank(status) < 3)
  }

  /// Custom program error code from `{"InstructionError":[i,{"Custom":n}]}`.
  pub fn custom_code(&self) -> Option<u32> {
    self
      .err
      .as_ref()?
      .get("InstructionError")?
      .get(1)?
      .get("Custom")?
      .as_u64()
      .and_then(|code| u32::try_from(code).ok())
  }
}

/// `getTransaction` result; only the metadata is read.
#[derive(Debug, Deserialize)]
pub struct TransactionResult {
  pub meta: Option<TransactionMeta>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionMeta {
  pub err: Option<serde_json::Value>,
  #[serde(default)]
  pub log_messages: Option<Vec<String>>,
}

/// Encode filter bytes for a `memcmp` filter.
pub fn encode_filter_bytes(bytes: &[u8]) -> String {
  STANDARD.encode(bytes)
}
