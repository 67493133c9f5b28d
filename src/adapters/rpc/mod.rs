//! Solana JSON-RPC Adapter
//!
//! Implements `LedgerReader` and confirmation polling against a JSON-RPC
//! node. Reads only: signing and sending are left to an external wallet
//! or relayer.
//!
//! Sub-modules:
//! - `client`: HTTP client with rate limiting and retries
//! - `ledger`: The `LedgerReader` implementation
//! - `types`: JSON-RPC request/response type definitions

pub mod client;
pub mod ledger;
pub mod types;

pub use client::{RpcClient, RpcClientConfig};
pub use ledger::{RpcLedger, MAX_MULTIPLE_ACCOUNTS};
