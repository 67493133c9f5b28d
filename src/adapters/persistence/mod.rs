//! Persistence Adapters - In-memory State and JSONL Trade Log
//!
//! `memory` holds the in-memory ledger double and the market view
//! cache; `trades` appends confirmed trades to daily JSONL files.

pub mod memory;
pub mod trades;

pub use memory::{InMemoryLedger, InMemoryMarketRepository, INITIAL_LIQUIDITY};
pub use trades::JsonlTradeLog;
