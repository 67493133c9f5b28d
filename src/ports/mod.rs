//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the usecases layer requires
//! from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `LedgerReader`: Raw account reads against the remote ledger
//! - `TransactionSubmitter`: Single-shot submission and confirmation polling
//! - `MarketRepository`: Invalidatable cache of decoded market views
//! - `TradeSink`: Analytics record of confirmed trades
//! - `TradeHistory`: Time-windowed reads of recorded trades

pub mod ledger;
pub mod repository;
pub mod submitter;

pub use ledger::{LedgerReader, MemcmpFilter};
pub use repository::{MarketRepository, TradeHistory, TradeSink};
pub use submitter::{ConfirmationStatus, Signature, TransactionSubmitter};
