//! Domain layer - Core pricing, wire format and market model.
//!
//! Pure logic for the Vapor CPMM engine. Nothing in here performs I/O;
//! every function is deterministic and testable in isolation
//! (hexagonal architecture inner ring).

pub mod address;
pub mod codec;
pub mod cpmm;
pub mod error;
pub mod market;
pub mod trade;

// Re-export core types for convenience
pub use address::{AddressDeriver, ProgramAddress};
pub use codec::VaporInstruction;
pub use cpmm::{calculate_odds, price_impact, quote_buy, quote_sell, Odds, PriceImpact, Reserves};
pub use error::EngineError;
pub use market::{Market, MarketStatus, Position, Side};
pub use trade::{Fill, FillSource, PoolSnapshot, TradeKind, TradeRecord, TradeRequest};
