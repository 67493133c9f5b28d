//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to implement the
//! engine's workflows. Each use case is a self-contained operation.
//!
//! Use cases:
//! - `quote_service`: what-if pricing against a market snapshot
//! - `TradeOrchestrator`: build, submit and reconcile program instructions
//! - `Settlement`: claim sweep over resolved markets
//! - `market_view`: display summaries and aggregate statistics

pub mod market_view;
pub mod orchestrator;
pub mod quote_service;
pub mod settlement;
