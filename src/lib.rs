//! Vapor Engine - Library Root
//!
//! Client-side engine for Vapor CPMM prediction markets: pricing,
//! program wire format, address derivation and trade orchestration.
//! Re-exports all modules for the service binary, integration tests
//! and benchmarks.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod usecases;
