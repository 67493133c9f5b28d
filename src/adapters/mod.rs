//! Adapters Layer - Hexagonal Architecture Outer Ring
//!
//! Implements the port traits defined in `crate::ports` with concrete
//! external dependencies (JSON-RPC, file I/O, HTTP). Each sub-module
//! groups adapters by infrastructure concern.
//!
//! Adapter categories:
//! - `http`: read-only API for display clients
//! - `metrics`: Prometheus metrics export and health checks
//! - `persistence`: in-memory ledger, market cache and JSONL trade log
//! - `rpc`: JSON-RPC ledger reader

pub mod http;
pub mod metrics;
pub mod persistence;
pub mod rpc;
