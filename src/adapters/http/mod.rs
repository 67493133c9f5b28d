//! Read-only HTTP API (axum): market summaries, quotes, positions,
//! aggregate stats, Prometheus metrics and health checks.

pub mod response;
pub mod routes;

pub use routes::{router, ApiState};
