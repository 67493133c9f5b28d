//! Metrics and Monitoring Adapters
//!
//! Prometheus metrics rendered on `/metrics` and health checks
//! (`/live`, `/ready`), all served by the HTTP API router.

pub mod health;
pub mod prometheus;

pub use health::HealthState;
pub use prometheus::MetricsRegistry;
