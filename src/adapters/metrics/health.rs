//! Health State - Liveness and Readiness Checks
//!
//! `/live` answers as long as the process runs. `/ready` depends on the
//! ledger being reachable and the trade log being writable; both flags
//! are refreshed by the background health task in `main`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;

/// Shared health state polled by readiness checks.
#[derive(Debug, Clone)]
pub struct HealthState {
    /// Whether the last ledger health check passed.
    pub ledger_healthy: Arc<AtomicBool>,
    /// Whether the trade log directory is writable.
    pub sink_healthy: Arc<AtomicBool>,
}

impl HealthState {
    /// Create a new health state (all healthy by default).
    pub fn new() -> Self {
        Self {
            ledger_healthy: Arc::new(AtomicBool::new(true)),
            sink_healthy: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Check if the service is ready to serve traffic.
    pub fn is_ready(&self) -> bool {
        self.ledger_healthy.load(Ordering::Relaxed) && self.sink_healthy.load(Ordering::Relaxed)
    }

    /// Health routes, to be merged into the API router.
    pub fn routes(self: Arc<Self>) -> Router {
        Router::new()
            .route("/live", get(liveness))
            .route("/ready", get(readiness))
            .with_state(self)
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness check: always returns 200 if the process is running.
async fn liveness() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

/// Readiness check: returns 200 only if ledger and sink are healthy.
async fn readiness(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ready_requires_both_flags() {
        let state = HealthState::new();
        assert!(state.is_ready());
        state.sink_healthy.store(false, Ordering::Relaxed);
        assert!(!state.is_ready());
    }
}
