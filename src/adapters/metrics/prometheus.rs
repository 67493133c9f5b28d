//! Prometheus Metrics Registry - Engine Observability
//!
//! Registers the `vapor_engine_*` metrics and renders them in the text
//! exposition format for the `/metrics` route of the HTTP API. Covers
//! quotes, instruction building, account decoding, ledger reads and
//! confirmation outcomes.

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Centralized Prometheus metrics for the engine.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Quotes served, by side.
    pub quotes_served: IntCounterVec,
    /// Quotes refused, by error kind.
    pub quotes_rejected: IntCounterVec,
    /// Instructions encoded, by instruction kind.
    pub instructions_built: IntCounterVec,
    /// Accounts that failed to decode, by layout.
    pub decode_failures: IntCounterVec,
    /// Ledger read latency (seconds), by RPC method.
    pub ledger_read_seconds: HistogramVec,
    /// Confirmation outcomes: confirmed, failed, timeout, already_exists.
    pub confirmations: IntCounterVec,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let quotes_served = IntCounterVec::new(
            Opts::new("vapor_engine_quotes_served_total", "Quotes served"),
            &["side"],
        )?;

        let quotes_rejected = IntCounterVec::new(
            Opts::new("vapor_engine_quotes_rejected_total", "Quotes refused"),
            &["reason"],
        )?;

        let instructions_built = IntCounterVec::new(
            Opts::new(
                "vapor_engine_instructions_built_total",
                "Program instructions encoded",
            ),
            &["kind"],
        )?;

        let decode_failures = IntCounterVec::new(
            Opts::new(
                "vapor_engine_decode_failures_total",
                "Accounts skipped because they were absent or malformed",
            ),
            &["layout"],
        )?;

        let ledger_read_seconds = HistogramVec::new(
            HistogramOpts::new(
                "vapor_engine_ledger_read_seconds",
                "Ledger read latency in seconds",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]),
            &["method"],
        )?;

        let confirmations = IntCounterVec::new(
            Opts::new(
                "vapor_engine_confirmations_total",
                "Submission outcomes after confirmation polling",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(quotes_served.clone()))?;
        registry.register(Box::new(quotes_rejected.clone()))?;
        registry.register(Box::new(instructions_built.clone()))?;
        registry.register(Box::new(decode_failures.clone()))?;
        registry.register(Box::new(ledger_read_seconds.clone()))?;
        registry.register(Box::new(confirmations.clone()))?;

        Ok(Self {
            registry,
            quotes_served,
            quotes_rejected,
            instructions_built,
            decode_failures,
            ledger_read_seconds,
            confirmations,
        })
    }

    /// Render every registered metric in the text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
