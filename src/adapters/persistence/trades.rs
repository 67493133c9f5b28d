//! Trade Log - Append-only JSONL Trade Records
//!
//! Persists confirmed trades to daily JSONL files in the format
//! `trades/YYYY-MM-DD.jsonl` (UTC). Each line is a self-contained JSON
//! record for easy parsing, streaming, and crash recovery. Windowed
//! reads skip whole files dated before the window starts.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument, warn};

use crate::domain::trade::TradeRecord;
use crate::ports::repository::{TradeHistory, TradeSink};

/// Append-only JSONL trade log with daily file rotation.
pub struct JsonlTradeLog {
    /// Base directory for trade files.
    trades_dir: PathBuf,
    /// Records appended since startup.
    written: AtomicU64,
}

impl JsonlTradeLog {
    /// Create a trade log under `data_dir/trades`.
    pub async fn new(data_dir: impl AsRef<Path>) -> Result<Self> {
        let trades_dir = data_dir.as_ref().join("trades");
        fs::create_dir_all(&trades_dir)
            .await
            .context("Failed to create trades directory")?;
        Ok(Self {
            trades_dir,
            written: AtomicU64::new(0),
        })
    }

    /// Append a trade record to the file for its UTC day.
    #[instrument(skip(self, record), fields(trade_id = %record.id, project_id = record.project_id))]
    pub async fn append(&self, record: &TradeRecord) -> Result<()> {
        let date = record.timestamp.format("%Y-%m-%d").to_string();
        let path = self.trades_dir.join(format!("{date}.jsonl"));

        let mut json = serde_json::to_string(record).context("Failed to serialize trade record")?;
        json.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .context("Failed to open trade log file")?;

        file.write_all(json.as_bytes())
            .await
            .context("Failed to write trade record")?;
        file.flush().await.context("Failed to flush trade log")?;

        self.written.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Load every record from every daily file, oldest first.
    pub async fn load_all(&self) -> Result<Vec<TradeRecord>> {
        self.load_since(None).await
    }

    /// Load records stamped at or after `since`, oldest first.
    #[instrument(skip(self))]
    pub async fn load_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<TradeRecord>> {
        let mut trades = Vec::new();
        let mut entries = fs::read_dir(&self.trades_dir).await?;
        let first_day = since.map(|t| t.date_naive());

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "jsonl") {
                let day = path
                    .file_stem()
                    .and_then(|stem| stem.to_str())
                    .and_then(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok());
                if let (Some(day), Some(first)) = (day, first_day) {
                    if day < first {
                        debug!(file = %path.display(), "Skipping trade file before window");
                        continue;
                    }
                }
                let content = fs::read_to_string(&path).await?;
                for line in content.lines().filter(|l| !l.trim().is_empty()) {
                    match serde_json::from_str::<TradeRecord>(line) {
                        Ok(record) => trades.push(record),
                        Err(e) => {
                            warn!(file = %path.display(), error = %e, "Skipping malformed trade record");
                        }
                    }
                }
            }
        }

        if let Some(since) = since {
            trades.retain(|t| t.timestamp >= since);
        }
        trades.sort_by_key(|t| t.timestamp);
        info!(count = trades.len(), "Loaded trade records");
        Ok(trades)
    }

    /// Check if the trades directory is writable.
    pub async fn is_healthy(&self) -> bool {
        let marker = self.trades_dir.join(".health_check");
        let result = fs::write(&marker, b"ok").await;
        let _ = fs::remove_file(&marker).await;
        result.is_ok()
    }
}

#[async_trait]
impl TradeSink for JsonlTradeLog {
    async fn record(&self, record: &TradeRecord) -> Result<()> {
        self.append(record).await
    }

    fn recorded(&self) -> u64 {
        self.written.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl TradeHistory for JsonlTradeLog {
    async fn trades_since(
        &self,
        project_id: u64,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<TradeRecord>> {
        let mut trades = self.load_since(since).await?;
        trades.retain(|t| t.project_id == project_id);
        Ok(trades)
    }
}
