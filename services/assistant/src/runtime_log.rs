//! Timing table of response latencies and tool durations.
//!
//! Each measurement is logged and appended to a JSON Lines file as
//! `{"timestamp": ..., "function": ..., "duration": "0.1234"}`.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{info, warn};

/// Name under which response latency is recorded.
pub const RESPONSE_LATENCY: &str = "realtime_api_response";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TimingRecord {
    pub timestamp: String,
    pub function: String,
    /// Seconds, formatted with four decimals.
    pub duration: String,
}

impl TimingRecord {
    pub fn new(function: &str, duration: Duration) -> Self {
        Self {
            timestamp: chrono::Local::now()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
            function: function.to_string(),
            duration: format!("{:.4}", duration.as_secs_f64()),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RuntimeLog {
    path: Option<PathBuf>,
}

impl RuntimeLog {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    /// A log that only emits tracing events.
    pub fn disabled() -> Self {
        Self { path: None }
    }

    /// Logs the measurement and appends it to the file. File errors are
    /// reported and otherwise ignored.
    pub async fn record(&self, function: &str, duration: Duration) {
        info!(function, "{}() took {:.4} seconds", function, duration.as_secs_f64());
        let Some(path) = &self.path else {
            return;
        };
        let record = TimingRecord::new(function, duration);
        if let Err(e) = append_line(path, &record).await {
            warn!(path = %path.display(), error = %e, "Failed to append runtime log.");
        }
    }
}

async fn append_line(path: &Path, record: &TimingRecord) -> std::io::Result<()> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(line.as_bytes()).await?;
    file.flush().await
}
