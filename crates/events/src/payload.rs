//! Typed bodies of the three event kinds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use jobstream_core::{JobStatus, Metrics, Progress};

/// Body of a `status` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: JobStatus,
    pub total: Option<u64>,
}

/// Body of a `progress` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub done: u64,
    pub total: u64,
    pub percent: u32,
    pub success: u64,
    pub failed: u64,
    pub retried: u64,
    pub skipped: u64,
    #[serde(default)]
    pub current: JsonValue,
}

impl ProgressPayload {
    pub fn new(progress: Progress, metrics: Metrics, current: JsonValue) -> Self {
        Self {
            done: progress.done,
            total: progress.total,
            percent: progress.percent,
            success: metrics.success,
            failed: metrics.failed,
            retried: metrics.retried,
            skipped: metrics.skipped,
            current,
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            done: self.done,
            total: self.total,
            percent: self.percent,
        }
    }

    pub fn metrics(&self) -> Metrics {
        Metrics {
            success: self.success,
            failed: self.failed,
            retried: self.retried,
            skipped: self.skipped,
        }
    }
}

/// Severity of a `log` event.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

/// Body of a `log` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogPayload {
    pub ts: DateTime<Utc>,
    pub level: LogLevel,
    pub msg: String,
    /// Business item the line refers to (product id, row number, ...).
    pub item_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_payload_wire_shape() {
        let p = ProgressPayload::new(
            Progress::new(50, 200),
            Metrics {
                success: 48,
                failed: 2,
                ..Default::default()
            },
            serde_json::json!({"sku": "A-1"}),
        );
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["percent"], 25);
        assert_eq!(v["failed"], 2);
        assert_eq!(v["current"]["sku"], "A-1");
    }

    #[test]
    fn log_level_is_lowercase_on_the_wire() {
        assert_eq!(serde_json::to_string(&LogLevel::Warn).unwrap(), "\"warn\"");
    }
}
