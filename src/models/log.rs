//! Persisted log line (`bot_logs` table).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    /// `INFO`, `WARN`, `ERROR`
    pub level:     String,
    pub target:    String,
    pub message:   String,
}
