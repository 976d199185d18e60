use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutorKind {
    Worker,
    Connector,
    Watcher,
}

/// Outcome of one job execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Success,
    Fail,
    DomainError,
}

/// One finished execution, written once to the history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub timestamp: DateTime<Utc>,
    pub runner_type: String,
    pub executor_kind: ExecutorKind,
    pub status: ExecutionStatus,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
}

impl ExecutionRecord {
    pub fn success(runner_type: impl Into<String>, executor_kind: ExecutorKind, duration_ms: u64) -> Self {
        Self {
            timestamp: Utc::now(),
            runner_type: runner_type.into(),
            executor_kind,
            status: ExecutionStatus::Success,
            error_code: None,
            error_message: None,
            duration_ms,
        }
    }
}

/// Receives execution records. Never reports a failure to the caller.
#[async_trait]
pub trait HistorySink: Send + Sync {
    async fn save_execution(&self, record: ExecutionRecord);
}
