use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

pub const OPERATION_LOG_CAPACITY: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationKind {
    Hostname,
    StartRunner,
    StopRunner,
    SetThreads,
    StartRuntime,
    StopRuntime,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: OperationKind,
    pub host_name: String,
    pub runner_type: Option<String>,
    pub message: String,
}

/// Administrative journal, oldest entries dropped first
pub struct OperationLog {
    host_name: String,
    entries: Mutex<VecDeque<OperationEntry>>,
    capacity: usize,
}

impl OperationLog {
    pub fn new() -> Self {
        Self::with_capacity(OPERATION_LOG_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let host_name = std::env::var("HOSTNAME")
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| "localhost".to_string());
        Self {
            host_name,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity: capacity.max(1),
        }
    }

    pub fn host_name(&self) -> &str {
        &self.host_name
    }

    pub fn log(&self, kind: OperationKind, message: impl Into<String>) {
        self.push(kind, None, message.into());
    }

    pub fn log_runner(&self, kind: OperationKind, runner_type: &str, message: impl Into<String>) {
        self.push(kind, Some(runner_type.to_string()), message.into());
    }

    /// Failure of an operation. Also goes to the error log.
    pub fn log_error(&self, runner_type: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        tracing::error!("{}", message);
        self.push(OperationKind::Error, runner_type.map(str::to_string), message);
    }

    fn push(&self, kind: OperationKind, runner_type: Option<String>, message: String) {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(OperationEntry {
            timestamp: Utc::now(),
            kind,
            host_name: self.host_name.clone(),
            runner_type,
            message,
        });
    }

    /// Entries, most recent first
    pub fn entries(&self) -> Vec<OperationEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().rev().cloned().collect()
    }

    pub fn entries_for(&self, runner_type: &str) -> Vec<OperationEntry> {
        self.entries()
            .into_iter()
            .filter(|e| e.runner_type.as_deref() == Some(runner_type))
            .collect()
    }
}

impl Default for OperationLog {
    fn default() -> Self {
        Self::new()
    }
}
