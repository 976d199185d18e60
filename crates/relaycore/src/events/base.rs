use crate::ExecutionRecord;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events published by the runtime while runners are managed and executed
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RuntimeEvent {
    RunnerStarted {
        runner_type: String,
        timestamp: DateTime<Utc>,
    },
    RunnerStopped {
        runner_type: String,
        timestamp: DateTime<Utc>,
    },
    RunnerFailed {
        runner_type: String,
        error: String,
        timestamp: DateTime<Utc>,
    },
    ThreadsChanged {
        threads: usize,
        timestamp: DateTime<Utc>,
    },
    ConnectionChanged {
        connected: bool,
        timestamp: DateTime<Utc>,
    },
    ExecutionRecorded {
        record: ExecutionRecord,
    },
    RunnerLog {
        runner_type: String,
        job_key: i64,
        event: RunnerLogEvent,
        timestamp: DateTime<Utc>,
    },
}

/// Messages a runner emits while it handles a job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum RunnerLogEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter bound to one job of one runner
#[derive(Clone)]
pub struct EventEmitter {
    runner_type: String,
    job_key: i64,
    sender: broadcast::Sender<RuntimeEvent>,
}

impl EventEmitter {
    pub fn new(runner_type: impl Into<String>, job_key: i64, sender: broadcast::Sender<RuntimeEvent>) -> Self {
        Self {
            runner_type: runner_type.into(),
            job_key,
            sender,
        }
    }

    /// Emitter nobody listens to
    pub fn detached(runner_type: impl Into<String>, job_key: i64) -> Self {
        let (sender, _) = broadcast::channel(1);
        Self::new(runner_type, job_key, sender)
    }

    pub fn emit(&self, event: RunnerLogEvent) {
        let _ = self.sender.send(RuntimeEvent::RunnerLog {
            runner_type: self.runner_type.clone(),
            job_key: self.job_key,
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!("[{}] {}", self.runner_type, message);
        self.emit(RunnerLogEvent::Info { message });
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!("[{}] {}", self.runner_type, message);
        self.emit(RunnerLogEvent::Warning { message });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(RunnerLogEvent::Progress { percent, message });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<RuntimeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.sender.subscribe()
    }

    pub fn emit(&self, event: RuntimeEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, runner_type: &str, job_key: i64) -> EventEmitter {
        EventEmitter::new(runner_type, job_key, self.sender.clone())
    }
}
