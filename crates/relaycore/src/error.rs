use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Runner error: {0}")]
    Runner(#[from] RunnerError),

    #[error("Operation error: {0}")]
    Operation(#[from] OperationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Error raised while a runner handles one job
#[derive(Error, Debug, Clone)]
pub enum RunnerError {
    /// Named error the runner raises on purpose (BPMN error)
    #[error("[{code}] {message}")]
    Domain { code: String, message: String },

    #[error("{0}")]
    Contract(#[from] ContractError),

    #[error("Missing required input: {0}")]
    MissingInput(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),
}

impl RunnerError {
    pub fn domain(code: impl Into<String>, message: impl Into<String>) -> Self {
        RunnerError::Domain {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Code reported to the engine and to the history
    pub fn code(&self) -> &str {
        match self {
            RunnerError::Domain { code, .. } => code,
            RunnerError::Contract(contract) => contract.code(),
            _ => "Exception",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    Input,
    Output,
}

/// The values received or produced do not match the declared parameters
#[derive(Debug, Clone, PartialEq)]
pub struct ContractError {
    pub kind: ContractKind,
    pub runner_type: String,
    pub violations: Vec<String>,
}

impl ContractError {
    pub const INPUT_CODE: &'static str = "INPUT_CONTRACT_ERROR";
    pub const OUTPUT_CODE: &'static str = "OUTPUT_CONTRACT_ERROR";

    pub fn code(&self) -> &'static str {
        match self.kind {
            ContractKind::Input => Self::INPUT_CODE,
            ContractKind::Output => Self::OUTPUT_CODE,
        }
    }

    /// True when one of the violations talks about `name`
    pub fn mentions(&self, name: &str) -> bool {
        let needle = format!("[{}]", name);
        self.violations.iter().any(|v| v.contains(&needle))
    }
}

impl fmt::Display for ContractError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let side = match self.kind {
            ContractKind::Input => "InputContract",
            ContractKind::Output => "OutputContract",
        };
        write!(
            f,
            "Worker [{}] {} Exception: {}",
            self.runner_type,
            side,
            self.violations.join("; ")
        )
    }
}

impl std::error::Error for ContractError {}

/// Failure of an administrative operation on runners
#[derive(Error, Debug, Clone)]
pub enum OperationError {
    #[error("Runner [{0}] is already started")]
    AlreadyStarted(String),

    #[error("Runner [{0}] is already stopped")]
    AlreadyStopped(String),

    #[error("No runner found for [{0}]")]
    NotFound(String),

    #[error("Too many runners ({count}) match type [{runner_type}]")]
    TooManyMatches { runner_type: String, count: usize },

    #[error("Runner [{name}] has an invalid definition: {}", errors.join("; "))]
    InvalidDefinition { name: String, errors: Vec<String> },

    #[error("Can't stop runner [{runner_type}] in {seconds}s")]
    CantStop { runner_type: String, seconds: u64 },

    #[error("Unknown runner kind for [{0}]")]
    UnknownRunnerKind(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Archive [{0}] not found")]
    ArchiveNotFound(String),
}

impl OperationError {
    pub fn code(&self) -> &'static str {
        match self {
            OperationError::AlreadyStarted(_) => "ALREADY_STARTED",
            OperationError::AlreadyStopped(_) => "ALREADY_STOPPED",
            OperationError::NotFound(_) => "NOT_FOUND",
            OperationError::TooManyMatches { .. } => "TOO_MANY",
            OperationError::InvalidDefinition { .. } => "INVALID_DEFINITION",
            OperationError::CantStop { .. } => "CANT_STOP",
            OperationError::UnknownRunnerKind(_) => "UNKNOWN_RUNNER_KIND",
            OperationError::Connection(_) => "CONNECTION",
            OperationError::ArchiveNotFound(_) => "ARCHIVE_NOT_FOUND",
        }
    }

    pub fn human_information(&self) -> String {
        format!("Code: [{}] {}", self.code(), self)
    }
}
