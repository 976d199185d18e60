//! Core abstractions for the relay runtime
//!
//! This crate provides the runner model, the parameter contract and the
//! execution record that every other component depends on.

pub mod contract;
mod error;
pub mod events;
mod history;
mod job;
mod parameter;
mod runner;
pub mod secret;
mod value;

pub use error::{ContractError, ContractKind, OperationError, RelayError, RunnerError};
pub use events::*;
pub use history::{ExecutionRecord, ExecutionStatus, ExecutorKind, HistorySink};
pub use job::{ActivatedJob, JobContext};
pub use parameter::{
    Choice, Condition, ContractSchema, Group, Level, ParamType, RunnerParameter, ACCESS_ALL_VARIABLES,
};
pub use runner::{
    humanize, Connector, ConnectorDeclaration, ContextExecution, DeclaredError, JobHandlerFn,
    JobWorkerMethod, OutboundFunction, Runner, RunnerDescriptor, RunnerKind, SdkConnector, SdkWorker,
    Worker,
};
pub use secret::{ConfigSecretProvider, NoSecrets, SecretProvider};
pub use value::{Value, Variables};

/// Result type for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
