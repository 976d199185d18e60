//! Runner execution runtime
//!
//! This crate discovers runners, binds them to job subscriptions on the
//! engine, wraps every execution with the parameter contract and keeps the
//! execution history.

mod admin;
mod config;
mod container;
mod discovery;
mod dispatch;
pub mod engine;
mod executor;
mod history;
mod loader;
mod operations;
mod plugin;
mod registry;
mod runtime;
mod storage;

pub use admin::{RunnerAdmin, RunnerInformation};
pub use config::{ClientConfig, RuntimeConfig};
pub use container::{ContainerError, ContainerState, JobClientContainer};
pub use discovery::{DiscoverySettings, RunnerFactory};
pub use dispatch::{DispatchSettings, JobDispatchFactory, RunnerState};
pub use executor::{RunnerJobHandler, RESULT_VARIABLE_HEADER, SLOW_EXECUTION};
pub use history::{HistoryFactory, Interval, IntervalRule, Performance, PeriodStatistic, Statistic};
pub use loader::{
    is_reserved, ArchiveHandle, ArchiveLoader, ClassCatalog, ComponentConstructor, LoaderError,
    ManifestArchiveLoader, RESERVED_PREFIXES,
};
pub use plugin::{DylibArchiveLoader, LibraryFormat, REGISTRATION_SYMBOL};
pub use operations::{OperationEntry, OperationKind, OperationLog, OPERATION_LOG_CAPACITY};
pub use registry::{detect_runners, Component, EmbeddedCatalog};
pub use runtime::{RelayRuntime, RelayRuntimeBuilder};
pub use storage::{Archive, Filter, Origin, RunnerDefinition, RunnerStorage, LOAD_LOG_LIMIT};
