use crate::discovery::RunnerFactory;
use crate::dispatch::{JobDispatchFactory, RunnerState};
use crate::history::{HistoryFactory, Performance, PeriodStatistic, Statistic};
use crate::operations::{OperationEntry, OperationLog};
use crate::storage::{Filter, RunnerDefinition};
use chrono::{Duration, Utc};
use relaycore::{OperationError, RunnerDescriptor, RunnerKind};
use serde::Serialize;
use std::sync::Arc;

/// What the administration shows about one runner
#[derive(Debug, Clone, Serialize)]
pub struct RunnerInformation {
    pub definition: RunnerDefinition,
    pub label: String,
    pub kind: Option<RunnerKind>,
    /// Absent when the runner can't be rebuilt from its definition
    pub descriptor: Option<RunnerDescriptor>,
    pub definition_errors: Vec<String>,
    pub state: Option<RunnerState>,
    pub statistic: Option<Statistic>,
}

/// Administrative operations over the runners
pub struct RunnerAdmin {
    discovery: Arc<RunnerFactory>,
    dispatch: Arc<JobDispatchFactory>,
    history: Arc<HistoryFactory>,
    operations: Arc<OperationLog>,
}

impl RunnerAdmin {
    pub fn new(
        discovery: Arc<RunnerFactory>,
        dispatch: Arc<JobDispatchFactory>,
        history: Arc<HistoryFactory>,
        operations: Arc<OperationLog>,
    ) -> Self {
        Self {
            discovery,
            dispatch,
            history,
            operations,
        }
    }

    pub async fn list_runners(&self, with_status: bool, with_statistic: bool) -> Vec<RunnerInformation> {
        let definitions = self.discovery.storage().definitions(&Filter::all()).await;
        let mut list = Vec::with_capacity(definitions.len());
        for definition in definitions {
            list.push(self.information(definition, with_status, with_statistic).await);
        }
        list
    }

    pub async fn runner_detail(&self, name: &str) -> Result<RunnerInformation, OperationError> {
        let definition = self
            .discovery
            .storage()
            .definition(name)
            .await
            .ok_or_else(|| OperationError::NotFound(name.to_string()))?;
        Ok(self.information(definition, true, true).await)
    }

    async fn information(
        &self,
        definition: RunnerDefinition,
        with_status: bool,
        with_statistic: bool,
    ) -> RunnerInformation {
        let runner = self.discovery.runner_for_definition(&definition).await;
        let state = if with_status {
            Some(self.dispatch.runner_state(&definition.runner_type).await)
        } else {
            None
        };
        let statistic = if with_statistic {
            let since = Utc::now() - Duration::hours(24);
            Some(self.history.statistic(&definition.runner_type, since).await)
        } else {
            None
        };
        let (label, kind, descriptor, definition_errors) = match runner {
            Some(runner) => (
                runner.descriptor().display_label(),
                Some(runner.kind()),
                Some(runner.descriptor().clone()),
                runner.check_valid_definition(),
            ),
            None => (
                definition.name.clone(),
                None,
                None,
                vec![format!("Runner [{}] can't be loaded", definition.name)],
            ),
        };
        RunnerInformation {
            definition,
            label,
            kind,
            descriptor,
            definition_errors,
            state,
            statistic,
        }
    }

    /// Accepts a runner name or a runner type
    async fn resolve_type(&self, name: &str) -> Result<String, OperationError> {
        let storage = self.discovery.storage();
        if let Some(definition) = storage.definition(name).await {
            return Ok(definition.runner_type);
        }
        if !storage.definitions(&Filter::by_type(name)).await.is_empty() {
            return Ok(name.to_string());
        }
        Err(OperationError::NotFound(name.to_string()))
    }

    pub async fn start_runner(&self, name: &str) -> Result<RunnerState, OperationError> {
        let runner_type = self.resolve_type(name).await?;
        self.dispatch.start_runner(&runner_type).await?;
        Ok(self.dispatch.runner_state(&runner_type).await)
    }

    pub async fn stop_runner(&self, name: &str) -> Result<RunnerState, OperationError> {
        let runner_type = self.resolve_type(name).await?;
        self.dispatch.stop_runner(&runner_type).await?;
        Ok(self.dispatch.runner_state(&runner_type).await)
    }

    pub async fn performance(&self, runner_type: &str, period: PeriodStatistic) -> Performance {
        self.history.performance(runner_type, period, Utc::now()).await
    }

    pub fn operations(&self) -> Vec<OperationEntry> {
        self.operations.entries()
    }

    /// Stores a new archive version and registers its runners
    pub async fn upload_archive(&self, name: &str, bytes: Vec<u8>) -> Vec<RunnerDefinition> {
        self.discovery.load_archive(name, bytes, Some(Utc::now()), true).await
    }

    /// Stops every runner of the archive, then forgets them and the archive.
    /// Returns the names of the deleted definitions.
    pub async fn delete_archive(&self, name: &str) -> Result<Vec<String>, OperationError> {
        let storage = self.discovery.storage();
        if storage.archive(name).await.is_none() {
            return Err(OperationError::ArchiveNotFound(name.to_string()));
        }

        let definitions = storage.definitions(&Filter::by_archive(name)).await;
        let mut blocked = Vec::new();
        for definition in &definitions {
            match self.dispatch.stop_runner(&definition.runner_type).await {
                Ok(()) | Err(OperationError::AlreadyStopped(_)) => {}
                Err(e) => {
                    tracing::error!("Can't stop [{}]: {}", definition.runner_type, e);
                    blocked.push(definition.runner_type.clone());
                }
            }
        }
        if !blocked.is_empty() {
            return Err(OperationError::CantStop {
                runner_type: blocked.join(","),
                seconds: 0,
            });
        }

        let mut deleted = Vec::with_capacity(definitions.len());
        for definition in definitions {
            storage.remove_definition(&definition.name).await;
            self.history.purge(&definition.runner_type).await;
            deleted.push(definition.name);
        }
        storage.remove_archive(name).await;
        tracing::info!("Archive [{}] deleted with {} runners", name, deleted.len());
        Ok(deleted)
    }
}
