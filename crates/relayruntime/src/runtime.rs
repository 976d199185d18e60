use crate::admin::RunnerAdmin;
use crate::config::RuntimeConfig;
use crate::container::JobClientContainer;
use crate::discovery::{DiscoverySettings, RunnerFactory};
use crate::dispatch::{DispatchSettings, JobDispatchFactory};
use crate::engine::JobEngine;
use crate::history::HistoryFactory;
use crate::loader::{ArchiveLoader, ClassCatalog, ManifestArchiveLoader};
use crate::operations::{OperationKind, OperationLog};
use crate::registry::EmbeddedCatalog;
use crate::storage::RunnerStorage;
use relaycore::{ConfigSecretProvider, EventBus, HistorySink, RelayError, RuntimeEvent, SecretProvider};
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Everything needed to run runners against one engine
pub struct RelayRuntime {
    config: RuntimeConfig,
    events: Arc<EventBus>,
    history: Arc<HistoryFactory>,
    operations: Arc<OperationLog>,
    container: Arc<JobClientContainer>,
    discovery: Arc<RunnerFactory>,
    dispatch: Arc<JobDispatchFactory>,
    admin: Arc<RunnerAdmin>,
    health: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

/// Assembles a [`RelayRuntime`]
pub struct RelayRuntimeBuilder {
    config: RuntimeConfig,
    engine: Arc<dyn JobEngine>,
    embedded: EmbeddedCatalog,
    loader: Option<Arc<dyn ArchiveLoader>>,
    mirrors: Vec<Arc<dyn HistorySink>>,
    secrets: Option<Arc<dyn SecretProvider>>,
}

impl RelayRuntimeBuilder {
    pub fn embedded(mut self, catalog: EmbeddedCatalog) -> Self {
        self.embedded = catalog;
        self
    }

    pub fn archive_loader(mut self, loader: Arc<dyn ArchiveLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Archives resolve their classes against this catalog
    pub fn class_catalog(self, catalog: ClassCatalog) -> Self {
        self.archive_loader(Arc::new(ManifestArchiveLoader::new(catalog)))
    }

    /// Replaces the configured secrets
    pub fn secrets(mut self, provider: Arc<dyn SecretProvider>) -> Self {
        self.secrets = Some(provider);
        self
    }

    /// Extra sink receiving every execution record
    pub fn history_mirror(mut self, sink: Arc<dyn HistorySink>) -> Self {
        self.mirrors.push(sink);
        self
    }

    pub fn build(self) -> RelayRuntime {
        let config = self.config;
        let events = Arc::new(EventBus::new(config.event_buffer_size));
        let history = Arc::new(
            self.mirrors
                .into_iter()
                .fold(HistoryFactory::new(), HistoryFactory::with_mirror),
        );
        let operations = Arc::new(OperationLog::new());
        let secrets: Arc<dyn SecretProvider> = match self.secrets {
            Some(provider) => provider,
            None => Arc::new(ConfigSecretProvider::new(config.secrets.clone())),
        };
        let storage = Arc::new(RunnerStorage::new());
        let loader: Arc<dyn ArchiveLoader> = match self.loader {
            Some(loader) => loader,
            None => Arc::new(ManifestArchiveLoader::new(ClassCatalog::new())),
        };

        let container = Arc::new(JobClientContainer::new(
            self.engine,
            config.client.clone(),
            events.clone(),
        ));
        let discovery = Arc::new(RunnerFactory::new(
            storage,
            self.embedded,
            loader,
            history.clone(),
            operations.clone(),
            DiscoverySettings {
                upload_path: config.upload_path.clone(),
                archive_extension: config.archive_extension.clone(),
                force_refresh: config.force_refresh,
            },
        ));
        let dispatch = Arc::new(JobDispatchFactory::new(
            container.clone(),
            discovery.clone(),
            history.clone(),
            events.clone(),
            operations.clone(),
            secrets,
            DispatchSettings {
                start_framework_runners: config.start_framework_runners,
                close_timeout: config.close_timeout(),
                close_poll_interval: config.close_poll_interval(),
            },
        ));
        let admin = Arc::new(RunnerAdmin::new(
            discovery.clone(),
            dispatch.clone(),
            history.clone(),
            operations.clone(),
        ));

        RelayRuntime {
            config,
            events,
            history,
            operations,
            container,
            discovery,
            dispatch,
            admin,
            health: Mutex::new(None),
        }
    }
}

impl RelayRuntime {
    pub fn builder(config: RuntimeConfig, engine: Arc<dyn JobEngine>) -> RelayRuntimeBuilder {
        RelayRuntimeBuilder {
            config,
            engine,
            embedded: EmbeddedCatalog::new(),
            loader: None,
            mirrors: Vec::new(),
            secrets: None,
        }
    }

    /// Discovers runners, connects and starts every active runner
    pub async fn start(&self) -> Result<usize, RelayError> {
        self.operations
            .log(OperationKind::Hostname, format!("Host [{}]", self.operations.host_name()));
        self.discovery.init().await?;
        self.discovery.synchronize().await;
        let started = self.dispatch.start_all().await?;

        let cancel = CancellationToken::new();
        let handle = self
            .container
            .spawn_health_check(self.config.health_check_interval(), cancel.clone());
        if let Some((previous, _)) = self.health.lock().await.replace((cancel, handle)) {
            previous.cancel();
        }
        Ok(started)
    }

    /// Stops every runner, then disconnects
    pub async fn shutdown(&self) {
        if let Some((cancel, handle)) = self.health.lock().await.take() {
            cancel.cancel();
            if let Err(e) = handle.await {
                tracing::warn!("Health check ended abnormally: {}", e);
            }
        }
        self.dispatch.stop_all().await;
        tracing::info!("Runtime stopped");
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<RuntimeEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn history(&self) -> &Arc<HistoryFactory> {
        &self.history
    }

    pub fn operations(&self) -> &Arc<OperationLog> {
        &self.operations
    }

    pub fn container(&self) -> &Arc<JobClientContainer> {
        &self.container
    }

    pub fn discovery(&self) -> &Arc<RunnerFactory> {
        &self.discovery
    }

    pub fn dispatch(&self) -> &Arc<JobDispatchFactory> {
        &self.dispatch
    }

    pub fn admin(&self) -> &Arc<RunnerAdmin> {
        &self.admin
    }
}
