use crate::config::ClientConfig;
use crate::engine::{EngineClient, EngineError, JobEngine};
use chrono::Utc;
use relaycore::{EventBus, RuntimeEvent};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Error, Debug, Clone)]
pub enum ContainerError {
    #[error("Invalid client configuration: {}", .0.join(" "))]
    InvalidConfiguration(Vec<String>),

    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    #[error("Connection to {0} answered no ping")]
    Unreachable(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ContainerState {
    Disconnected,
    Connecting,
    Connected,
}

struct Inner {
    state: ContainerState,
    client: Option<Arc<dyn EngineClient>>,
    /// Thread count the live client was built with
    threads: usize,
}

/// Owns the connection to the job engine
pub struct JobClientContainer {
    engine: Arc<dyn JobEngine>,
    config: RwLock<ClientConfig>,
    inner: RwLock<Inner>,
    events: Arc<EventBus>,
}

impl JobClientContainer {
    pub fn new(engine: Arc<dyn JobEngine>, config: ClientConfig, events: Arc<EventBus>) -> Self {
        Self {
            engine,
            config: RwLock::new(config),
            inner: RwLock::new(Inner {
                state: ContainerState::Disconnected,
                client: None,
                threads: 0,
            }),
            events,
        }
    }

    /// Validates the configuration, connects and pings the engine
    pub async fn start(&self) -> Result<(), ContainerError> {
        let config = self.config.read().await.clone();
        let mut inner = self.inner.write().await;
        if inner.state == ContainerState::Connected {
            return Ok(());
        }

        let errors = config.validate();
        if !errors.is_empty() {
            tracing::error!(
                "Incorrect configuration [{}]: {}",
                config.log_configuration(),
                errors.join(" ")
            );
            return Err(ContainerError::InvalidConfiguration(errors));
        }

        inner.state = ContainerState::Connecting;
        tracing::info!("Connecting to engine {}", config.log_configuration());

        let client = match self.engine.connect(&config).await {
            Ok(client) => client,
            Err(e) => {
                inner.state = ContainerState::Disconnected;
                tracing::error!("Can't connect with {}: {}", config.log_configuration(), e);
                return Err(e.into());
            }
        };

        if !client.probe().await {
            client.close().await;
            inner.state = ContainerState::Disconnected;
            tracing::error!("No answer from engine {}", config.log_configuration());
            return Err(ContainerError::Unreachable(config.gateway_address.clone()));
        }

        inner.client = Some(client);
        inner.threads = config.worker_threads;
        inner.state = ContainerState::Connected;
        tracing::info!("Connected to engine with {} worker threads", config.worker_threads);
        self.events.emit(RuntimeEvent::ConnectionChanged {
            connected: true,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    pub async fn stop(&self) {
        let mut inner = self.inner.write().await;
        if let Some(client) = inner.client.take() {
            client.close().await;
            tracing::info!("Disconnected from engine");
            self.events.emit(RuntimeEvent::ConnectionChanged {
                connected: false,
                timestamp: Utc::now(),
            });
        }
        inner.state = ContainerState::Disconnected;
        inner.threads = 0;
    }

    pub async fn retry_connection(&self) -> Result<(), ContainerError> {
        self.stop().await;
        self.start().await
    }

    pub async fn state(&self) -> ContainerState {
        self.inner.read().await.state
    }

    pub async fn is_ok(&self) -> bool {
        self.state().await == ContainerState::Connected
    }

    /// The live client. Fails fast when disconnected.
    pub async fn client(&self) -> Result<Arc<dyn EngineClient>, EngineError> {
        let inner = self.inner.read().await;
        match (&inner.state, &inner.client) {
            (ContainerState::Connected, Some(client)) => Ok(client.clone()),
            _ => Err(EngineError::NotConnected),
        }
    }

    /// Thread count of the live client, 0 when disconnected
    pub async fn active_threads(&self) -> usize {
        self.inner.read().await.threads
    }

    /// Thread count the next `start` will use
    pub async fn configured_threads(&self) -> usize {
        self.config.read().await.worker_threads
    }

    /// Recorded only; a live client keeps its pool until restarted
    pub async fn set_thread_count(&self, threads: usize) {
        self.config.write().await.worker_threads = threads;
    }

    pub async fn max_jobs_active(&self) -> usize {
        self.config.read().await.max_jobs_active
    }

    pub async fn log_configuration(&self) -> String {
        self.config.read().await.log_configuration()
    }

    pub async fn check_connectivity(&self) -> bool {
        match self.client().await {
            Ok(client) => client.probe().await,
            Err(_) => false,
        }
    }

    /// Periodic probe. Only reports transitions, never stops anything.
    pub fn spawn_health_check(self: &Arc<Self>, every: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let container = Arc::clone(self);
        tokio::spawn(async move {
            let mut last = None;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(every) => {}
                }
                if container.state().await != ContainerState::Connected {
                    continue;
                }
                let alive = container.check_connectivity().await;
                if last != Some(alive) {
                    if alive {
                        tracing::info!("Engine connectivity ok");
                    } else {
                        tracing::warn!("Engine does not answer the ping");
                    }
                    container.events.emit(RuntimeEvent::ConnectionChanged {
                        connected: alive,
                        timestamp: Utc::now(),
                    });
                    last = Some(alive);
                }
            }
            tracing::debug!("Health check stopped");
        })
    }
}
