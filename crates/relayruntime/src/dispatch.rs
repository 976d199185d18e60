use crate::container::JobClientContainer;
use crate::discovery::RunnerFactory;
use crate::engine::{Subscription, SubscriptionRequest};
use crate::executor::RunnerJobHandler;
use crate::operations::{OperationKind, OperationLog};
use crate::storage::Filter;
use chrono::{DateTime, Utc};
use relaycore::{EventBus, HistorySink, OperationError, Runner, RuntimeEvent, SecretProvider};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use uuid::Uuid;

/// Lifecycle of a runner type inside the dispatch factory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerState {
    Unregistered,
    Stopped,
    Starting,
    Active,
    Stopping,
}

#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub start_framework_runners: bool,
    pub close_timeout: Duration,
    pub close_poll_interval: Duration,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            start_framework_runners: true,
            close_timeout: Duration::from_secs(60),
            close_poll_interval: Duration::from_millis(100),
        }
    }
}

struct RunningSubscription {
    runner: Runner,
    subscription: Box<dyn Subscription>,
    started: DateTime<Utc>,
}

/// Binds runners to engine subscriptions, one per runner type
pub struct JobDispatchFactory {
    container: Arc<JobClientContainer>,
    discovery: Arc<RunnerFactory>,
    history: Arc<dyn HistorySink>,
    events: Arc<EventBus>,
    operations: Arc<OperationLog>,
    secrets: Arc<dyn SecretProvider>,
    settings: DispatchSettings,
    running: Mutex<HashMap<String, RunningSubscription>>,
    states: RwLock<HashMap<String, RunnerState>>,
    // handles whose close was never confirmed, by runner type
    unconfirmed: StdMutex<HashMap<String, Box<dyn Subscription>>>,
}

impl JobDispatchFactory {
    pub fn new(
        container: Arc<JobClientContainer>,
        discovery: Arc<RunnerFactory>,
        history: Arc<dyn HistorySink>,
        events: Arc<EventBus>,
        operations: Arc<OperationLog>,
        secrets: Arc<dyn SecretProvider>,
        settings: DispatchSettings,
    ) -> Self {
        Self {
            container,
            discovery,
            history,
            events,
            operations,
            secrets,
            settings,
            running: Mutex::new(HashMap::new()),
            states: RwLock::new(HashMap::new()),
            unconfirmed: StdMutex::new(HashMap::new()),
        }
    }

    pub fn container(&self) -> &Arc<JobClientContainer> {
        &self.container
    }

    fn set_state(&self, runner_type: &str, state: RunnerState) {
        let mut states = self.states.write().unwrap_or_else(PoisonError::into_inner);
        states.insert(runner_type.to_string(), state);
    }

    /// State as tracked by the factory, without taking the subscription lock
    pub fn tracked_state(&self, runner_type: &str) -> Option<RunnerState> {
        let states = self.states.read().unwrap_or_else(PoisonError::into_inner);
        states.get(runner_type).copied()
    }

    pub async fn runner_state(&self, runner_type: &str) -> RunnerState {
        if let Some(state) = self.tracked_state(runner_type) {
            return state;
        }
        let known = !self
            .discovery
            .storage()
            .definitions(&Filter::by_type(runner_type))
            .await
            .is_empty();
        if known {
            RunnerState::Stopped
        } else {
            RunnerState::Unregistered
        }
    }

    pub async fn is_running(&self, runner_type: &str) -> bool {
        self.running.lock().await.contains_key(runner_type)
    }

    pub async fn running_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.running.lock().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Identifier of the live subscription of a type
    pub async fn subscription_id(&self, runner_type: &str) -> Option<Uuid> {
        self.running.lock().await.get(runner_type).map(|r| r.subscription.id())
    }

    pub async fn started_at(&self, runner_type: &str) -> Option<DateTime<Utc>> {
        self.running.lock().await.get(runner_type).map(|r| r.started)
    }

    /// Runner types whose previous subscription still has to confirm its close
    pub fn pending_close_types(&self) -> Vec<String> {
        let mut unconfirmed = self.unconfirmed.lock().unwrap_or_else(PoisonError::into_inner);
        unconfirmed.retain(|_, subscription| !subscription.is_closed());
        let mut types: Vec<String> = unconfirmed.keys().cloned().collect();
        types.sort();
        types
    }

    /// Worker threads of the live client
    pub async fn number_of_threads(&self) -> usize {
        self.container.active_threads().await
    }

    /// Connects the client, then subscribes every active runner
    pub async fn start_all(&self) -> Result<usize, OperationError> {
        if let Err(e) = self.container.start().await {
            self.operations.log_error(None, format!("Can't start the job client: {}", e));
            return Err(OperationError::Connection(e.to_string()));
        }
        self.operations.log(
            OperationKind::StartRuntime,
            format!("Start runtime {}", self.container.log_configuration().await),
        );

        let mut filter = Filter::active();
        if !self.settings.start_framework_runners {
            filter = filter.without_framework();
        }
        let runners = self.discovery.get_all_runners(&filter).await;

        let mut running = self.running.lock().await;
        let mut started = 0;
        for runner in runners {
            if running.contains_key(runner.runner_type()) {
                continue;
            }
            match self.subscribe(&mut running, runner.clone()).await {
                Ok(()) => started += 1,
                Err(e) => self.operations.log_error(
                    Some(runner.runner_type()),
                    format!("Can't start runner [{}]: {}", runner.identification(), e.human_information()),
                ),
            }
        }
        tracing::info!("{} runners started", started);
        Ok(started)
    }

    pub async fn start_runner(&self, runner_type: &str) -> Result<(), OperationError> {
        let mut running = self.running.lock().await;
        if running.contains_key(runner_type) {
            return Err(OperationError::AlreadyStarted(runner_type.to_string()));
        }

        let mut runners = self.discovery.get_all_runners(&Filter::by_type(runner_type)).await;
        let runner = match runners.len() {
            0 => {
                let definitions = self.discovery.storage().definitions(&Filter::by_type(runner_type)).await;
                if definitions.is_empty() {
                    return Err(OperationError::NotFound(runner_type.to_string()));
                }
                // known, but no loader can build it any more
                return Err(OperationError::UnknownRunnerKind(runner_type.to_string()));
            }
            1 => runners.remove(0),
            count => {
                return Err(OperationError::TooManyMatches {
                    runner_type: runner_type.to_string(),
                    count,
                })
            }
        };

        self.subscribe(&mut running, runner).await?;
        self.discovery.storage().set_active(runner_type, true).await;
        Ok(())
    }

    pub async fn stop_runner(&self, runner_type: &str) -> Result<(), OperationError> {
        let mut running = self.running.lock().await;
        let Some(entry) = running.get(runner_type) else {
            return Err(OperationError::AlreadyStopped(runner_type.to_string()));
        };

        self.set_state(runner_type, RunnerState::Stopping);
        entry.subscription.close();
        if !self.wait_closed(entry.subscription.as_ref()).await {
            self.set_state(runner_type, RunnerState::Active);
            let error = OperationError::CantStop {
                runner_type: runner_type.to_string(),
                seconds: self.settings.close_timeout.as_secs(),
            };
            self.operations.log_error(Some(runner_type), error.human_information());
            return Err(error);
        }

        running.remove(runner_type);
        self.set_state(runner_type, RunnerState::Stopped);
        self.discovery.storage().set_active(runner_type, false).await;
        self.operations
            .log_runner(OperationKind::StopRunner, runner_type, "Runner stopped");
        self.events.emit(RuntimeEvent::RunnerStopped {
            runner_type: runner_type.to_string(),
            timestamp: Utc::now(),
        });
        tracing::info!("Runner [{}] stopped", runner_type);
        Ok(())
    }

    /// Restarts the client with a new pool size and recreates every subscription
    pub async fn set_number_of_threads(&self, threads: usize) -> Result<(), OperationError> {
        if threads == 0 {
            return Err(OperationError::Connection("Worker threads must be at least 1".to_string()));
        }
        let mut running = self.running.lock().await;
        self.container.set_thread_count(threads).await;

        let closing: Vec<(String, RunningSubscription)> = running.drain().collect();
        for (runner_type, entry) in &closing {
            self.set_state(runner_type, RunnerState::Stopping);
            entry.subscription.close();
        }
        let mut restart = Vec::with_capacity(closing.len());
        for (runner_type, entry) in closing {
            let closed = self.wait_closed(entry.subscription.as_ref()).await;
            self.set_state(&runner_type, RunnerState::Stopped);
            if closed {
                restart.push((runner_type, entry.runner));
                continue;
            }
            let error = OperationError::CantStop {
                runner_type: runner_type.clone(),
                seconds: self.settings.close_timeout.as_secs(),
            };
            self.operations.log_error(
                Some(&runner_type),
                format!("Runner [{}] is not restarted: {}", runner_type, error.human_information()),
            );
            self.unconfirmed
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(runner_type, entry.subscription);
        }

        if let Err(e) = self.container.retry_connection().await {
            let message = format!("Can't restart the job client with {} threads: {}", threads, e);
            self.operations.log_error(None, message.clone());
            return Err(OperationError::Connection(message));
        }

        for (runner_type, runner) in restart {
            if let Err(e) = self.subscribe(&mut running, runner).await {
                self.set_state(&runner_type, RunnerState::Stopped);
                self.operations.log_error(
                    Some(&runner_type),
                    format!("Can't restart runner [{}]: {}", runner_type, e.human_information()),
                );
            }
        }

        self.operations
            .log(OperationKind::SetThreads, format!("Set number of threads to {}", threads));
        self.events.emit(RuntimeEvent::ThreadsChanged {
            threads,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// Closes every subscription, then the client
    pub async fn stop_all(&self) {
        let mut running = self.running.lock().await;
        let closing: Vec<(String, RunningSubscription)> = running.drain().collect();
        for (runner_type, entry) in &closing {
            self.set_state(runner_type, RunnerState::Stopping);
            entry.subscription.close();
        }
        for (runner_type, entry) in closing {
            if !self.wait_closed(entry.subscription.as_ref()).await {
                tracing::warn!("Subscription of [{}] did not confirm its close", runner_type);
            }
            self.set_state(&runner_type, RunnerState::Stopped);
            self.events.emit(RuntimeEvent::RunnerStopped {
                runner_type,
                timestamp: Utc::now(),
            });
        }
        drop(running);

        self.container.stop().await;
        self.operations.log(OperationKind::StopRuntime, "Stop runtime");
    }

    async fn subscribe(
        &self,
        running: &mut HashMap<String, RunningSubscription>,
        runner: Runner,
    ) -> Result<(), OperationError> {
        let runner_type = runner.runner_type().to_string();
        self.check_previous_closed(&runner_type)?;
        let errors = runner.check_valid_definition();
        if !errors.is_empty() {
            return Err(OperationError::InvalidDefinition {
                name: runner.identification().to_string(),
                errors,
            });
        }

        self.set_state(&runner_type, RunnerState::Starting);
        let subscription = match self.open_subscription(&runner).await {
            Ok(subscription) => subscription,
            Err(e) => {
                self.set_state(&runner_type, RunnerState::Stopped);
                self.events.emit(RuntimeEvent::RunnerFailed {
                    runner_type: runner_type.clone(),
                    error: e.to_string(),
                    timestamp: Utc::now(),
                });
                return Err(e);
            }
        };

        tracing::info!(
            "Runner [{}] type [{}] subscribed as {:?}",
            runner.identification(),
            runner_type,
            runner.kind()
        );
        running.insert(
            runner_type.clone(),
            RunningSubscription {
                runner,
                subscription,
                started: Utc::now(),
            },
        );
        self.set_state(&runner_type, RunnerState::Active);
        self.operations
            .log_runner(OperationKind::StartRunner, &runner_type, "Runner started");
        self.events.emit(RuntimeEvent::RunnerStarted {
            runner_type,
            timestamp: Utc::now(),
        });
        Ok(())
    }

    /// A type never gets a new handle while its previous one may still receive jobs
    fn check_previous_closed(&self, runner_type: &str) -> Result<(), OperationError> {
        let mut unconfirmed = self.unconfirmed.lock().unwrap_or_else(PoisonError::into_inner);
        match unconfirmed.get(runner_type) {
            Some(previous) if !previous.is_closed() => Err(OperationError::CantStop {
                runner_type: runner_type.to_string(),
                seconds: self.settings.close_timeout.as_secs(),
            }),
            Some(_) => {
                unconfirmed.remove(runner_type);
                tracing::info!("Previous subscription of [{}] is now closed", runner_type);
                Ok(())
            }
            None => Ok(()),
        }
    }

    async fn open_subscription(&self, runner: &Runner) -> Result<Box<dyn Subscription>, OperationError> {
        let client = self
            .container
            .client()
            .await
            .map_err(|e| OperationError::Connection(e.to_string()))?;
        let descriptor = runner.descriptor();
        let request = SubscriptionRequest {
            job_type: descriptor.runner_type.clone(),
            worker_name: descriptor.identification().to_string(),
            fetch_variables: descriptor.fetch_variables(),
            max_jobs_active: self.container.max_jobs_active().await,
        };
        let handler = Arc::new(
            RunnerJobHandler::new(runner.clone(), self.history.clone(), self.events.clone())
                .with_secrets(self.secrets.clone()),
        );
        client
            .subscribe(request, handler)
            .await
            .map_err(|e| OperationError::Connection(e.to_string()))
    }

    /// Polls until the subscription confirms its close or the timeout expires
    async fn wait_closed(&self, subscription: &dyn Subscription) -> bool {
        let deadline = Instant::now() + self.settings.close_timeout;
        loop {
            if subscription.is_closed() {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(self.settings.close_poll_interval).await;
        }
    }
}
