use super::{EngineClient, EngineError, JobClient, JobEngine, JobHandler, Subscription, SubscriptionRequest};
use crate::config::ClientConfig;
use async_trait::async_trait;
use relaycore::{ActivatedJob, Variables};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Semaphore;
use uuid::Uuid;

/// How a job was acknowledged by its handler
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", content = "detail", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobOutcome {
    Completed(Variables),
    Failed { retries: i32, message: String },
    DomainError { code: String, message: String },
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct EngineState {
    unreachable: AtomicBool,
    hold_close: AtomicBool,
    refused_types: Mutex<HashSet<String>>,
    subscriptions: Mutex<Vec<Arc<SubscriptionState>>>,
    outcomes: Mutex<HashMap<i64, JobOutcome>>,
    next_key: AtomicI64,
    current: Mutex<Option<Arc<ClientState>>>,
    connections: AtomicUsize,
}

struct ClientState {
    engine: Arc<EngineState>,
    permits: Arc<Semaphore>,
    worker_threads: usize,
    max_jobs_active: usize,
    closed: AtomicBool,
}

struct SubscriptionState {
    id: Uuid,
    request: SubscriptionRequest,
    handler: Arc<dyn JobHandler>,
    client: Arc<ClientState>,
    closing: AtomicBool,
    in_flight: AtomicUsize,
}

impl SubscriptionState {
    fn is_closed(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
            && self.in_flight.load(Ordering::SeqCst) == 0
            && !self.client.engine.hold_close.load(Ordering::SeqCst)
    }
}

/// Forgets the subscriptions whose close is confirmed
fn prune_closed(subscriptions: &mut Vec<Arc<SubscriptionState>>) {
    subscriptions.retain(|s| !s.is_closed());
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Job engine living in the process memory.
///
/// Jobs are pushed with [`InMemoryEngine::run_job`] and delivered to the open
/// subscription of their type. The handler pool is bounded by the client's
/// worker thread count.
#[derive(Clone, Default)]
pub struct InMemoryEngine {
    state: Arc<EngineState>,
}

impl InMemoryEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulates the gateway going away or coming back
    pub fn set_reachable(&self, reachable: bool) {
        self.state.unreachable.store(!reachable, Ordering::SeqCst);
    }

    /// Keeps closed subscriptions reporting "not closed yet"
    pub fn hold_close(&self, hold: bool) {
        self.state.hold_close.store(hold, Ordering::SeqCst);
    }

    /// Further subscriptions to this job type are rejected
    pub fn refuse_subscriptions(&self, job_type: &str) {
        lock(&self.state.refused_types).insert(job_type.to_string());
    }

    pub fn accept_subscriptions(&self, job_type: &str) {
        lock(&self.state.refused_types).remove(job_type);
    }

    /// Number of successful connections so far
    pub fn connections(&self) -> usize {
        self.state.connections.load(Ordering::SeqCst)
    }

    /// Worker threads of the current client, if connected
    pub fn worker_threads(&self) -> Option<usize> {
        lock(&self.state.current)
            .as_ref()
            .filter(|c| !c.closed.load(Ordering::SeqCst))
            .map(|c| c.worker_threads)
    }

    /// Subscriptions of this type not asked to close
    pub fn open_subscriptions(&self, job_type: &str) -> usize {
        lock(&self.state.subscriptions)
            .iter()
            .filter(|s| s.request.job_type == job_type && !s.closing.load(Ordering::SeqCst))
            .count()
    }

    /// Whether the subscription confirmed its close. Confirmed subscriptions
    /// are forgotten, so an unknown id counts as closed.
    pub fn is_subscription_closed(&self, id: Uuid) -> bool {
        lock(&self.state.subscriptions)
            .iter()
            .find(|s| s.id == id)
            .map_or(true, |s| s.is_closed())
    }

    /// Subscriptions the engine still tracks, closing ones included
    pub fn tracked_subscriptions(&self) -> usize {
        lock(&self.state.subscriptions).len()
    }

    pub fn outcome(&self, job_key: i64) -> Option<JobOutcome> {
        lock(&self.state.outcomes).get(&job_key).cloned()
    }

    pub fn next_job(&self, job_type: &str, variables: Variables) -> ActivatedJob {
        let key = self.state.next_key.fetch_add(1, Ordering::SeqCst) + 1;
        ActivatedJob::new(key, job_type, variables)
    }

    /// Delivers a new job and waits until its handler acknowledged it
    pub async fn run_job(&self, job_type: &str, variables: Variables) -> Result<JobOutcome, EngineError> {
        let job = self.next_job(job_type, variables);
        self.run_activated(job).await
    }

    /// Delivers a new job in the background, returning its key
    pub fn submit_job(&self, job_type: &str, variables: Variables) -> i64 {
        let job = self.next_job(job_type, variables);
        let key = job.key;
        let engine = self.clone();
        tokio::spawn(async move {
            if let Err(e) = engine.run_activated(job).await {
                tracing::warn!("Job {} was not handled: {}", key, e);
            }
        });
        key
    }

    pub async fn run_activated(&self, mut job: ActivatedJob) -> Result<JobOutcome, EngineError> {
        let subscription = lock(&self.state.subscriptions)
            .iter()
            .rev()
            .find(|s| s.request.job_type == job.job_type && !s.closing.load(Ordering::SeqCst))
            .cloned()
            .ok_or_else(|| EngineError::Subscription {
                job_type: job.job_type.clone(),
                reason: "no open subscription".to_string(),
            })?;

        let client = subscription.client.clone();
        if client.closed.load(Ordering::SeqCst) {
            return Err(EngineError::NotConnected);
        }

        let _in_flight = InFlight::enter(&subscription.in_flight);
        let _permit = client
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::NotConnected)?;

        if let Some(names) = &subscription.request.fetch_variables {
            job.variables.retain(|name, _| names.contains(name));
        }
        job.worker = subscription.request.worker_name.clone();
        let key = job.key;

        let job_client = InMemoryClient(client);
        subscription.handler.handle(&job_client, job).await;

        self.outcome(key).ok_or(EngineError::Command {
            job_key: key,
            reason: "job was not acknowledged".to_string(),
        })
    }
}

#[async_trait]
impl JobEngine for InMemoryEngine {
    async fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn EngineClient>, EngineError> {
        if self.state.unreachable.load(Ordering::SeqCst) {
            return Err(EngineError::Connection(format!(
                "gateway {} is not reachable",
                config.gateway_address
            )));
        }
        let threads = config.worker_threads.max(1);
        let client = Arc::new(ClientState {
            engine: self.state.clone(),
            permits: Arc::new(Semaphore::new(threads)),
            worker_threads: threads,
            max_jobs_active: config.max_jobs_active.max(1),
            closed: AtomicBool::new(false),
        });
        *lock(&self.state.current) = Some(client.clone());
        self.state.connections.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("In-memory engine connected with {} worker threads", threads);
        Ok(Arc::new(InMemoryClient(client)))
    }
}

struct InMemoryClient(Arc<ClientState>);

impl InMemoryClient {
    fn acknowledge(&self, job_key: i64, outcome: JobOutcome) -> Result<(), EngineError> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(EngineError::NotConnected);
        }
        let mut outcomes = lock(&self.0.engine.outcomes);
        if outcomes.contains_key(&job_key) {
            return Err(EngineError::Command {
                job_key,
                reason: "job already acknowledged".to_string(),
            });
        }
        outcomes.insert(job_key, outcome);
        Ok(())
    }
}

#[async_trait]
impl JobClient for InMemoryClient {
    async fn complete_job(&self, job_key: i64, variables: Variables) -> Result<(), EngineError> {
        self.acknowledge(job_key, JobOutcome::Completed(variables))
    }

    async fn fail_job(&self, job_key: i64, retries: i32, message: String) -> Result<(), EngineError> {
        self.acknowledge(job_key, JobOutcome::Failed { retries, message })
    }

    async fn throw_error(&self, job_key: i64, code: String, message: String) -> Result<(), EngineError> {
        self.acknowledge(job_key, JobOutcome::DomainError { code, message })
    }
}

#[async_trait]
impl EngineClient for InMemoryClient {
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Box<dyn Subscription>, EngineError> {
        if self.0.closed.load(Ordering::SeqCst) {
            return Err(EngineError::NotConnected);
        }
        if lock(&self.0.engine.refused_types).contains(&request.job_type) {
            return Err(EngineError::Subscription {
                job_type: request.job_type,
                reason: "refused by the engine".to_string(),
            });
        }

        let mut request = request;
        request.max_jobs_active = request.max_jobs_active.min(self.0.max_jobs_active).max(1);
        let state = Arc::new(SubscriptionState {
            id: Uuid::new_v4(),
            request,
            handler,
            client: self.0.clone(),
            closing: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
        });

        let mut subscriptions = lock(&self.0.engine.subscriptions);
        prune_closed(&mut subscriptions);
        subscriptions.push(state.clone());
        Ok(Box::new(InMemorySubscription(state)))
    }

    async fn probe(&self) -> bool {
        !self.0.closed.load(Ordering::SeqCst) && !self.0.engine.unreachable.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.0.closed.store(true, Ordering::SeqCst);
        let mut subscriptions = lock(&self.0.engine.subscriptions);
        for subscription in subscriptions.iter() {
            if Arc::ptr_eq(&subscription.client, &self.0) {
                subscription.closing.store(true, Ordering::SeqCst);
            }
        }
        prune_closed(&mut subscriptions);
    }
}

struct InMemorySubscription(Arc<SubscriptionState>);

impl Subscription for InMemorySubscription {
    fn id(&self) -> Uuid {
        self.0.id
    }

    fn job_type(&self) -> &str {
        &self.0.request.job_type
    }

    fn close(&self) {
        self.0.closing.store(true, Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        if !self.0.is_closed() {
            return false;
        }
        lock(&self.0.client.engine.subscriptions).retain(|s| !Arc::ptr_eq(s, &self.0));
        true
    }
}
