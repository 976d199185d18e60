//! Boundary with the external job engine.
//!
//! The runtime only needs a client able to subscribe a handler to a job type
//! and to acknowledge jobs. Everything behind these traits is the engine's
//! business.

mod memory;

pub use memory::{InMemoryEngine, JobOutcome};

use crate::config::ClientConfig;
use async_trait::async_trait;
use relaycore::{ActivatedJob, Variables};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Client is not connected")]
    NotConnected,

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Subscription to [{job_type}] failed: {reason}")]
    Subscription { job_type: String, reason: String },

    #[error("Command on job {job_key} failed: {reason}")]
    Command { job_key: i64, reason: String },
}

/// Commands available to a handler for the job it received
#[async_trait]
pub trait JobClient: Send + Sync {
    async fn complete_job(&self, job_key: i64, variables: Variables) -> Result<(), EngineError>;

    async fn fail_job(&self, job_key: i64, retries: i32, message: String) -> Result<(), EngineError>;

    /// Raises a named error the process model may catch
    async fn throw_error(&self, job_key: i64, code: String, message: String) -> Result<(), EngineError>;
}

/// Receives jobs delivered to a subscription
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, client: &dyn JobClient, job: ActivatedJob);
}

/// What a subscription asks the engine for
#[derive(Debug, Clone)]
pub struct SubscriptionRequest {
    pub job_type: String,
    pub worker_name: String,
    /// `None` fetches every variable
    pub fetch_variables: Option<Vec<String>>,
    pub max_jobs_active: usize,
}

/// Live binding between a job type and a handler.
///
/// Closing is asynchronous: `close` only asks, `is_closed` confirms.
pub trait Subscription: Send + Sync {
    fn id(&self) -> Uuid;

    fn job_type(&self) -> &str;

    fn close(&self);

    fn is_closed(&self) -> bool;
}

/// An open connection to the engine
#[async_trait]
pub trait EngineClient: JobClient {
    async fn subscribe(
        &self,
        request: SubscriptionRequest,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Box<dyn Subscription>, EngineError>;

    /// Cheap connectivity check, without side effects
    async fn probe(&self) -> bool;

    async fn close(&self);
}

/// Factory of engine connections
#[async_trait]
pub trait JobEngine: Send + Sync {
    async fn connect(&self, config: &ClientConfig) -> Result<Arc<dyn EngineClient>, EngineError>;
}
