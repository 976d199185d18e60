use crate::engine::{JobClient, JobHandler};
use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use relaycore::{
    ActivatedJob, ContextExecution, EventBus, ExecutionRecord, ExecutionStatus, HistorySink, JobContext,
    NoSecrets, Runner, RunnerError, RuntimeEvent, SecretProvider, Value, Variables,
};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Executions slower than this are reported at info level
pub const SLOW_EXECUTION: Duration = Duration::from_millis(2000);

const LOGGED_VALUE_LENGTH: usize = 15;

/// Header naming the variable a connector result is stored in
pub const RESULT_VARIABLE_HEADER: &str = "resultVariable";

/// Wraps every execution of one runner: contract checks, business call,
/// acknowledgement to the engine and one history record.
pub struct RunnerJobHandler {
    runner: Runner,
    history: Arc<dyn HistorySink>,
    events: Arc<EventBus>,
    secrets: Arc<dyn SecretProvider>,
}

impl RunnerJobHandler {
    pub fn new(runner: Runner, history: Arc<dyn HistorySink>, events: Arc<EventBus>) -> Self {
        Self {
            runner,
            history,
            events,
            secrets: Arc::new(NoSecrets),
        }
    }

    /// Secrets visible to connectors through their job context
    pub fn with_secrets(mut self, secrets: Arc<dyn SecretProvider>) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn runner(&self) -> &Runner {
        &self.runner
    }

    /// Runs the runner on the job and returns the variables to complete it with
    pub async fn execute(&self, job: &ActivatedJob) -> Result<Variables, RunnerError> {
        let descriptor = self.runner.descriptor();
        descriptor.check_input(job)?;

        let context = JobContext::new(job).with_secrets(self.secrets.as_ref());
        let result = match &self.runner {
            Runner::Worker(worker) => {
                worker.validate_input(job).await?;
                let mut ctx = ContextExecution::new(self.events.create_emitter(&descriptor.runner_type, job.key));
                worker.execute(job, &mut ctx).await?;
                worker.validate_output(&ctx).await?;
                let outputs = ctx.into_outputs();
                descriptor.check_output(&outputs)?;
                return Ok(outputs);
            }
            Runner::Connector(connector) => connector.execute(context).await?,
            Runner::WrappedFunction(function) => function.execute(context).await?,
        };

        // the contract applies to the result fields, before any renaming
        descriptor.check_output(&result_fields(&result))?;
        Ok(result_to_variables(job, result))
    }

    async fn acknowledge(
        &self,
        client: &dyn JobClient,
        job: &ActivatedJob,
        result: &Result<Variables, RunnerError>,
    ) -> (ExecutionStatus, Option<String>, Option<String>) {
        let runner_type = self.runner.runner_type();
        let (status, code, message, sent) = match result {
            Ok(outputs) => (
                ExecutionStatus::Success,
                None,
                None,
                client.complete_job(job.key, outputs.clone()).await,
            ),
            Err(RunnerError::Contract(contract)) => {
                let message = contract.to_string();
                tracing::error!("{}", message);
                let sent = client
                    .throw_error(job.key, contract.code().to_string(), message.clone())
                    .await;
                (ExecutionStatus::Fail, Some(contract.code().to_string()), Some(message), sent)
            }
            Err(RunnerError::Domain { code, message }) => {
                if !self.runner.descriptor().declares_error(code) {
                    tracing::warn!("Runner [{}] raised the undeclared error [{}]", runner_type, code);
                }
                let sent = client.throw_error(job.key, code.clone(), message.clone()).await;
                (ExecutionStatus::DomainError, Some(code.clone()), Some(message.clone()), sent)
            }
            Err(other) => {
                let message = other.to_string();
                tracing::error!("Runner [{}] job {} failed: {}", runner_type, job.key, message);
                let sent = client
                    .fail_job(job.key, (job.retries - 1).max(0), message.clone())
                    .await;
                (ExecutionStatus::Fail, Some(other.code().to_string()), Some(message), sent)
            }
        };
        if let Err(e) = sent {
            tracing::error!("Can't acknowledge job {} of [{}]: {}", job.key, runner_type, e);
        }
        (status, code, message)
    }
}

#[async_trait]
impl JobHandler for RunnerJobHandler {
    async fn handle(&self, client: &dyn JobClient, job: ActivatedJob) {
        let timestamp = Utc::now();
        let started = Instant::now();
        let runner_type = self.runner.runner_type().to_string();

        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!("Execute [{}] job {} inputs: {}", runner_type, job.key, describe_inputs(&job));
        }

        let result = match AssertUnwindSafe(self.execute(&job)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => Err(RunnerError::ExecutionFailed(format!(
                "Runner panicked: {}",
                panic_message(panic.as_ref())
            ))),
        };
        let elapsed = started.elapsed();
        let (status, error_code, error_message) = self.acknowledge(client, &job, &result).await;

        if elapsed > SLOW_EXECUTION {
            tracing::info!("Runner [{}] job {} executed in {} ms", runner_type, job.key, elapsed.as_millis());
        } else {
            tracing::debug!("Runner [{}] job {} executed in {} ms", runner_type, job.key, elapsed.as_millis());
        }

        let record = ExecutionRecord {
            timestamp,
            runner_type,
            executor_kind: self.runner.executor_kind(),
            status,
            error_code,
            error_message,
            duration_ms: elapsed.as_millis() as u64,
        };
        self.history.save_execution(record.clone()).await;
        self.events.emit(RuntimeEvent::ExecutionRecorded { record });
    }
}

/// Fields of a connector result, as checked against the output contract
fn result_fields(result: &Value) -> Variables {
    match result {
        Value::Object(map) => map.clone(),
        Value::Null => Variables::new(),
        other => {
            let mut variables = Variables::new();
            variables.insert("result".to_string(), other.clone());
            variables
        }
    }
}

/// Variables produced from a connector result. The `resultVariable` header
/// stores the whole result under one name.
fn result_to_variables(job: &ActivatedJob, result: Value) -> Variables {
    if let Some(name) = job.custom_headers.get(RESULT_VARIABLE_HEADER) {
        let mut variables = Variables::new();
        variables.insert(name.clone(), result);
        return variables;
    }
    match result {
        Value::Object(map) => map,
        other => result_fields(&other),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(text) = panic.downcast_ref::<&str>() {
        text.to_string()
    } else if let Some(text) = panic.downcast_ref::<String>() {
        text.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn describe_inputs(job: &ActivatedJob) -> String {
    let mut names: Vec<&String> = job.variables.keys().collect();
    names.sort();
    names
        .into_iter()
        .map(|name| format!("{}=[{}]", name, truncate_value(&job.variables[name])))
        .collect::<Vec<_>>()
        .join(", ")
}

fn truncate_value(value: &Value) -> String {
    let text = value.to_string();
    if text.chars().count() > LOGGED_VALUE_LENGTH {
        format!("{}...", text.chars().take(LOGGED_VALUE_LENGTH).collect::<String>())
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_values_are_cut() {
        assert_eq!(truncate_value(&Value::from("short")), "short");
        assert_eq!(
            truncate_value(&Value::from("a value much longer than fifteen")),
            "a value much lo..."
        );
    }

    #[test]
    fn connector_result_mapping() {
        let job = ActivatedJob::new(1, "t", Variables::new());
        let mut object = Variables::new();
        object.insert("status".to_string(), Value::from(200i64));
        assert_eq!(result_to_variables(&job, Value::Object(object.clone())), object);
        assert!(result_to_variables(&job, Value::Null).is_empty());
        assert!(result_to_variables(&job, Value::from(3i64)).contains_key("result"));

        let job = job.with_header(RESULT_VARIABLE_HEADER, "answer");
        let variables = result_to_variables(&job, Value::from(3i64));
        assert_eq!(variables.get("answer"), Some(&Value::from(3i64)));
        assert!(result_fields(&Value::from(3i64)).contains_key("result"));
    }

    #[test]
    fn panic_payloads_are_described() {
        let text: Box<dyn Any + Send> = Box::new("index out of bounds");
        assert_eq!(panic_message(text.as_ref()), "index out of bounds");
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(owned.as_ref()), "boom");
        let other: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }
}
