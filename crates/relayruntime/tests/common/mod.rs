// crates/relayruntime/tests/common/mod.rs
#![allow(dead_code)]

use async_trait::async_trait;
use relaycore::{
    ActivatedJob, Connector, ContextExecution, JobContext, ParamType, Runner, RunnerDescriptor,
    RunnerError, RunnerParameter, Value, Variables, Worker,
};
use relayruntime::{EmbeddedCatalog, RuntimeConfig};
use std::time::Duration;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn vars(pairs: &[(&str, Value)]) -> Variables {
    pairs
        .iter()
        .map(|(name, value)| (name.to_string(), value.clone()))
        .collect()
}

/// Loads a folder. Its `mode` input drives the outcome.
pub struct FolderWorker {
    descriptor: RunnerDescriptor,
}

impl FolderWorker {
    pub fn new() -> Self {
        Self {
            descriptor: RunnerDescriptor::new("t-folder")
                .with_name("FolderWorker")
                .with_input(RunnerParameter::required("folder", ParamType::String))
                .with_input(RunnerParameter::optional("mode", ParamType::String))
                .with_input(RunnerParameter::free("priority", ParamType::Long))
                .with_output(RunnerParameter::required("fileLoaded", ParamType::Boolean))
                .with_output(RunnerParameter::required("fileName", ParamType::String))
                .with_error("NO_FILE", "The folder is empty"),
        }
    }
}

#[async_trait]
impl Worker for FolderWorker {
    fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    async fn execute(&self, job: &ActivatedJob, ctx: &mut ContextExecution) -> Result<(), RunnerError> {
        let folder = job.input_str("folder").unwrap_or_default();
        match job.input_str("mode").as_deref() {
            Some("missing-output") => {
                ctx.set_output("fileName", format!("{}/a.txt", folder));
            }
            Some("extra-output") => {
                ctx.set_output("fileLoaded", true);
                ctx.set_output("fileName", format!("{}/a.txt", folder));
                ctx.set_output("debug", "left over");
            }
            Some("domain") => return Err(RunnerError::domain("NO_FILE", "nothing in the folder")),
            Some("undeclared") => return Err(RunnerError::domain("SURPRISE", "not declared")),
            Some("crash") => return Err(RunnerError::ExecutionFailed("disk unplugged".to_string())),
            Some("panic") => {
                let files: Vec<String> = Vec::new();
                ctx.set_output("fileName", files[0].clone());
            }
            Some("slow") => {
                tokio::time::sleep(Duration::from_millis(300)).await;
                ctx.set_output("fileLoaded", true);
                ctx.set_output("fileName", format!("{}/slow.txt", folder));
            }
            _ => {
                ctx.set_output("fileLoaded", true);
                ctx.set_output("fileName", format!("{}/a.txt", folder));
            }
        }
        Ok(())
    }
}

/// Worker with two parameters sharing a name
pub struct InvalidWorker {
    descriptor: RunnerDescriptor,
}

impl InvalidWorker {
    pub fn new() -> Self {
        Self {
            descriptor: RunnerDescriptor::new("t-invalid")
                .with_input(RunnerParameter::required("a", ParamType::String))
                .with_input(RunnerParameter::optional("a", ParamType::Long)),
        }
    }
}

#[async_trait]
impl Worker for InvalidWorker {
    fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    async fn execute(&self, _job: &ActivatedJob, _ctx: &mut ContextExecution) -> Result<(), RunnerError> {
        Ok(())
    }
}

/// Connector echoing its `message` input, secrets resolved
pub struct EchoConnector {
    descriptor: RunnerDescriptor,
}

impl EchoConnector {
    pub fn new() -> Self {
        Self {
            descriptor: RunnerDescriptor::new("t-echo")
                .with_input(RunnerParameter::optional("message", ParamType::String))
                .with_output(RunnerParameter::optional("echo", ParamType::String))
                .with_output(RunnerParameter::optional("tenant", ParamType::String)),
        }
    }
}

#[async_trait]
impl Connector for EchoConnector {
    fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: JobContext<'_>) -> Result<Value, RunnerError> {
        let mut result = Variables::new();
        match ctx.variable("message") {
            Some(Value::String(message)) => {
                result.insert("echo".to_string(), Value::from(ctx.replace_secrets(message)));
            }
            Some(other) => {
                result.insert("echo".to_string(), other.clone());
            }
            None => {}
        }
        if let Some(tenant) = ctx.tenant_id() {
            result.insert("tenant".to_string(), Value::from(tenant));
        }
        Ok(Value::Object(result))
    }
}

pub fn catalog() -> EmbeddedCatalog {
    let mut catalog = EmbeddedCatalog::new();
    catalog.register_runner("tests::FolderWorker", Runner::worker(FolderWorker::new()));
    catalog.register_runner("tests::InvalidWorker", Runner::worker(InvalidWorker::new()));
    catalog.register_runner("tests::EchoConnector", Runner::connector(EchoConnector::new()));
    catalog
}

pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        close_timeout_secs: 1,
        close_poll_interval_ms: 10,
        ..RuntimeConfig::default()
    }
}
