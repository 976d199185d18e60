use crate::contract;
use crate::events::EventEmitter;
use crate::history::ExecutorKind;
use crate::parameter::{ContractSchema, ParamType, RunnerParameter};
use crate::{ActivatedJob, ContractError, JobContext, RunnerError, Value, Variables};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Named error a runner declares it may raise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeclaredError {
    pub code: String,
    pub explanation: String,
}

/// Static description of a runner: identity, contract and display data
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerDescriptor {
    /// Job type the runner subscribes to
    pub runner_type: String,
    pub name: Option<String>,
    pub label: Option<String>,
    #[serde(default)]
    pub description: String,
    pub logo: Option<String>,
    pub collection_name: Option<String>,
    #[serde(default)]
    pub inputs: Vec<RunnerParameter>,
    #[serde(default)]
    pub outputs: Vec<RunnerParameter>,
    #[serde(default)]
    pub errors: Vec<DeclaredError>,
    /// Shipped with the runtime itself
    #[serde(default)]
    pub framework_runner: bool,
}

impl RunnerDescriptor {
    pub fn new(runner_type: impl Into<String>) -> Self {
        Self {
            runner_type: runner_type.into(),
            name: None,
            label: None,
            description: String::new(),
            logo: None,
            collection_name: None,
            inputs: Vec::new(),
            outputs: Vec::new(),
            errors: Vec::new(),
            framework_runner: false,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_logo(mut self, logo: impl Into<String>) -> Self {
        self.logo = Some(logo.into());
        self
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection_name = Some(collection.into());
        self
    }

    pub fn with_input(mut self, param: RunnerParameter) -> Self {
        self.inputs.push(param);
        self
    }

    pub fn with_output(mut self, param: RunnerParameter) -> Self {
        self.outputs.push(param);
        self
    }

    pub fn with_error(mut self, code: impl Into<String>, explanation: impl Into<String>) -> Self {
        self.errors.push(DeclaredError {
            code: code.into(),
            explanation: explanation.into(),
        });
        self
    }

    /// Takes inputs and outputs from two self-describing types
    pub fn with_schema<I: ContractSchema, O: ContractSchema>(mut self) -> Self {
        self.inputs = I::parameters();
        self.outputs = O::parameters();
        self
    }

    pub fn framework(mut self) -> Self {
        self.framework_runner = true;
        self
    }

    /// Administrative identity: the name, or the type when no name is given
    pub fn identification(&self) -> &str {
        match self.name.as_deref() {
            Some(name) if !name.trim().is_empty() => name,
            _ => &self.runner_type,
        }
    }

    pub fn display_label(&self) -> String {
        match self.label.as_deref() {
            Some(label) if !label.trim().is_empty() => label.to_string(),
            _ => humanize(self.identification()),
        }
    }

    /// Variables to fetch with each job. `None` means all of them.
    pub fn fetch_variables(&self) -> Option<Vec<String>> {
        if self.inputs.iter().any(RunnerParameter::is_access_all_variables) {
            return None;
        }
        Some(self.inputs.iter().map(|p| p.name.clone()).collect())
    }

    pub fn declares_error(&self, code: &str) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn check_valid_definition(&self) -> Vec<String> {
        contract::check_valid_definition(self)
    }

    pub fn check_input(&self, job: &ActivatedJob) -> Result<(), ContractError> {
        contract::check_input(self, job)
    }

    pub fn check_output(&self, produced: &Variables) -> Result<(), ContractError> {
        contract::check_output(self, produced)
    }
}

/// Turns `PingWorker` into `Ping worker`. Acronyms and all-uppercase names are kept.
pub fn humanize(name: &str) -> String {
    if !name.chars().any(char::is_lowercase) {
        return name.to_string();
    }

    let mut words: Vec<String> = Vec::new();
    let mut current = String::new();
    for c in name.chars() {
        if c == ' ' || c == '_' {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            continue;
        }
        if c.is_uppercase() && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    // single capitals in a row form an acronym
    let mut merged: Vec<String> = Vec::new();
    for word in words {
        let single = word.chars().count() == 1 && word.chars().all(char::is_uppercase);
        match merged.last_mut() {
            Some(last) if single && last.chars().all(char::is_uppercase) => last.push_str(&word),
            _ => merged.push(word),
        }
    }

    let mut out = Vec::with_capacity(merged.len());
    for (index, word) in merged.into_iter().enumerate() {
        let acronym = word.chars().count() > 1 && word.chars().all(|c| !c.is_lowercase());
        let word = if acronym { word } else { word.to_lowercase() };
        if index == 0 {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => out.push(first.to_uppercase().chain(chars).collect()),
                None => out.push(word),
            }
        } else {
            out.push(word);
        }
    }
    out.join(" ")
}

/// Per-job state collected while a runner executes
pub struct ContextExecution {
    outputs: Variables,
    started: Instant,
    pub events: EventEmitter,
}

impl ContextExecution {
    pub fn new(events: EventEmitter) -> Self {
        Self {
            outputs: Variables::new(),
            started: Instant::now(),
            events,
        }
    }

    pub fn set_output(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.outputs.insert(name.into(), value.into());
    }

    pub fn set_outputs(&mut self, values: Variables) {
        self.outputs.extend(values);
    }

    pub fn outputs(&self) -> &Variables {
        &self.outputs
    }

    pub fn into_outputs(self) -> Variables {
        self.outputs
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Runner whose business logic works directly on the job
#[async_trait]
pub trait Worker: Send + Sync {
    fn descriptor(&self) -> &RunnerDescriptor;

    /// Optional: extra checks once the contract accepted the inputs
    async fn validate_input(&self, _job: &ActivatedJob) -> Result<(), RunnerError> {
        Ok(())
    }

    async fn execute(&self, job: &ActivatedJob, ctx: &mut ContextExecution) -> Result<(), RunnerError>;

    /// Optional: extra checks before the output contract runs
    async fn validate_output(&self, _ctx: &ContextExecution) -> Result<(), RunnerError> {
        Ok(())
    }
}

/// Runner whose business logic is a function returning a result object
#[async_trait]
pub trait Connector: Send + Sync {
    fn descriptor(&self) -> &RunnerDescriptor;

    async fn execute(&self, ctx: JobContext<'_>) -> Result<Value, RunnerError>;
}

/// Function object written against the connector SDK, without any contract
#[async_trait]
pub trait OutboundFunction: Send + Sync {
    async fn execute(&self, ctx: JobContext<'_>) -> Result<Value, RunnerError>;
}

/// Metadata attached to an outbound function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorDeclaration {
    pub name: String,
    pub runner_type: String,
    #[serde(default)]
    pub input_variables: Vec<String>,
}

/// Outbound function wrapped into the runner model
pub struct SdkConnector {
    descriptor: RunnerDescriptor,
    declaration: ConnectorDeclaration,
    function: Arc<dyn OutboundFunction>,
}

impl SdkConnector {
    pub fn new(declaration: ConnectorDeclaration, function: Arc<dyn OutboundFunction>) -> Self {
        let mut descriptor = RunnerDescriptor::new(declaration.runner_type.clone())
            .with_name(declaration.name.clone())
            .with_output(RunnerParameter::access_all_variables("Result of the connector"));
        if declaration.input_variables.is_empty() {
            descriptor = descriptor.with_input(RunnerParameter::access_all_variables(
                "The connector does not declare its inputs",
            ));
        }
        for variable in &declaration.input_variables {
            descriptor = descriptor.with_input(RunnerParameter::optional(variable.clone(), ParamType::Object));
        }
        Self {
            descriptor,
            declaration,
            function,
        }
    }

    pub fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    pub fn declaration(&self) -> &ConnectorDeclaration {
        &self.declaration
    }

    pub async fn execute(&self, ctx: JobContext<'_>) -> Result<Value, RunnerError> {
        self.function.execute(ctx).await
    }
}

/// Handler method registered against a job type, SDK style
#[async_trait]
pub trait JobHandlerFn: Send + Sync {
    async fn handle(&self, job: &ActivatedJob) -> Result<Variables, RunnerError>;
}

/// Annotation-like registration of a handler method
#[derive(Clone)]
pub struct JobWorkerMethod {
    pub runner_type: String,
    pub name: Option<String>,
    pub fetch_variables: Option<Vec<String>>,
    pub handler: Arc<dyn JobHandlerFn>,
}

/// Handler method wrapped into the worker model
pub struct SdkWorker {
    descriptor: RunnerDescriptor,
    handler: Arc<dyn JobHandlerFn>,
}

impl SdkWorker {
    pub fn new(method: JobWorkerMethod) -> Self {
        let mut descriptor = RunnerDescriptor::new(method.runner_type.clone())
            .with_output(RunnerParameter::access_all_variables("Variables returned by the handler"));
        if let Some(name) = method.name {
            descriptor = descriptor.with_name(name);
        }
        match method.fetch_variables {
            Some(names) => {
                for name in names {
                    descriptor = descriptor.with_input(RunnerParameter::optional(name, ParamType::Object));
                }
            }
            None => {
                descriptor = descriptor.with_input(RunnerParameter::access_all_variables(
                    "The handler reads every variable",
                ));
            }
        }
        Self {
            descriptor,
            handler: method.handler,
        }
    }
}

#[async_trait]
impl Worker for SdkWorker {
    fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    async fn execute(&self, job: &ActivatedJob, ctx: &mut ContextExecution) -> Result<(), RunnerError> {
        let variables = self.handler.handle(job).await?;
        ctx.set_outputs(variables);
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerKind {
    Worker,
    Connector,
    WrappedFunction,
}

/// A unit of executable work
#[derive(Clone)]
pub enum Runner {
    Worker(Arc<dyn Worker>),
    Connector(Arc<dyn Connector>),
    WrappedFunction(Arc<SdkConnector>),
}

impl Runner {
    pub fn worker(worker: impl Worker + 'static) -> Self {
        Runner::Worker(Arc::new(worker))
    }

    pub fn connector(connector: impl Connector + 'static) -> Self {
        Runner::Connector(Arc::new(connector))
    }

    pub fn wrapped(declaration: ConnectorDeclaration, function: Arc<dyn OutboundFunction>) -> Self {
        Runner::WrappedFunction(Arc::new(SdkConnector::new(declaration, function)))
    }

    pub fn descriptor(&self) -> &RunnerDescriptor {
        match self {
            Runner::Worker(worker) => worker.descriptor(),
            Runner::Connector(connector) => connector.descriptor(),
            Runner::WrappedFunction(wrapped) => wrapped.descriptor(),
        }
    }

    pub fn runner_type(&self) -> &str {
        &self.descriptor().runner_type
    }

    pub fn identification(&self) -> &str {
        self.descriptor().identification()
    }

    pub fn kind(&self) -> RunnerKind {
        match self {
            Runner::Worker(_) => RunnerKind::Worker,
            Runner::Connector(_) => RunnerKind::Connector,
            Runner::WrappedFunction(_) => RunnerKind::WrappedFunction,
        }
    }

    pub fn executor_kind(&self) -> ExecutorKind {
        match self {
            Runner::Worker(_) => ExecutorKind::Worker,
            Runner::Connector(_) | Runner::WrappedFunction(_) => ExecutorKind::Connector,
        }
    }

    pub fn check_valid_definition(&self) -> Vec<String> {
        self.descriptor().check_valid_definition()
    }
}

impl fmt::Debug for Runner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}:{}", self.kind(), self.identification())
    }
}
