use relaycore::{ConnectorDeclaration, JobWorkerMethod, OutboundFunction, Runner, SdkWorker};
use std::sync::Arc;

/// Something a runner library exposes. Only some components are runners.
#[derive(Clone)]
pub enum Component {
    /// Runner written against the runtime model, used as is
    Runner(Runner),
    /// SDK outbound function, wrapped into a connector
    OutboundFunction {
        declaration: ConnectorDeclaration,
        function: Arc<dyn OutboundFunction>,
    },
    /// Object carrying annotated handler methods, one worker per method
    Handlers(Vec<JobWorkerMethod>),
    /// Anything else found next to the runners
    Other,
}

impl Component {
    pub fn runner(runner: Runner) -> Self {
        Component::Runner(runner)
    }

    pub fn outbound(declaration: ConnectorDeclaration, function: Arc<dyn OutboundFunction>) -> Self {
        Component::OutboundFunction { declaration, function }
    }
}

/// Every runner a component stands for
pub fn detect_runners(component: &Component) -> Vec<Runner> {
    match component {
        Component::Runner(runner) => vec![runner.clone()],
        Component::OutboundFunction { declaration, function } => {
            vec![Runner::wrapped(declaration.clone(), function.clone())]
        }
        Component::Handlers(methods) => methods
            .iter()
            .cloned()
            .map(|method| Runner::worker(SdkWorker::new(method)))
            .collect(),
        Component::Other => Vec::new(),
    }
}

/// Components compiled into the process
#[derive(Clone, Default)]
pub struct EmbeddedCatalog {
    components: Vec<(String, Component)>,
}

impl EmbeddedCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, class_name: impl Into<String>, component: Component) {
        let class_name = class_name.into();
        tracing::debug!("Registering component {}", class_name);
        self.components.push((class_name, component));
    }

    pub fn register_runner(&mut self, class_name: impl Into<String>, runner: Runner) {
        self.register(class_name, Component::Runner(runner));
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    /// Detected runners with the class name of their component
    pub fn runners(&self) -> Vec<(String, Runner)> {
        self.components
            .iter()
            .flat_map(|(class_name, component)| {
                detect_runners(component)
                    .into_iter()
                    .map(move |runner| (class_name.clone(), runner))
            })
            .collect()
    }

    pub fn runner_by_type(&self, runner_type: &str) -> Option<Runner> {
        self.runners()
            .into_iter()
            .map(|(_, runner)| runner)
            .find(|runner| runner.runner_type() == runner_type)
    }

    pub fn list_runner_types(&self) -> Vec<String> {
        self.runners()
            .into_iter()
            .map(|(_, runner)| runner.runner_type().to_string())
            .collect()
    }
}
