use async_trait::async_trait;
use chrono::{Local, Utc};
use relaycore::{
    ActivatedJob, Connector, ContextExecution, ContractSchema, JobContext, ParamType, RunnerDescriptor,
    RunnerError, RunnerParameter, Value, Worker,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::time::{sleep, Duration};

pub const PING_WORKER_TYPE: &str = "c-pingworker";
pub const PING_CONNECTOR_TYPE: &str = "c-pingconnector";
pub const ERROR_BAD_WEATHER: &str = "BAD_WEATHER";

const TIMESTAMP_FORMAT: &str = "%Y%m%d %H:%M:%S";

/// Milliseconds to sleep. A negative delay picks one between 1.5 s and 11.5 s.
pub(crate) fn effective_delay(delay: i64) -> u64 {
    if delay >= 0 {
        return delay as u64;
    }
    rand::thread_rng().gen_range(1_500..11_500)
}

/// Logs a message, waits and returns a timestamp
pub struct PingWorker {
    descriptor: RunnerDescriptor,
}

impl PingWorker {
    pub fn new() -> Self {
        let descriptor = RunnerDescriptor::new(PING_WORKER_TYPE)
            .with_name("PingWorker")
            .with_label("Ping (Worker)")
            .with_description("Do a simple ping as a worker and return a timestamp. A delay can be set.")
            .with_input(
                RunnerParameter::optional("message", ParamType::String)
                    .with_label("Message")
                    .with_explanation("Message to log"),
            )
            .with_input(
                RunnerParameter::optional("delay", ParamType::Long)
                    .with_label("Delay")
                    .with_explanation("Delay to sleep, in milliseconds"),
            )
            .with_input(
                RunnerParameter::optional("throwErrorPlease", ParamType::Boolean)
                    .with_label("Throw error")
                    .with_explanation("Please throw an error"),
            )
            .with_output(
                RunnerParameter::required("timestamp", ParamType::String)
                    .with_label("Time stamp")
                    .with_explanation("Produce a timestamp"),
            )
            .with_error(ERROR_BAD_WEATHER, "Bad weather")
            .framework();
        Self { descriptor }
    }
}

impl Default for PingWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for PingWorker {
    fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    async fn execute(&self, job: &ActivatedJob, ctx: &mut ContextExecution) -> Result<(), RunnerError> {
        if let Some(message) = job.input_str("message") {
            ctx.events.info(message);
        }

        if job.input_bool("throwErrorPlease").unwrap_or(false) {
            return Err(RunnerError::domain(ERROR_BAD_WEATHER, "Weather is rainy"));
        }

        if let Some(delay) = job.input_i64("delay") {
            sleep(Duration::from_millis(effective_delay(delay))).await;
        }

        ctx.set_output("timestamp", Local::now().format(TIMESTAMP_FORMAT).to_string());
        Ok(())
    }
}

/// Typed input of the ping connector
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PingConnectorInput {
    pub message: Option<String>,
    pub delay: i64,
    pub throw_error_please: bool,
}

impl ContractSchema for PingConnectorInput {
    fn parameters() -> Vec<RunnerParameter> {
        vec![
            RunnerParameter::optional("message", ParamType::String)
                .with_label("Message")
                .with_explanation("Message to log"),
            RunnerParameter::optional("delay", ParamType::Long)
                .with_label("Delay")
                .with_explanation("Delay to sleep, in milliseconds"),
            RunnerParameter::optional("throwErrorPlease", ParamType::Boolean)
                .with_label("Throw error please")
                .with_explanation("If true, the connector throws an error")
                .visible_in_template(),
        ]
    }
}

/// Typed result of the ping connector, spread into one variable per field
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PingConnectorOutput {
    pub timestamp: i64,
    pub ip_address: String,
    pub data: HashMap<String, String>,
}

impl ContractSchema for PingConnectorOutput {
    fn parameters() -> Vec<RunnerParameter> {
        vec![
            RunnerParameter::required("timestamp", ParamType::Long)
                .with_label("Time stamp")
                .with_explanation("Epoch milliseconds of the ping"),
            RunnerParameter::required("ipAddress", ParamType::String)
                .with_label("IP address")
                .with_explanation("Address of the host running the connector"),
            RunnerParameter::required("data", ParamType::Map)
                .with_label("Data")
                .with_explanation("Information on the runtime"),
        ]
    }
}

/// Same ping as the worker, written as a connector with typed input and output
pub struct PingConnector {
    descriptor: RunnerDescriptor,
}

impl PingConnector {
    pub fn new() -> Self {
        let descriptor = RunnerDescriptor::new(PING_CONNECTOR_TYPE)
            .with_name("PingConnector")
            .with_label("Ping (Connector)")
            .with_description("Do a simple ping as a connector and return a timestamp and the IP address")
            .with_schema::<PingConnectorInput, PingConnectorOutput>()
            .with_error(ERROR_BAD_WEATHER, "Why is this bad weather?")
            .framework();
        Self { descriptor }
    }
}

impl Default for PingConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for PingConnector {
    fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: JobContext<'_>) -> Result<Value, RunnerError> {
        let input: PingConnectorInput = ctx.variables_as()?;
        if let Some(message) = &input.message {
            tracing::info!("[{}] {}", PING_CONNECTOR_TYPE, message);
        }
        if input.throw_error_please {
            return Err(RunnerError::domain(ERROR_BAD_WEATHER, "Raining too much"));
        }
        if input.delay != 0 {
            sleep(Duration::from_millis(effective_delay(input.delay))).await;
        }

        let mut data = HashMap::new();
        data.insert("runtime".to_string(), env!("CARGO_PKG_NAME").to_string());
        data.insert("version".to_string(), env!("CARGO_PKG_VERSION").to_string());
        let output = PingConnectorOutput {
            timestamp: Utc::now().timestamp_millis(),
            ip_address: local_ip_address().await,
            data,
        };
        let json = serde_json::to_value(output)
            .map_err(|e| RunnerError::ExecutionFailed(format!("Can't serialize the ping result: {}", e)))?;
        Ok(Value::from(json))
    }
}

/// Address of the interface used for outbound traffic. Nothing is sent.
async fn local_ip_address() -> String {
    let probe = async {
        let socket = tokio::net::UdpSocket::bind("0.0.0.0:0").await?;
        socket.connect("8.8.8.8:80").await?;
        socket.local_addr()
    };
    match probe.await {
        Ok(address) => address.ip().to_string(),
        Err(e) => {
            tracing::debug!("No outbound interface found: {}", e);
            "127.0.0.1".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_delay_is_randomized() {
        assert_eq!(effective_delay(0), 0);
        assert_eq!(effective_delay(250), 250);
        for _ in 0..20 {
            let random = effective_delay(-1);
            assert!((1_500..11_500).contains(&random));
        }
    }

    #[test]
    fn connector_contract_comes_from_the_types() {
        let connector = PingConnector::new();
        let descriptor = connector.descriptor();
        let outputs: Vec<&str> = descriptor.outputs.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(outputs, vec!["timestamp", "ipAddress", "data"]);
        assert!(descriptor.inputs[2].visible_in_template);
        assert!(descriptor.framework_runner);
    }
}
