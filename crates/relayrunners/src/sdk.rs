//! Components written the SDK way: annotated handler methods and an outbound
//! function. Discovery wraps them into runners.

use crate::ping::{effective_delay, ERROR_BAD_WEATHER};
use async_trait::async_trait;
use chrono::Local;
use relaycore::{
    ActivatedJob, ConnectorDeclaration, JobContext, JobHandlerFn, JobWorkerMethod, OutboundFunction, RunnerError,
    Value, Variables,
};
use std::collections::HashMap;
use std::sync::Arc;

pub const BASIC_PING_TYPE: &str = "c-basic-ping";
pub const BASIC_WEATHER_TYPE: &str = "c-basic-weather";
pub const SDK_ECHO_TYPE: &str = "c-sdk-echo";

/// Two handler methods carried by one component
pub struct BasicPingHandlers;

impl BasicPingHandlers {
    pub fn methods() -> Vec<JobWorkerMethod> {
        vec![
            JobWorkerMethod {
                runner_type: BASIC_PING_TYPE.to_string(),
                name: Some("BasicPing".to_string()),
                fetch_variables: Some(vec![
                    "message".to_string(),
                    "delay".to_string(),
                    "throwErrorPlease".to_string(),
                ]),
                handler: Arc::new(BasicPing),
            },
            JobWorkerMethod {
                runner_type: BASIC_WEATHER_TYPE.to_string(),
                name: Some("BasicWeather".to_string()),
                fetch_variables: Some(Vec::new()),
                handler: Arc::new(BasicWeather),
            },
        ]
    }
}

struct BasicPing;

#[async_trait]
impl JobHandlerFn for BasicPing {
    async fn handle(&self, job: &ActivatedJob) -> Result<Variables, RunnerError> {
        tracing::info!("BasicPing start [{}] {}", job.key, job.input_str("message").unwrap_or_default());

        if job.input_bool("throwErrorPlease").unwrap_or(false) {
            return Err(RunnerError::domain(ERROR_BAD_WEATHER, "Weather is rainy"));
        }
        let delay = job.input_i64("delay").unwrap_or(0);
        if delay != 0 {
            tokio::time::sleep(std::time::Duration::from_millis(effective_delay(delay))).await;
        }

        let mut variables = Variables::new();
        variables.insert(
            "timestamp".to_string(),
            Value::from(Local::now().format("%Y%m%d %H:%M:%S").to_string()),
        );
        Ok(variables)
    }
}

struct BasicWeather;

#[async_trait]
impl JobHandlerFn for BasicWeather {
    async fn handle(&self, job: &ActivatedJob) -> Result<Variables, RunnerError> {
        tracing::info!("BasicWeather start [{}]", job.key);
        let mut variables = Variables::new();
        variables.insert("temperature".to_string(), Value::from("3C"));
        variables.insert("humidity".to_string(), Value::from("75%"));
        Ok(variables)
    }
}

/// Outbound function answering with what it received
pub struct SdkEchoFunction;

impl SdkEchoFunction {
    pub fn declaration() -> ConnectorDeclaration {
        ConnectorDeclaration {
            name: "SdkEcho".to_string(),
            runner_type: SDK_ECHO_TYPE.to_string(),
            input_variables: vec!["message".to_string()],
        }
    }
}

#[async_trait]
impl OutboundFunction for SdkEchoFunction {
    async fn execute(&self, ctx: JobContext<'_>) -> Result<Value, RunnerError> {
        let mut result = HashMap::new();
        result.insert(
            "echo".to_string(),
            ctx.variable("message").cloned().unwrap_or(Value::Null),
        );
        result.insert("elementId".to_string(), Value::from(ctx.element_id()));
        Ok(Value::Object(result))
    }
}
