use async_trait::async_trait;
use relaycore::{Connector, JobContext, ParamType, RunnerDescriptor, RunnerError, RunnerParameter, Value};
use std::collections::HashMap;
use std::time::Duration;

pub const HTTP_REQUEST_TYPE: &str = "c-http-request";
pub const ERROR_HTTP: &str = "HTTP_ERROR";

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Sends one HTTP request and returns status, body and headers
pub struct HttpRequestConnector {
    descriptor: RunnerDescriptor,
    client: reqwest::Client,
}

impl HttpRequestConnector {
    pub fn new() -> Self {
        let descriptor = RunnerDescriptor::new(HTTP_REQUEST_TYPE)
            .with_name("HttpRequest")
            .with_label("HTTP request")
            .with_description("Call a REST endpoint. A non 2xx answer raises HTTP_ERROR.")
            .with_collection("Network")
            .with_input(RunnerParameter::required("url", ParamType::String).with_label("URL"))
            .with_input(
                RunnerParameter::optional("method", ParamType::String)
                    .with_label("Method")
                    .with_default("GET")
                    .with_choice("GET", "GET")
                    .with_choice("POST", "POST")
                    .with_choice("PUT", "PUT")
                    .with_choice("PATCH", "PATCH")
                    .with_choice("DELETE", "DELETE"),
            )
            .with_input(
                RunnerParameter::optional("body", ParamType::Object)
                    .with_label("Body")
                    .with_explanation("Sent as JSON, or as text when it is a string")
                    .with_condition("method", ["POST", "PUT", "PATCH"]),
            )
            .with_input(RunnerParameter::optional("headers", ParamType::Map).with_label("Headers"))
            .with_input(
                RunnerParameter::optional("timeout", ParamType::Duration)
                    .with_label("Timeout")
                    .with_explanation("Milliseconds or ISO-8601 duration, 30 s when absent"),
            )
            .with_output(RunnerParameter::required("status", ParamType::Long).with_label("Status"))
            .with_output(RunnerParameter::optional("body", ParamType::Object).with_label("Body"))
            .with_output(RunnerParameter::optional("headers", ParamType::Map).with_label("Headers"))
            .with_error(ERROR_HTTP, "The server answered with a non 2xx status");
        Self {
            descriptor,
            client: reqwest::Client::new(),
        }
    }

    fn timeout(value: Option<&Value>) -> Duration {
        match value {
            Some(Value::Int(ms)) if *ms > 0 => Duration::from_millis(*ms as u64),
            Some(Value::Number(ms)) if *ms > 0.0 => Duration::from_millis(*ms as u64),
            Some(Value::String(text)) => relaycore::contract::parse_iso_duration(text)
                .or_else(|| text.trim().parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_TIMEOUT),
            _ => DEFAULT_TIMEOUT,
        }
    }
}

impl Default for HttpRequestConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Connector for HttpRequestConnector {
    fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    async fn execute(&self, ctx: JobContext<'_>) -> Result<Value, RunnerError> {
        let job = ctx.job();
        // logs and errors show the url as written, secrets unresolved
        let written_url = job
            .input_str("url")
            .ok_or_else(|| RunnerError::MissingInput("url".to_string()))?;
        let url = ctx.replace_secrets(&written_url);
        let method = job.input_str("method").unwrap_or_else(|| "GET".to_string());

        tracing::debug!("{} {}", method, written_url);

        let mut request = match method.to_uppercase().as_str() {
            "GET" => self.client.get(&url),
            "POST" => self.client.post(&url),
            "PUT" => self.client.put(&url),
            "PATCH" => self.client.patch(&url),
            "DELETE" => self.client.delete(&url),
            _ => return Err(RunnerError::Configuration(format!("Unsupported method: {}", method))),
        };

        match ctx.variable("body") {
            Some(Value::String(text)) => request = request.body(text.clone()),
            Some(Value::Null) | None => {}
            Some(body) => request = request.json(&body.to_json()),
        }

        if let Some(Value::Object(headers)) = ctx.variable("headers") {
            for (key, value) in headers {
                let value = match value {
                    Value::String(text) => ctx.replace_secrets(text),
                    other => other.to_string(),
                };
                request = request.header(key.as_str(), value);
            }
        }

        let response = request
            .timeout(Self::timeout(ctx.variable("timeout")))
            .send()
            .await
            .map_err(|e| RunnerError::ExecutionFailed(format!("HTTP request failed: {}", e.without_url())))?;

        let status = response.status();
        let headers: HashMap<String, Value> = response
            .headers()
            .iter()
            .map(|(k, v)| (k.to_string(), Value::String(v.to_str().unwrap_or("").to_string())))
            .collect();

        let text = response
            .text()
            .await
            .map_err(|e| RunnerError::ExecutionFailed(format!("Failed to read response: {}", e)))?;

        if !status.is_success() {
            return Err(RunnerError::domain(
                ERROR_HTTP,
                format!("{} {} answered {}: {}", method, written_url, status.as_u16(), text),
            ));
        }

        let body = match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(json) => Value::from(json),
            Err(_) => Value::String(text),
        };

        let mut result = HashMap::new();
        result.insert("status".to_string(), Value::from(status.as_u16() as i64));
        result.insert("body".to_string(), body);
        result.insert("headers".to_string(), Value::Object(headers));
        Ok(Value::Object(result))
    }
}
