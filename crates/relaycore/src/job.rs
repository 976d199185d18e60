use crate::secret::{self, NoSecrets, SecretProvider};
use crate::{RunnerError, Value, Variables};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A job handed out by the engine to a subscription
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivatedJob {
    pub key: i64,
    pub job_type: String,
    pub variables: Variables,
    #[serde(default)]
    pub custom_headers: HashMap<String, String>,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub process_instance_key: i64,
    #[serde(default)]
    pub bpmn_process_id: String,
    #[serde(default)]
    pub element_id: String,
    #[serde(default)]
    pub worker: String,
    #[serde(default = "default_retries")]
    pub retries: i32,
}

fn default_retries() -> i32 {
    3
}

impl ActivatedJob {
    pub fn new(key: i64, job_type: impl Into<String>, variables: Variables) -> Self {
        Self {
            key,
            job_type: job_type.into(),
            variables,
            custom_headers: HashMap::new(),
            tenant_id: None,
            process_instance_key: 0,
            bpmn_process_id: String::new(),
            element_id: String::new(),
            worker: String::new(),
            retries: default_retries(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.custom_headers.insert(name.into(), value.into());
        self
    }

    /// Value of an input: the job variable first, then the custom header
    pub fn input(&self, name: &str) -> Option<Value> {
        match self.variables.get(name) {
            Some(value) if !value.is_null() => Some(value.clone()),
            _ => self.custom_headers.get(name).map(|h| Value::String(h.clone())),
        }
    }

    pub fn input_str(&self, name: &str) -> Option<String> {
        self.input(name).and_then(|v| match v {
            Value::String(s) => Some(s),
            Value::Null => None,
            other => Some(other.to_string()),
        })
    }

    /// Reads an integral input, accepting numeric strings
    pub fn input_i64(&self, name: &str) -> Option<i64> {
        match self.input(name)? {
            Value::Int(n) => Some(n),
            Value::Number(n) if n.fract() == 0.0 => Some(n as i64),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Reads a boolean input, accepting `true/yes/false/no` strings
    pub fn input_bool(&self, name: &str) -> Option<bool> {
        match self.input(name)? {
            Value::Bool(b) => Some(b),
            Value::String(s) => match s.to_uppercase().as_str() {
                "TRUE" | "YES" => Some(true),
                "FALSE" | "NO" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Read-only view of a job given to connector functions
#[derive(Clone, Copy)]
pub struct JobContext<'a> {
    job: &'a ActivatedJob,
    secrets: &'a dyn SecretProvider,
}

impl<'a> JobContext<'a> {
    pub fn new(job: &'a ActivatedJob) -> Self {
        Self { job, secrets: &NoSecrets }
    }

    pub fn with_secrets(mut self, secrets: &'a dyn SecretProvider) -> Self {
        self.secrets = secrets;
        self
    }

    pub fn secret(&self, key: &str) -> Option<String> {
        self.secrets.secret(key)
    }

    /// Text with its `{{secrets.NAME}}` references resolved
    pub fn replace_secrets(&self, text: &str) -> String {
        secret::replace_secrets(text, self.secrets)
    }

    pub fn job(&self) -> &'a ActivatedJob {
        self.job
    }

    pub fn variables(&self) -> &'a Variables {
        &self.job.variables
    }

    pub fn variable(&self, name: &str) -> Option<&'a Value> {
        self.job.variables.get(name)
    }

    pub fn header(&self, name: &str) -> Option<&'a str> {
        self.job.custom_headers.get(name).map(String::as_str)
    }

    pub fn tenant_id(&self) -> Option<&'a str> {
        self.job.tenant_id.as_deref()
    }

    pub fn process_instance_key(&self) -> i64 {
        self.job.process_instance_key
    }

    pub fn element_id(&self) -> &'a str {
        &self.job.element_id
    }

    /// Binds the variables to a typed input structure, secrets resolved
    pub fn variables_as<T: DeserializeOwned>(&self) -> Result<T, RunnerError> {
        let json = secret::resolve_secrets(&Value::Object(self.job.variables.clone()), self.secrets).to_json();
        serde_json::from_value(json).map_err(|e| {
            RunnerError::Configuration(format!("Can't bind variables of job {}: {}", self.job.key, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_falls_back_to_header() {
        let mut variables = Variables::new();
        variables.insert("a".to_string(), Value::from("variable"));
        let job = ActivatedJob::new(1, "t", variables)
            .with_header("a", "header")
            .with_header("b", "header");

        assert_eq!(job.input_str("a").as_deref(), Some("variable"));
        assert_eq!(job.input_str("b").as_deref(), Some("header"));
        assert_eq!(job.input("c"), None);
    }

    #[test]
    fn relaxed_readers() {
        let mut variables = Variables::new();
        variables.insert("flag".to_string(), Value::from("Yes"));
        variables.insert("delay".to_string(), Value::from("120"));
        let job = ActivatedJob::new(1, "t", variables);

        assert_eq!(job.input_bool("flag"), Some(true));
        assert_eq!(job.input_i64("delay"), Some(120));
    }

    #[test]
    fn context_resolves_secrets() {
        let mut secrets = HashMap::new();
        secrets.insert("API_KEY".to_string(), "k-123".to_string());
        let provider = crate::ConfigSecretProvider::new(secrets).without_env();

        let mut variables = Variables::new();
        variables.insert("key".to_string(), Value::from("{{secrets.API_KEY}}"));
        let job = ActivatedJob::new(1, "t", variables);

        let plain = JobContext::new(&job);
        assert_eq!(plain.secret("API_KEY"), None);

        let ctx = JobContext::new(&job).with_secrets(&provider);
        assert_eq!(ctx.secret("API_KEY").as_deref(), Some("k-123"));
        assert_eq!(ctx.replace_secrets("key=secrets.API_KEY"), "key=secrets.API_KEY");
        let bound: HashMap<String, String> = ctx.variables_as().unwrap();
        assert_eq!(bound["key"], "k-123");
        assert_eq!(ctx.variable("key"), Some(&Value::from("{{secrets.API_KEY}}")));
    }
}
