//! `c-set-variables`: computes variables from a small operation language.
//!
//! `operations` holds `name=value` pairs separated by `;`. A value is a quoted
//! string, a number, the name of another variable, or a function call:
//! `date(..)`, `datetime(..)`, `localdate(..)`, `zoneddatetime(..)` and
//! `JSON(..)`. Date functions accept `now`.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};
use relaycore::{
    ActivatedJob, ContextExecution, ParamType, RunnerDescriptor, RunnerError, RunnerParameter, Value, Worker,
};

pub const SET_VARIABLES_TYPE: &str = "c-set-variables";

pub const ERROR_SYNTAX: &str = "SYNTAX_OPERATION_ERROR";
pub const ERROR_DATE_PARSE: &str = "DATEPARSE_OPERATION_ERROR";
pub const ERROR_UNKNOWN_FUNCTION: &str = "UNKNOWN_FUNCTION_ERROR";

const NOW: &str = "now";
const ISO_DATE: &str = "%Y-%m-%d";
const ISO_DATETIME: &str = "%Y-%m-%dT%H:%M:%SZ";

/// One parsed `name(parameters)` call
#[derive(Debug, Clone, PartialEq)]
struct FunctionCall<'a> {
    name: &'a str,
    all_parameters: &'a str,
    parameters: Vec<&'a str>,
}

impl<'a> FunctionCall<'a> {
    /// `None` when the content is not a function call
    fn parse(content: &'a str) -> Option<Self> {
        let open = content.find('(');
        let close = content.rfind(')');
        match (open, close) {
            (Some(open), Some(close)) if open < close => {
                let all_parameters = &content[open + 1..close];
                Some(Self {
                    name: content[..open].trim(),
                    all_parameters,
                    parameters: all_parameters
                        .split(',')
                        .map(str::trim)
                        .filter(|p| !p.is_empty())
                        .collect(),
                })
            }
            (Some(_), _) => {
                tracing::warn!("Incorrect function? A function is <name>(<parameters>*) [{}]", content);
                None
            }
            _ => None,
        }
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    fn parameter(&self, index: usize) -> Option<&'a str> {
        self.parameters.get(index).copied()
    }
}

pub struct SetVariablesWorker {
    descriptor: RunnerDescriptor,
}

impl SetVariablesWorker {
    pub fn new() -> Self {
        let descriptor = RunnerDescriptor::new(SET_VARIABLES_TYPE)
            .with_name("SetVariables")
            .with_collection("BPMN Operation")
            .with_description("Set variables from constants, other variables or functions")
            .with_input(
                RunnerParameter::required("operations", ParamType::String)
                    .with_label("Operations")
                    .with_explanation(
                        "Operations, example color=\"blue\";age=12;source=AnotherVariable. \
                         Operations are separated by a semicolon.",
                    ),
            )
            .with_input(RunnerParameter::access_all_variables("Any variable can be referenced"))
            .with_output(RunnerParameter::access_all_variables(
                "Result of the operations. Multiple variables are updated",
            ))
            .with_error(ERROR_SYNTAX, "Operation error")
            .with_error(ERROR_DATE_PARSE, "A date can't be parsed")
            .with_error(ERROR_UNKNOWN_FUNCTION, "Unknown function")
            .framework();
        Self { descriptor }
    }

    /// Applies the operations in order. Each variable set is visible to the following ones.
    pub fn evaluate(&self, operations: &str, job: &ActivatedJob) -> Result<Vec<(String, Value)>, RunnerError> {
        let operations = operations.replace("\\\"", "\"");
        let mut results: Vec<(String, Value)> = Vec::new();

        for operation in operations.split(';').filter(|o| !o.trim().is_empty()) {
            let (name, content) = match operation.split_once('=') {
                Some((name, content)) => (name.trim(), content.trim()),
                None => (operation.trim(), ""),
            };
            if name.is_empty() || content.is_empty() {
                return Err(RunnerError::domain(
                    ERROR_SYNTAX,
                    format!(
                        "Worker [{}] Operation [{}] must have name=value",
                        self.descriptor.identification(),
                        operation
                    ),
                ));
            }

            let lookup = |variable: &str| -> Value {
                results
                    .iter()
                    .rev()
                    .find(|(n, _)| n == variable)
                    .map(|(_, v)| v.clone())
                    .or_else(|| job.variables.get(variable).cloned())
                    .unwrap_or(Value::Null)
            };
            let value = match FunctionCall::parse(content) {
                Some(call) => self.call(&call, &lookup)?,
                None => self.literal(content, &lookup)?,
            };
            results.push((name.to_string(), value));
        }
        Ok(results)
    }

    fn literal(&self, content: &str, lookup: &dyn Fn(&str) -> Value) -> Result<Value, RunnerError> {
        if let Some(quoted) = content.strip_prefix('"') {
            return match quoted.strip_suffix('"') {
                Some(text) => Ok(Value::from(text)),
                None => Err(RunnerError::domain(
                    ERROR_SYNTAX,
                    format!(
                        "Worker [{}] Operation [{}]: a string must start and end with \"",
                        self.descriptor.identification(),
                        content
                    ),
                )),
            };
        }
        if let Ok(number) = content.parse::<i64>() {
            return Ok(Value::from(number));
        }
        if let Ok(number) = content.parse::<f64>() {
            return Ok(Value::from(number));
        }
        Ok(lookup(content))
    }

    fn call(&self, call: &FunctionCall<'_>, lookup: &dyn Fn(&str) -> Value) -> Result<Value, RunnerError> {
        if call.is("JSON") {
            let json: serde_json::Value = serde_json::from_str(call.all_parameters).map_err(|e| {
                RunnerError::domain(
                    ERROR_SYNTAX,
                    format!("Worker [{}] Invalid JSON [{}]: {}", self.descriptor.identification(), call.all_parameters, e),
                )
            })?;
            return Ok(Value::from(json));
        }

        // an unquoted date that is not a variable is taken as written
        let argument = match call.parameter(0) {
            Some(parameter) => match self.literal(parameter, lookup)? {
                Value::Null => Value::from(parameter),
                value => value,
            },
            None => Value::Null,
        };
        let now = argument.is_null() || argument.as_str() == Some(NOW);
        let text = argument.to_string();

        if call.is("date") {
            if now {
                return Ok(Value::from(Utc::now().timestamp_millis()));
            }
            let midnight = NaiveDate::parse_from_str(&text, ISO_DATE)
                .map_err(|e| self.date_error(&text, "yyyy-MM-dd", e))?
                .and_hms_opt(0, 0, 0)
                .ok_or_else(|| self.date_error(&text, "yyyy-MM-dd", "no midnight"))?;
            Ok(Value::from(Utc.from_utc_datetime(&midnight).timestamp_millis()))
        } else if call.is("datetime") {
            if now {
                return Ok(Value::from(Utc::now().timestamp_millis()));
            }
            let datetime = NaiveDateTime::parse_from_str(&text, ISO_DATETIME)
                .map_err(|e| self.date_error(&text, "yyyy-MM-ddTHH:mm:ssZ", e))?;
            Ok(Value::from(Utc.from_utc_datetime(&datetime).timestamp_millis()))
        } else if call.is("localdate") {
            if now {
                return Ok(Value::from(Local::now().date_naive().format(ISO_DATE).to_string()));
            }
            let date = NaiveDate::parse_from_str(&text, ISO_DATE).map_err(|e| self.date_error(&text, "yyyy-MM-dd", e))?;
            Ok(Value::from(date.format(ISO_DATE).to_string()))
        } else if call.is("zoneddatetime") {
            if now {
                return Ok(Value::from(Local::now().to_rfc3339()));
            }
            let datetime = DateTime::parse_from_rfc3339(&text)
                .map_err(|e| self.date_error(&text, "yyyy-MM-ddTHH:mm:ss[+-]hh:mm", e))?;
            Ok(Value::from(datetime.to_rfc3339()))
        } else {
            Err(RunnerError::domain(
                ERROR_UNKNOWN_FUNCTION,
                format!("Worker [{}] function[{}] unknown", self.descriptor.identification(), call.name),
            ))
        }
    }

    fn date_error(&self, text: &str, pattern: &str, error: impl std::fmt::Display) -> RunnerError {
        RunnerError::domain(
            ERROR_DATE_PARSE,
            format!(
                "Worker [{}] Can't parse date[{}] pattern [{}]: {}",
                self.descriptor.identification(),
                text,
                pattern,
                error
            ),
        )
    }
}

impl Default for SetVariablesWorker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Worker for SetVariablesWorker {
    fn descriptor(&self) -> &RunnerDescriptor {
        &self.descriptor
    }

    async fn execute(&self, job: &ActivatedJob, ctx: &mut ContextExecution) -> Result<(), RunnerError> {
        let operations = job.input_str("operations").unwrap_or_default();
        for (name, value) in self.evaluate(&operations, job)? {
            ctx.set_output(name, value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn function_detection() {
        let call = FunctionCall::parse("date(2024-03-01, x)").unwrap();
        assert_eq!(call.name, "date");
        assert_eq!(call.parameters, vec!["2024-03-01", "x"]);
        assert_eq!(call.all_parameters, "2024-03-01, x");

        assert!(FunctionCall::parse("\"plain\"").is_none());
        assert!(FunctionCall::parse("broken(").is_none());
        assert!(FunctionCall::parse("JSON({\"a\":[1,2]})").unwrap().is("json"));
    }
}
