//! Contract checks derived from the declared runner parameters.
//!
//! The checks are run by the framework around every execution, so runners
//! never validate their own inputs or outputs.

use crate::error::{ContractError, ContractKind};
use crate::parameter::{Level, ParamType, RunnerParameter};
use crate::{ActivatedJob, RunnerDescriptor, Value, Variables};
use std::collections::HashSet;

/// Lists everything wrong with a runner definition. Empty means valid.
pub fn check_valid_definition(descriptor: &RunnerDescriptor) -> Vec<String> {
    let mut errors = Vec::new();

    if descriptor.identification().trim().is_empty() {
        errors.push("No identification (no type or name declared in the runner)".to_string());
    }

    for (side, list) in [("input", &descriptor.inputs), ("output", &descriptor.outputs)] {
        let mut seen = HashSet::new();
        for param in list {
            if param.name.trim().is_empty() {
                errors.push(format!("An {} parameter has no name", side));
                continue;
            }
            if param.is_access_all_variables() {
                continue;
            }
            if !seen.insert(param.name.as_str()) {
                errors.push(format!("Parameter name[{}] is defined multiple time", param.name));
            }
        }
    }

    for param in descriptor.inputs.iter().chain(descriptor.outputs.iter()) {
        let Some(condition) = &param.condition else {
            continue;
        };
        if condition.property.trim().is_empty() {
            errors.push(format!("Parameter[{}] declares a condition without property", param.name));
            continue;
        }
        if condition.one_of.is_empty() {
            errors.push(format!("Parameter[{}] declares a condition without any value", param.name));
        }
        let matches = descriptor
            .inputs
            .iter()
            .filter(|p| p.name == condition.property)
            .count();
        if matches != 1 {
            errors.push(format!(
                "Parameter[{}] condition must reference exactly one input parameter, found {} for [{}]",
                param.name, matches, condition.property
            ));
        }
    }

    errors
}

/// Checks the job against the declared inputs.
pub fn check_input(descriptor: &RunnerDescriptor, job: &ActivatedJob) -> Result<(), ContractError> {
    let mut violations = Vec::new();

    for param in &descriptor.inputs {
        if param.is_access_all_variables() {
            continue;
        }
        // FREE parameters are never missing, but a value present must still fit
        let value = job.input(&param.name);
        if let Some(v) = &value {
            if !matches_type(param.param_type, v) {
                violations.push(type_violation(param, v));
            }
        }
        let blank = value.as_ref().map_or(true, Value::is_blank);
        if blank && param.level == Level::Required {
            violations.push(format!("Param[{}] is missing", param.name));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ContractError {
            kind: ContractKind::Input,
            runner_type: descriptor.runner_type.clone(),
            violations,
        })
    }
}

/// Checks the values produced by an execution against the declared outputs.
pub fn check_output(descriptor: &RunnerDescriptor, produced: &Variables) -> Result<(), ContractError> {
    let mut violations = Vec::new();
    let mut wildcard = false;

    for param in &descriptor.outputs {
        if param.is_access_all_variables() {
            wildcard = true;
            continue;
        }
        match produced.get(&param.name) {
            None if param.level == Level::Required => {
                violations.push(format!("Param[{}] is missing", param.name));
            }
            Some(value) if !matches_type(param.param_type, value) => {
                violations.push(type_violation(param, value));
            }
            _ => {}
        }
    }

    if !wildcard {
        let declared: HashSet<&str> = descriptor.outputs.iter().map(|p| p.name.as_str()).collect();
        let mut extra: Vec<&String> = produced
            .keys()
            .filter(|k| !declared.contains(k.as_str()))
            .collect();
        extra.sort();
        for key in extra {
            violations.push(format!("Output not defined in the contract[{}]", key));
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(ContractError {
            kind: ContractKind::Output,
            runner_type: descriptor.runner_type.clone(),
            violations,
        })
    }
}

fn type_violation(param: &RunnerParameter, value: &Value) -> String {
    format!(
        "Param[{}] expect class[{}] received[{}]",
        param.name,
        param.param_type.name(),
        value.kind()
    )
}

/// Relaxed shape check: numbers and booleans may arrive as strings.
pub fn matches_type(param_type: ParamType, value: &Value) -> bool {
    if value.is_null() {
        return true;
    }
    match param_type {
        ParamType::Object => true,
        ParamType::String => matches!(value, Value::String(_)),
        ParamType::Boolean => match value {
            Value::Bool(_) => true,
            Value::String(s) => matches!(s.to_uppercase().as_str(), "TRUE" | "YES" | "FALSE" | "NO"),
            _ => false,
        },
        ParamType::Integer => match value {
            Value::Int(n) => i32::try_from(*n).is_ok(),
            Value::Number(n) => n.fract() == 0.0 && *n >= i32::MIN as f64 && *n <= i32::MAX as f64,
            Value::String(s) => s.parse::<i32>().is_ok(),
            _ => false,
        },
        ParamType::Long => match value {
            Value::Int(_) => true,
            Value::Number(n) => n.fract() == 0.0 && n.abs() < i64::MAX as f64,
            Value::String(s) => s.parse::<i64>().is_ok(),
            _ => false,
        },
        ParamType::Double => match value {
            Value::Int(_) | Value::Number(_) => true,
            Value::String(s) => s.parse::<f64>().is_ok(),
            _ => false,
        },
        ParamType::Duration => match value {
            Value::Int(n) => *n >= 0,
            Value::Number(n) => *n >= 0.0,
            Value::String(s) => parse_iso_duration(s).is_some(),
            _ => false,
        },
        ParamType::Map => matches!(value, Value::Object(_)),
        ParamType::List => matches!(value, Value::Array(_)),
        ParamType::File => matches!(value, Value::String(_) | Value::Object(_)),
    }
}

/// Parses `PnDTnHnMnS` into milliseconds. Years and months are not accepted.
pub fn parse_iso_duration(text: &str) -> Option<u64> {
    let rest = text.trim().strip_prefix('P')?;
    if rest.is_empty() {
        return None;
    }
    let mut total = 0f64;
    let mut in_time = false;
    let mut number = String::new();
    let mut components = 0;

    for c in rest.chars() {
        match c {
            'T' => {
                if in_time || !number.is_empty() {
                    return None;
                }
                in_time = true;
            }
            '0'..='9' | '.' => number.push(c),
            unit => {
                let amount: f64 = number.parse().ok()?;
                number.clear();
                let factor = match (unit, in_time) {
                    ('W', false) => 7.0 * 86_400_000.0,
                    ('D', false) => 86_400_000.0,
                    ('H', true) => 3_600_000.0,
                    ('M', true) => 60_000.0,
                    ('S', true) => 1_000.0,
                    _ => return None,
                };
                total += amount * factor;
                components += 1;
            }
        }
    }

    if !number.is_empty() || components == 0 {
        return None;
    }
    Some(total as u64)
}
