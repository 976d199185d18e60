//! Secrets referenced from job variables.
//!
//! A string variable may hold `{{secrets.NAME}}` anywhere in its text, or be
//! exactly `secrets.NAME`. Connectors see the resolved value.

use crate::Value;
use std::collections::HashMap;

const PLACEHOLDER_START: &str = "{{secrets.";
const PLACEHOLDER_END: &str = "}}";
const BARE_PREFIX: &str = "secrets.";

/// Source of secret values, by key
pub trait SecretProvider: Send + Sync {
    fn secret(&self, key: &str) -> Option<String>;
}

/// Provider knowing no secret
pub struct NoSecrets;

impl SecretProvider for NoSecrets {
    fn secret(&self, _key: &str) -> Option<String> {
        None
    }
}

/// Configured secrets first, then the process environment
#[derive(Debug, Clone, Default)]
pub struct ConfigSecretProvider {
    values: HashMap<String, String>,
    from_env: bool,
}

impl ConfigSecretProvider {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values, from_env: true }
    }

    /// Only the configured values are visible
    pub fn without_env(mut self) -> Self {
        self.from_env = false;
        self
    }
}

impl SecretProvider for ConfigSecretProvider {
    fn secret(&self, key: &str) -> Option<String> {
        if let Some(value) = self.values.get(key) {
            return Some(value.clone());
        }
        if self.from_env {
            return std::env::var(key).ok();
        }
        None
    }
}

/// Replaces the secret references of a text. Unknown secrets stay as written.
pub fn replace_secrets(text: &str, provider: &dyn SecretProvider) -> String {
    if let Some(key) = text.trim().strip_prefix(BARE_PREFIX) {
        if !key.is_empty() && !key.contains(char::is_whitespace) {
            return match provider.secret(key) {
                Some(value) => value,
                None => {
                    tracing::warn!("Secret [{}] is not defined", key);
                    text.to_string()
                }
            };
        }
    }

    let mut result = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find(PLACEHOLDER_START) {
        let after = &rest[start + PLACEHOLDER_START.len()..];
        let Some(end) = after.find(PLACEHOLDER_END) else {
            break;
        };
        let key = after[..end].trim();
        result.push_str(&rest[..start]);
        match provider.secret(key) {
            Some(value) => result.push_str(&value),
            None => {
                tracing::warn!("Secret [{}] is not defined", key);
                result.push_str(&rest[start..start + PLACEHOLDER_START.len() + end + PLACEHOLDER_END.len()]);
            }
        }
        rest = &after[end + PLACEHOLDER_END.len()..];
    }
    result.push_str(rest);
    result
}

/// Resolves secrets in every string nested in the value
pub fn resolve_secrets(value: &Value, provider: &dyn SecretProvider) -> Value {
    match value {
        Value::String(text) if text.contains(BARE_PREFIX) => Value::String(replace_secrets(text, provider)),
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_secrets(v, provider)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_secrets(v, provider)))
                .collect(),
        ),
        other => other.clone(),
    }
}
