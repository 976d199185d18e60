use chrono::{DateTime, Utc};
use relaycore::Runner;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Longest load log kept for an archive
pub const LOAD_LOG_LIMIT: usize = 1999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Origin {
    Embedded,
    Archive,
}

/// Persisted trace of a discovered runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerDefinition {
    pub name: String,
    pub runner_type: String,
    pub class_name: String,
    pub collection_name: Option<String>,
    pub origin: Origin,
    /// Archive the runner was loaded from
    pub archive: Option<String>,
    pub active: bool,
    pub framework_runner: bool,
}

impl RunnerDefinition {
    pub fn from_runner(runner: &Runner, class_name: &str, origin: Origin, archive: Option<String>) -> Self {
        let descriptor = runner.descriptor();
        Self {
            name: runner.identification().to_string(),
            runner_type: runner.runner_type().to_string(),
            class_name: class_name.to_string(),
            collection_name: descriptor.collection_name.clone(),
            origin,
            archive,
            active: true,
            framework_runner: descriptor.framework_runner,
        }
    }
}

/// Stored runner archive
#[derive(Debug, Clone, Serialize)]
pub struct Archive {
    pub name: String,
    #[serde(skip)]
    pub bytes: Vec<u8>,
    pub loaded_time: DateTime<Utc>,
    pub file_modified: Option<DateTime<Utc>>,
    pub load_log: String,
}

impl Archive {
    pub fn set_load_log(&mut self, log: &str) {
        self.load_log = truncate(log, LOAD_LOG_LIMIT);
    }
}

fn truncate(text: &str, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((index, _)) => text[..index].to_string(),
        None => text.to_string(),
    }
}

/// Selection over stored definitions
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub active_only: bool,
    pub name: Option<String>,
    pub runner_type: Option<String>,
    pub archive: Option<String>,
    pub framework_only: bool,
    pub exclude_framework: bool,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        Self {
            active_only: true,
            ..Self::default()
        }
    }

    pub fn by_type(runner_type: impl Into<String>) -> Self {
        Self {
            runner_type: Some(runner_type.into()),
            ..Self::default()
        }
    }

    pub fn by_name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    pub fn by_archive(archive: impl Into<String>) -> Self {
        Self {
            archive: Some(archive.into()),
            ..Self::default()
        }
    }

    pub fn without_framework(mut self) -> Self {
        self.exclude_framework = true;
        self
    }

    pub fn framework_only(mut self) -> Self {
        self.framework_only = true;
        self
    }

    pub fn matches(&self, definition: &RunnerDefinition) -> bool {
        if self.active_only && !definition.active {
            return false;
        }
        if self.exclude_framework && definition.framework_runner {
            return false;
        }
        if self.framework_only && !definition.framework_runner {
            return false;
        }
        if let Some(name) = &self.name {
            if &definition.name != name {
                return false;
            }
        }
        if let Some(runner_type) = &self.runner_type {
            if &definition.runner_type != runner_type {
                return false;
            }
        }
        if let Some(archive) = &self.archive {
            if definition.archive.as_ref() != Some(archive) {
                return false;
            }
        }
        true
    }
}

/// In-memory store of runner definitions and archives
#[derive(Default)]
pub struct RunnerStorage {
    definitions: RwLock<HashMap<String, RunnerDefinition>>,
    archives: RwLock<HashMap<String, Archive>>,
}

impl RunnerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saves the definition unless the name is known. Returns the stored one.
    pub async fn save_definition(&self, definition: RunnerDefinition) -> RunnerDefinition {
        let mut definitions = self.definitions.write().await;
        if let Some(existing) = definitions.get(&definition.name) {
            if existing.runner_type != definition.runner_type {
                tracing::error!(
                    "Runner [{}] is already registered with type [{}], type [{}] from [{}] is ignored",
                    existing.name,
                    existing.runner_type,
                    definition.runner_type,
                    definition.class_name
                );
            }
            return existing.clone();
        }
        definitions.insert(definition.name.clone(), definition.clone());
        definition
    }

    pub async fn save_embedded_runner(&self, runner: &Runner, class_name: &str) -> RunnerDefinition {
        self.save_definition(RunnerDefinition::from_runner(runner, class_name, Origin::Embedded, None))
            .await
    }

    pub async fn save_upload_runner(&self, runner: &Runner, class_name: &str, archive: &str) -> RunnerDefinition {
        self.save_definition(RunnerDefinition::from_runner(
            runner,
            class_name,
            Origin::Archive,
            Some(archive.to_string()),
        ))
        .await
    }

    pub async fn definitions(&self, filter: &Filter) -> Vec<RunnerDefinition> {
        let mut list: Vec<RunnerDefinition> = self
            .definitions
            .read()
            .await
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn definition(&self, name: &str) -> Option<RunnerDefinition> {
        self.definitions.read().await.get(name).cloned()
    }

    /// Flags every definition of this type. Returns how many were touched.
    pub async fn set_active(&self, runner_type: &str, active: bool) -> usize {
        let mut definitions = self.definitions.write().await;
        let mut touched = 0;
        for definition in definitions.values_mut().filter(|d| d.runner_type == runner_type) {
            definition.active = active;
            touched += 1;
        }
        touched
    }

    pub async fn remove_definition(&self, name: &str) -> Option<RunnerDefinition> {
        self.definitions.write().await.remove(name)
    }

    pub async fn save_archive(&self, archive: Archive) {
        self.archives.write().await.insert(archive.name.clone(), archive);
    }

    pub async fn archive(&self, name: &str) -> Option<Archive> {
        self.archives.read().await.get(name).cloned()
    }

    pub async fn archives(&self) -> Vec<Archive> {
        let mut list: Vec<Archive> = self.archives.read().await.values().cloned().collect();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        list
    }

    pub async fn remove_archive(&self, name: &str) -> Option<Archive> {
        self.archives.write().await.remove(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_log_is_truncated() {
        let mut archive = Archive {
            name: "a.jar".to_string(),
            bytes: Vec::new(),
            loaded_time: Utc::now(),
            file_modified: None,
            load_log: String::new(),
        };
        archive.set_load_log(&"x".repeat(5000));
        assert_eq!(archive.load_log.len(), LOAD_LOG_LIMIT);

        archive.set_load_log("short");
        assert_eq!(archive.load_log, "short");
    }

    fn definition(name: &str, runner_type: &str) -> RunnerDefinition {
        RunnerDefinition {
            name: name.to_string(),
            runner_type: runner_type.to_string(),
            class_name: format!("tests::{}", runner_type),
            collection_name: None,
            origin: Origin::Embedded,
            archive: None,
            active: true,
            framework_runner: false,
        }
    }

    #[tokio::test]
    async fn first_definition_of_a_name_wins() {
        let storage = RunnerStorage::new();
        storage.save_definition(definition("Mailer", "t-mail")).await;

        let stored = storage.save_definition(definition("Mailer", "t-sms")).await;
        assert_eq!(stored.runner_type, "t-mail");
        assert!(storage.definitions(&Filter::by_type("t-sms")).await.is_empty());
        assert_eq!(storage.definitions(&Filter::all()).await.len(), 1);
    }
}
