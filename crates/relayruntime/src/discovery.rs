use crate::history::HistoryFactory;
use crate::loader::{is_reserved, ArchiveLoader};
use crate::operations::OperationLog;
use crate::registry::{detect_runners, EmbeddedCatalog};
use crate::storage::{Archive, Filter, Origin, RunnerDefinition, RunnerStorage};
use chrono::{DateTime, Utc};
use relaycore::{RelayError, Runner};
use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

/// Where runners come from and how they are found
pub struct DiscoverySettings {
    pub upload_path: Option<PathBuf>,
    /// Accepted file extensions, comma separated
    pub archive_extension: String,
    pub force_refresh: bool,
}

impl DiscoverySettings {
    /// Whether a file of the upload path is an archive
    pub fn accepts(&self, file: &Path) -> bool {
        let Some(extension) = file.extension().and_then(|e| e.to_str()) else {
            return false;
        };
        self.archive_extension
            .split(',')
            .map(str::trim)
            .any(|accepted| !accepted.is_empty() && accepted.eq_ignore_ascii_case(extension))
    }
}

/// Discovers runners, persists their definitions and rebuilds live runners
/// from them.
pub struct RunnerFactory {
    storage: Arc<RunnerStorage>,
    embedded: EmbeddedCatalog,
    loader: Arc<dyn ArchiveLoader>,
    history: Arc<HistoryFactory>,
    operations: Arc<OperationLog>,
    settings: DiscoverySettings,
}

impl RunnerFactory {
    pub fn new(
        storage: Arc<RunnerStorage>,
        embedded: EmbeddedCatalog,
        loader: Arc<dyn ArchiveLoader>,
        history: Arc<HistoryFactory>,
        operations: Arc<OperationLog>,
        settings: DiscoverySettings,
    ) -> Self {
        Self {
            storage,
            embedded,
            loader,
            history,
            operations,
            settings,
        }
    }

    pub fn storage(&self) -> &Arc<RunnerStorage> {
        &self.storage
    }

    /// Embedded runners first, then the upload directory
    pub async fn init(&self) -> Result<Vec<RunnerDefinition>, RelayError> {
        let mut definitions = self.register_embedded().await;
        definitions.extend(self.load_storage_from_upload_path().await?);
        tracing::info!("Runner discovery found {} runners", definitions.len());
        Ok(definitions)
    }

    pub async fn register_embedded(&self) -> Vec<RunnerDefinition> {
        let mut definitions = Vec::new();
        for (class_name, runner) in self.embedded.runners() {
            let errors = runner.check_valid_definition();
            if !errors.is_empty() {
                tracing::error!(
                    "Embedded runner [{}] is invalid, skipped: {}",
                    runner.identification(),
                    errors.join("; ")
                );
                continue;
            }
            let definition = self.storage.save_embedded_runner(&runner, &class_name).await;
            tracing::info!("Embedded runner [{}] type [{}]", definition.name, definition.runner_type);
            definitions.push(definition);
        }
        definitions
    }

    /// Loads every archive of the upload directory into the storage
    pub async fn load_storage_from_upload_path(&self) -> Result<Vec<RunnerDefinition>, RelayError> {
        let Some(path) = self.settings.upload_path.clone() else {
            return Ok(Vec::new());
        };
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.operations.log_error(
                None,
                format!("Upload path [{}] does not exist", path.display()),
            );
            return Ok(Vec::new());
        }

        let mut definitions = Vec::new();
        let mut entries = tokio::fs::read_dir(&path).await?;
        while let Some(entry) = entries.next_entry().await? {
            let file = entry.path();
            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                continue;
            }
            if !self.settings.accepts(&file) {
                continue;
            }
            let name = entry.file_name().to_string_lossy().to_string();
            tracing::info!("Check archive [{}]", name);
            let modified = metadata.modified().ok().map(DateTime::<Utc>::from);
            let bytes = tokio::fs::read(&file).await?;
            definitions.extend(
                self.load_archive(&name, bytes, modified, self.settings.force_refresh)
                    .await,
            );
        }
        Ok(definitions)
    }

    /// Stores an archive and registers its runners. An archive already loaded,
    /// unchanged and still owning runners is trusted as stored.
    pub async fn load_archive(
        &self,
        name: &str,
        bytes: Vec<u8>,
        file_modified: Option<DateTime<Utc>>,
        force: bool,
    ) -> Vec<RunnerDefinition> {
        let stored = self.storage.archive(name).await;
        let mut analysis = String::new();
        let mut reload = false;
        if force {
            reload = true;
            analysis.push_str("ForceRefresh,");
        }
        match &stored {
            None => {
                reload = true;
                analysis.push_str("NewArchive,");
            }
            Some(archive) => {
                if matches!(file_modified, Some(modified) if archive.loaded_time < modified) {
                    reload = true;
                    analysis.push_str("NewVersion,");
                }
            }
        }

        if !reload {
            let owned = self.storage.definitions(&Filter::by_archive(name)).await;
            let _ = write!(analysis, "found {} runners,", owned.len());
            if !owned.is_empty() {
                tracing::info!("Archive [{}]: {} reload:false", name, analysis);
                return owned;
            }
        }
        tracing::info!("Archive [{}]: {} reload:true", name, analysis);

        let began = Instant::now();
        let mut archive = Archive {
            name: name.to_string(),
            bytes,
            loaded_time: Utc::now(),
            file_modified,
            load_log: String::new(),
        };

        let mut log = String::new();
        let mut errors = String::new();
        let mut definitions = Vec::new();
        match self.loader.open(name, &archive.bytes) {
            Ok(handle) => {
                for class_name in handle.class_names() {
                    if is_reserved(&class_name) {
                        continue;
                    }
                    let component = match handle.load_class(&class_name) {
                        Ok(component) => component,
                        Err(e) => {
                            tracing::info!("Can't load class [{}]: {}", class_name, e);
                            let _ = write!(errors, "ERROR,Class[{}]:{}; ", class_name, e);
                            continue;
                        }
                    };
                    for runner in detect_runners(&component) {
                        let invalid = runner.check_valid_definition();
                        if !invalid.is_empty() {
                            let _ = write!(
                                errors,
                                "INVALID,Runner[{}]:{}; ",
                                runner.identification(),
                                invalid.join(", ")
                            );
                            continue;
                        }
                        let definition = self.storage.save_upload_runner(&runner, &class_name, name).await;
                        let _ = write!(
                            log,
                            "RunnerDetection[{}], type[{}]; ",
                            definition.name, definition.runner_type
                        );
                        definitions.push(definition);
                    }
                }
            }
            Err(e) => {
                self.operations
                    .log_error(None, format!("Can't register archive [{}]: {}", name, e));
                let _ = write!(errors, "ERROR,Archive:{}; ", e);
            }
        }
        let _ = write!(log, " in {} ms", began.elapsed().as_millis());
        archive.set_load_log(&format!("{}{}", log, errors));
        self.storage.save_archive(archive).await;

        tracing::info!(
            "Load [{}] runners: {} in {} ms",
            name,
            definitions.len(),
            began.elapsed().as_millis()
        );
        definitions
    }

    /// Removes definitions whose runner can't be found anymore, with their history
    pub async fn synchronize(&self) -> Vec<RunnerDefinition> {
        let embedded_types: HashSet<String> = self.embedded.list_runner_types().into_iter().collect();
        let mut removed = Vec::new();
        for definition in self.storage.definitions(&Filter::all()).await {
            let exists = match definition.origin {
                Origin::Embedded => embedded_types.contains(&definition.runner_type),
                Origin::Archive => self.runner_for_definition(&definition).await.is_some(),
            };
            if exists {
                continue;
            }
            tracing::info!(
                "Runner [{}] type [{}] disappeared, purge its definition",
                definition.name,
                definition.runner_type
            );
            self.storage.remove_definition(&definition.name).await;
            self.history.purge(&definition.runner_type).await;
            removed.push(definition);
        }
        removed
    }

    /// Live runners for every definition matching the filter
    pub async fn get_all_runners(&self, filter: &Filter) -> Vec<Runner> {
        let mut runners = Vec::new();
        for definition in self.storage.definitions(filter).await {
            match self.runner_for_definition(&definition).await {
                Some(runner) => runners.push(runner),
                None => tracing::error!(
                    "No runner behind definition [{}] type [{}]",
                    definition.name,
                    definition.runner_type
                ),
            }
        }
        runners
    }

    pub async fn get_runner_by_name(&self, name: &str) -> Option<Runner> {
        let definition = self.storage.definition(name).await?;
        self.runner_for_definition(&definition).await
    }

    pub async fn runner_for_definition(&self, definition: &RunnerDefinition) -> Option<Runner> {
        match definition.origin {
            Origin::Embedded => self
                .embedded
                .runners()
                .into_iter()
                .map(|(_, runner)| runner)
                .find(|runner| runner.identification() == definition.name)
                .or_else(|| self.embedded.runner_by_type(&definition.runner_type)),
            Origin::Archive => {
                let archive_name = definition.archive.as_deref()?;
                let archive = self.storage.archive(archive_name).await?;
                let handle = match self.loader.open(archive_name, &archive.bytes) {
                    Ok(handle) => handle,
                    Err(e) => {
                        tracing::error!("Can't open archive [{}]: {}", archive_name, e);
                        return None;
                    }
                };
                let component = match handle.load_class(&definition.class_name) {
                    Ok(component) => component,
                    Err(e) => {
                        tracing::error!("Can't load [{}] from [{}]: {}", definition.class_name, archive_name, e);
                        return None;
                    }
                };
                detect_runners(&component)
                    .into_iter()
                    .find(|runner| runner.runner_type() == definition.runner_type)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn archive_extensions_are_a_list() {
        let settings = DiscoverySettings {
            upload_path: None,
            archive_extension: "jar, so,DLL".to_string(),
            force_refresh: false,
        };
        assert!(settings.accepts(Path::new("/up/acme.jar")));
        assert!(settings.accepts(Path::new("/up/libacme.so")));
        assert!(settings.accepts(Path::new("/up/acme.dll")));
        assert!(!settings.accepts(Path::new("/up/acme.dylib")));
        assert!(!settings.accepts(Path::new("/up/README")));
    }
}
