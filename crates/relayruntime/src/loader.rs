use crate::registry::Component;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Classes belonging to the runtime itself, never instantiated from an archive
pub const RESERVED_PREFIXES: &[&str] = &["relaycore::", "relayruntime::", "std::"];

#[derive(Error, Debug, Clone)]
pub enum LoaderError {
    #[error("Archive [{name}] can't be opened: {reason}")]
    InvalidArchive { name: String, reason: String },

    #[error("Class [{0}] not found")]
    ClassNotFound(String),

    #[error("Class [{class_name}] can't be instantiated: {reason}")]
    Instantiation { class_name: String, reason: String },
}

/// Opens runner archives
pub trait ArchiveLoader: Send + Sync {
    fn open(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn ArchiveHandle>, LoaderError>;
}

/// An opened archive. Each class is loaded on its own so one failure does not
/// spoil the rest.
pub trait ArchiveHandle: Send {
    fn class_names(&self) -> Vec<String>;

    fn load_class(&self, class_name: &str) -> Result<Component, LoaderError>;
}

pub fn is_reserved(class_name: &str) -> bool {
    RESERVED_PREFIXES.iter().any(|prefix| class_name.starts_with(prefix))
}

pub type ComponentConstructor = Arc<dyn Fn() -> Result<Component, String> + Send + Sync>;

/// Constructors the process knows, by class name
#[derive(Clone, Default)]
pub struct ClassCatalog {
    constructors: HashMap<String, ComponentConstructor>,
}

impl ClassCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, class_name: impl Into<String>, constructor: F)
    where
        F: Fn() -> Result<Component, String> + Send + Sync + 'static,
    {
        self.constructors.insert(class_name.into(), Arc::new(constructor));
    }

    pub fn class_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.constructors.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn contains(&self, class_name: &str) -> bool {
        self.constructors.contains_key(class_name)
    }

    pub fn instantiate(&self, class_name: &str) -> Result<Component, LoaderError> {
        let constructor = self
            .constructors
            .get(class_name)
            .ok_or_else(|| LoaderError::ClassNotFound(class_name.to_string()))?;
        constructor().map_err(|reason| LoaderError::Instantiation {
            class_name: class_name.to_string(),
            reason,
        })
    }
}

#[derive(Debug, Deserialize)]
struct Manifest {
    #[serde(default)]
    classes: Vec<String>,
}

/// Archive is a JSON manifest listing class names: `{"classes": ["..."]}`.
/// Names resolve against a [`ClassCatalog`].
pub struct ManifestArchiveLoader {
    catalog: ClassCatalog,
}

impl ManifestArchiveLoader {
    pub fn new(catalog: ClassCatalog) -> Self {
        Self { catalog }
    }
}

impl ArchiveLoader for ManifestArchiveLoader {
    fn open(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn ArchiveHandle>, LoaderError> {
        let manifest: Manifest = serde_json::from_slice(bytes).map_err(|e| LoaderError::InvalidArchive {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Box::new(ManifestHandle {
            classes: manifest.classes,
            catalog: self.catalog.clone(),
        }))
    }
}

struct ManifestHandle {
    classes: Vec<String>,
    catalog: ClassCatalog,
}

impl ArchiveHandle for ManifestHandle {
    fn class_names(&self) -> Vec<String> {
        self.classes.clone()
    }

    fn load_class(&self, class_name: &str) -> Result<Component, LoaderError> {
        self.catalog.instantiate(class_name)
    }
}
