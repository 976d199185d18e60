//! Runner archives shipped as native libraries.
//!
//! A plugin library exports `relay_register_classes`, which fills a
//! [`ClassCatalog`] with the constructors of its runners. The
//! [`export_runner_classes!`](crate::export_runner_classes) macro writes that
//! export. Plugins must be built with the same compiler and the same
//! `relayruntime` version as the host.

use crate::loader::{ArchiveHandle, ArchiveLoader, ClassCatalog, LoaderError};
use crate::registry::Component;
use libloading::{Library, Symbol};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Symbol every plugin library exports
pub const REGISTRATION_SYMBOL: &[u8] = b"relay_register_classes";

type RegisterFn = fn(&mut ClassCatalog);

/// Declares the registration function of a plugin library
#[macro_export]
macro_rules! export_runner_classes {
    ($register:path) => {
        #[no_mangle]
        pub fn relay_register_classes(catalog: &mut $crate::ClassCatalog) {
            $register(catalog)
        }
    };
}

/// Kind of native library recognized from its first bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LibraryFormat {
    Elf,
    MachO,
    Pe,
}

impl LibraryFormat {
    pub fn detect(bytes: &[u8]) -> Option<Self> {
        match bytes {
            [0x7f, b'E', b'L', b'F', ..] => Some(LibraryFormat::Elf),
            [0xfe, 0xed, 0xfa, 0xce | 0xcf, ..]
            | [0xce | 0xcf, 0xfa, 0xed, 0xfe, ..]
            | [0xca, 0xfe, 0xba, 0xbe, ..] => Some(LibraryFormat::MachO),
            [b'M', b'Z', ..] => Some(LibraryFormat::Pe),
            _ => None,
        }
    }

    fn extension(self) -> &'static str {
        match self {
            LibraryFormat::Elf => "so",
            LibraryFormat::MachO => "dylib",
            LibraryFormat::Pe => "dll",
        }
    }
}

struct LoadedLibrary {
    // kept alive: the constructors and every runner they build live in it
    library: Arc<Library>,
    catalog: ClassCatalog,
}

/// Loads native runner libraries. Archives that are not a native library go
/// to the fallback loader when one is set.
///
/// A library stays loaded as long as the loader lives, runners built from it
/// may still be running after their archive is replaced.
pub struct DylibArchiveLoader {
    cache_dir: PathBuf,
    fallback: Option<Arc<dyn ArchiveLoader>>,
    loaded: Mutex<HashMap<u64, LoadedLibrary>>,
}

impl DylibArchiveLoader {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fallback: None,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Libraries are copied under the system temporary directory
    pub fn in_temp_dir() -> Self {
        Self::new(std::env::temp_dir().join("relay-plugins"))
    }

    pub fn with_fallback(mut self, fallback: Arc<dyn ArchiveLoader>) -> Self {
        self.fallback = Some(fallback);
        self
    }

    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    fn load(
        &self,
        name: &str,
        format: LibraryFormat,
        bytes: &[u8],
    ) -> Result<(Arc<Library>, ClassCatalog), LoaderError> {
        let invalid = |reason: String| LoaderError::InvalidArchive {
            name: name.to_string(),
            reason,
        };

        let digest = digest(name, bytes);
        let mut loaded = self.loaded.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(library) = loaded.get(&digest) {
            return Ok((library.library.clone(), library.catalog.clone()));
        }

        std::fs::create_dir_all(&self.cache_dir).map_err(|e| invalid(e.to_string()))?;
        let path = self
            .cache_dir
            .join(format!("{}-{:016x}.{}", file_stem(name), digest, format.extension()));
        std::fs::write(&path, bytes).map_err(|e| invalid(e.to_string()))?;

        // SAFETY: loading runs the library initializers, the archive is trusted
        // the same way any uploaded runner code is
        let library = unsafe { Library::new(&path) }.map_err(|e| invalid(e.to_string()))?;
        let mut catalog = ClassCatalog::new();
        {
            // SAFETY: the symbol is declared by `export_runner_classes!` with this signature
            let register: Symbol<RegisterFn> =
                unsafe { library.get(REGISTRATION_SYMBOL) }.map_err(|e| invalid(e.to_string()))?;
            register(&mut catalog);
        }
        tracing::info!(
            "Library [{}] loaded from {}, {} classes",
            name,
            path.display(),
            catalog.class_names().len()
        );

        let library = Arc::new(library);
        loaded.insert(
            digest,
            LoadedLibrary {
                library: library.clone(),
                catalog: catalog.clone(),
            },
        );
        Ok((library, catalog))
    }
}

impl ArchiveLoader for DylibArchiveLoader {
    fn open(&self, name: &str, bytes: &[u8]) -> Result<Box<dyn ArchiveHandle>, LoaderError> {
        let Some(format) = LibraryFormat::detect(bytes) else {
            return match &self.fallback {
                Some(fallback) => fallback.open(name, bytes),
                None => Err(LoaderError::InvalidArchive {
                    name: name.to_string(),
                    reason: "not a native library".to_string(),
                }),
            };
        };
        let (library, catalog) = self.load(name, format, bytes)?;
        Ok(Box::new(DylibHandle {
            _library: library,
            catalog,
        }))
    }
}

struct DylibHandle {
    _library: Arc<Library>,
    catalog: ClassCatalog,
}

impl ArchiveHandle for DylibHandle {
    fn class_names(&self) -> Vec<String> {
        self.catalog.class_names()
    }

    fn load_class(&self, class_name: &str) -> Result<Component, LoaderError> {
        self.catalog.instantiate(class_name)
    }
}

fn digest(name: &str, bytes: &[u8]) -> u64 {
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    bytes.hash(&mut hasher);
    hasher.finish()
}

fn file_stem(name: &str) -> String {
    let stem = Path::new(name)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("plugin");
    stem.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::ManifestArchiveLoader;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("relay-plugin-test-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn formats_are_detected() {
        assert_eq!(LibraryFormat::detect(b"\x7fELF\x02\x01"), Some(LibraryFormat::Elf));
        assert_eq!(LibraryFormat::detect(&[0xcf, 0xfa, 0xed, 0xfe]), Some(LibraryFormat::MachO));
        assert_eq!(LibraryFormat::detect(b"MZ\x90\x00"), Some(LibraryFormat::Pe));
        assert_eq!(LibraryFormat::detect(br#"{"classes": []}"#), None);
        assert_eq!(LibraryFormat::detect(b""), None);
    }

    #[test]
    fn other_archives_go_to_the_fallback() {
        let mut catalog = ClassCatalog::new();
        catalog.register("acme::Other", || Ok(Component::Other));
        let loader = DylibArchiveLoader::new(scratch_dir())
            .with_fallback(Arc::new(ManifestArchiveLoader::new(catalog)));

        let handle = loader.open("acme.jar", br#"{"classes": ["acme::Other"]}"#).unwrap();
        assert_eq!(handle.class_names(), vec!["acme::Other".to_string()]);
        assert!(matches!(handle.load_class("acme::Other"), Ok(Component::Other)));
        assert!(!loader.cache_dir().exists(), "nothing is written for a manifest");
    }

    #[test]
    fn unknown_bytes_without_fallback() {
        let loader = DylibArchiveLoader::new(scratch_dir());
        let error = loader.open("acme.bin", b"not a library").err().unwrap();
        assert!(matches!(error, LoaderError::InvalidArchive { .. }));
        assert!(error.to_string().contains("not a native library"));
    }

    #[test]
    fn truncated_library_is_rejected() {
        let dir = scratch_dir();
        let loader = DylibArchiveLoader::new(&dir);
        let result = loader.open("broken.so", b"\x7fELF\x02\x01\x01\x00");
        assert!(matches!(result, Err(LoaderError::InvalidArchive { .. })));
        let _ = std::fs::remove_dir_all(dir);
    }

    mod exported {
        fn register(catalog: &mut crate::ClassCatalog) {
            catalog.register("acme::Other", || Ok(crate::Component::Other));
        }

        crate::export_runner_classes!(register);
    }

    #[test]
    fn exported_function_fills_the_catalog() {
        let mut catalog = ClassCatalog::new();
        exported::relay_register_classes(&mut catalog);
        assert_eq!(catalog.class_names(), vec!["acme::Other".to_string()]);
    }

    #[test]
    fn cached_file_names_are_sanitized() {
        assert_eq!(file_stem("acme plugin.so"), "acme_plugin");
        assert_eq!(file_stem("../x.dll"), "x");
        assert_ne!(digest("a.so", b"1"), digest("a.so", b"2"));
    }
}
