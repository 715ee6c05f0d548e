//! Configuration loading from disk.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use thiserror::Error;

use crate::config::schema::ConfigDocument;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),

    #[error("unknown database driver '{0}' (expected postgres, mysql or sqlite)")]
    UnknownDialect(String),

    #[error("failed to watch {}: {source}", path.display())]
    Watch {
        path: PathBuf,
        #[source]
        source: notify::Error,
    },
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Load and validate configuration from a TOML file.
///
/// The returned document has version 0; [`ConfigStore`] assigns versions.
pub fn load_config(path: &Path) -> Result<ConfigDocument, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let doc: ConfigDocument = toml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    validate_config(&doc).map_err(ConfigError::Validation)?;

    Ok(doc)
}

/// The configuration source of a running process.
///
/// Every successful [`load`](Self::load) gets the next version number. The last
/// document that was actually applied is kept separately and only moves on
/// [`commit`](Self::commit), so a rejected reload never becomes "current".
#[derive(Debug)]
pub struct ConfigStore {
    path: PathBuf,
    next_version: AtomicU64,
    current: ArcSwap<ConfigDocument>,
}

impl ConfigStore {
    /// Load the initial document (version 1).
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let mut doc = load_config(&path)?;
        doc.version = 1;

        tracing::info!(
            path = %path.display(),
            tenants = doc.databases.len(),
            mode = %doc.application.mode,
            "Configuration loaded"
        );

        Ok(Self {
            path,
            next_version: AtomicU64::new(2),
            current: ArcSwap::from_pointee(doc),
        })
    }

    /// Re-read the source. Does not change [`current`](Self::current).
    pub fn load(&self) -> Result<Arc<ConfigDocument>, ConfigError> {
        let mut doc = load_config(&self.path)?;
        doc.version = self.next_version.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(doc))
    }

    /// Record `doc` as the applied configuration.
    pub fn commit(&self, doc: Arc<ConfigDocument>) {
        self.current.store(doc);
    }

    /// The last applied configuration.
    pub fn current(&self) -> Arc<ConfigDocument> {
        self.current.load_full()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const DOC: &str = r#"
        [application]
        host = "127.0.0.1"
        port = 0

        [database]
        driver = "sqlite"
        source = "sqlite::memory:"
    "#;

    fn write_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/definitely/not/here.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let file = write_file("[application\nhost = ");
        let err = load_config(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn invalid_values_are_validation_error() {
        let file = write_file(&DOC.replace("sqlite::memory:", ""));
        let err = load_config(file.path()).unwrap_err();
        match err {
            ConfigError::Validation(errors) => assert_eq!(errors[0].field, "database.source"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn store_versions_loads_and_commits_explicitly() {
        let file = write_file(DOC);
        let store = ConfigStore::open(file.path()).unwrap();
        assert_eq!(store.current().version, 1);

        let next = store.load().unwrap();
        assert_eq!(next.version, 2);
        assert_eq!(store.current().version, 1);

        store.commit(next);
        assert_eq!(store.current().version, 2);
        assert_eq!(store.load().unwrap().version, 3);
    }

    #[test]
    fn failed_reload_keeps_current() {
        let file = write_file(DOC);
        let store = ConfigStore::open(file.path()).unwrap();

        fs::write(file.path(), "not = [valid").unwrap();

        assert!(store.load().is_err());
        assert_eq!(store.current().version, 1);
    }
}
