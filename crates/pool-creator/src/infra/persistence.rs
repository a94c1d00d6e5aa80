//! Durable wizard state: one JSON document per namespace.

use {
    crate::domain::WizardState,
    dashmap::DashMap,
    std::{
        io::Write as _,
        path::{Path, PathBuf},
    },
};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("could not access {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The document exists but is not a wizard state this version
    /// understands. There is no migration path; it has to be reset.
    #[error("{path} holds an unreadable wizard state ({source}); reset it to start over")]
    Malformed {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("could not encode the wizard state: {0}")]
    Encode(#[source] serde_json::Error),
}

#[cfg_attr(any(test, feature = "test-util"), mockall::automock)]
pub trait Store: Send + Sync {
    /// `None` if nothing was stored under `namespace` yet.
    fn load(&self, namespace: &str) -> Result<Option<WizardState>, StoreError>;

    fn save(&self, namespace: &str, state: &WizardState) -> Result<(), StoreError>;

    fn clear(&self, namespace: &str) -> Result<(), StoreError>;
}

/// Stores every namespace as `<dir>/<namespace>.json`. Writes go to a
/// temporary file in the same directory that is renamed over the document,
/// so a crash never leaves a half written state behind.
#[derive(Clone, Debug)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path(&self, namespace: &str) -> PathBuf {
        self.dir.join(format!("{namespace}.json"))
    }
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_owned(),
        source,
    }
}

impl Store for FileStore {
    fn load(&self, namespace: &str) -> Result<Option<WizardState>, StoreError> {
        let path = self.path(namespace);
        let contents = match std::fs::read(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(io_error(&path)(err)),
        };
        serde_json::from_slice(&contents)
            .map(Some)
            .map_err(|source| StoreError::Malformed { path, source })
    }

    fn save(&self, namespace: &str, state: &WizardState) -> Result<(), StoreError> {
        let path = self.path(namespace);
        std::fs::create_dir_all(&self.dir).map_err(io_error(&self.dir))?;
        let json = serde_json::to_vec_pretty(state).map_err(StoreError::Encode)?;
        let mut file = tempfile::NamedTempFile::new_in(&self.dir).map_err(io_error(&self.dir))?;
        file.write_all(&json).map_err(io_error(file.path()))?;
        file.as_file().sync_all().map_err(io_error(&path))?;
        file.persist(&path)
            .map_err(|err| io_error(&path)(err.error))?;
        Ok(())
    }

    fn clear(&self, namespace: &str) -> Result<(), StoreError> {
        let path = self.path(namespace);
        match std::fs::remove_file(&path) {
            Err(err) if err.kind() != std::io::ErrorKind::NotFound => Err(io_error(&path)(err)),
            _ => Ok(()),
        }
    }
}

/// Keeps the serialized documents in memory. Going through JSON keeps the
/// transient fields out, like the file store does.
#[derive(Debug, Default)]
pub struct MemoryStore {
    documents: DashMap<String, String>,
}

impl Store for MemoryStore {
    fn load(&self, namespace: &str) -> Result<Option<WizardState>, StoreError> {
        self.documents
            .get(namespace)
            .map(|json| {
                serde_json::from_str(&json).map_err(|source| StoreError::Malformed {
                    path: PathBuf::from(namespace),
                    source,
                })
            })
            .transpose()
    }

    fn save(&self, namespace: &str, state: &WizardState) -> Result<(), StoreError> {
        let json = serde_json::to_string(state).map_err(StoreError::Encode)?;
        self.documents.insert(namespace.to_owned(), json);
        Ok(())
    }

    fn clear(&self, namespace: &str) -> Result<(), StoreError> {
        self.documents.remove(namespace);
        Ok(())
    }
}
