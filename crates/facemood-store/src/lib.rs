//! facemood-store — Persistence backends for the descriptor store.
//!
//! A backend only needs to read every identity back and upsert a single
//! identity by name. Loading and saving are explicit calls
//! ([`load_store`] / [`save_store`]); nothing is written implicitly.

pub mod json;
pub mod memory;
pub mod sqlite;

pub use json::JsonFileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

use facemood_core::{DescriptorStore, Identity, StoreError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PersistError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed JSON store: {0}")]
    Json(#[from] serde_json::Error),
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("persisted data violates store invariants: {0}")]
    Store(#[from] StoreError),
}

impl PersistError {
    pub(crate) fn io(path: &Path, source: std::io::Error) -> Self {
        PersistError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Durable home for identity records.
pub trait Backend: Send {
    /// Every persisted identity, in the order they were first saved.
    fn read_all(&self) -> Result<Vec<Identity>, PersistError>;

    /// Insert or replace the record for `identity.name`.
    fn upsert(&mut self, identity: &Identity) -> Result<(), PersistError>;

    fn upsert_all(&mut self, identities: &[Identity]) -> Result<(), PersistError> {
        for identity in identities {
            self.upsert(identity)?;
        }
        Ok(())
    }

    /// Short human-readable location, for logs.
    fn describe(&self) -> String;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Single JSON document on local disk.
    #[default]
    Json,
    Sqlite,
    /// Nothing survives the process.
    Memory,
}

impl BackendKind {
    /// Conventional file name for this backend inside a data directory.
    pub fn default_file_name(&self) -> &'static str {
        match self {
            BackendKind::Json => "people.json",
            BackendKind::Sqlite => "people.db",
            BackendKind::Memory => "",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            BackendKind::Json => "json",
            BackendKind::Sqlite => "sqlite",
            BackendKind::Memory => "memory",
        })
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(BackendKind::Json),
            "sqlite" => Ok(BackendKind::Sqlite),
            "memory" => Ok(BackendKind::Memory),
            other => Err(format!("unknown backend: {other} (expected json|sqlite|memory)")),
        }
    }
}

/// Open the backend of the given kind at `path`.
pub fn open(kind: BackendKind, path: &Path) -> Result<Box<dyn Backend>, PersistError> {
    let backend: Box<dyn Backend> = match kind {
        BackendKind::Json => Box::new(JsonFileBackend::open(path)?),
        BackendKind::Sqlite => Box::new(SqliteBackend::open(path)?),
        BackendKind::Memory => Box::new(MemoryBackend::new()),
    };
    tracing::debug!(backend = %backend.describe(), "opened persistence backend");
    Ok(backend)
}

/// Build a [`DescriptorStore`] from everything the backend holds.
///
/// With `dimension` set, every persisted descriptor must have that length.
pub fn load_store(
    backend: &dyn Backend,
    dimension: Option<usize>,
) -> Result<DescriptorStore, PersistError> {
    let identities = backend.read_all()?;
    let mut store = match dimension {
        Some(dim) => DescriptorStore::with_dimension(dim),
        None => DescriptorStore::new(),
    };
    store.restore_all(identities)?;

    tracing::info!(
        backend = %backend.describe(),
        people = store.len(),
        "descriptor store loaded"
    );
    Ok(store)
}

/// Write every identity in `store` through the backend.
pub fn save_store(backend: &mut dyn Backend, store: &DescriptorStore) -> Result<(), PersistError> {
    backend.upsert_all(store.identities())?;
    tracing::info!(
        backend = %backend.describe(),
        people = store.len(),
        "descriptor store saved"
    );
    Ok(())
}
