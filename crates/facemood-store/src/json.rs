//! Local JSON document backend.
//!
//! All people live in one document. Writes replace the file by renaming a
//! freshly written sibling over it, so a crash mid-write leaves the previous
//! document intact.

use crate::{Backend, PersistError};
use facemood_core::Identity;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: u32,
    people: Vec<Identity>,
}

impl Default for Document {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            people: Vec::new(),
        }
    }
}

impl Document {
    fn merge(&mut self, identity: &Identity) {
        match self.people.iter_mut().find(|p| p.name == identity.name) {
            Some(existing) => *existing = identity.clone(),
            None => self.people.push(identity.clone()),
        }
    }
}

pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    /// Use `path` as the document location, creating its parent directory.
    /// The file itself is created on first write.
    pub fn open(path: &Path) -> Result<Self, PersistError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| PersistError::io(parent, e))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn read_document(&self) -> Result<Document, PersistError> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Document::default()),
            Err(e) => return Err(PersistError::io(&self.path, e)),
        };

        let document: Document = serde_json::from_slice(&bytes)?;
        if document.version != FORMAT_VERSION {
            return Err(PersistError::Corrupt(format!(
                "{}: unsupported format version {} (expected {FORMAT_VERSION})",
                self.path.display(),
                document.version
            )));
        }
        Ok(document)
    }

    fn write_document(&self, document: &Document) -> Result<(), PersistError> {
        let mut tmp_name = self.path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(".tmp");
        let tmp = self.path.with_file_name(tmp_name);

        let bytes = serde_json::to_vec_pretty(document)?;
        std::fs::write(&tmp, bytes).map_err(|e| PersistError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| PersistError::io(&self.path, e))?;

        tracing::debug!(
            path = %self.path.display(),
            people = document.people.len(),
            "wrote JSON store"
        );
        Ok(())
    }
}

impl Backend for JsonFileBackend {
    fn read_all(&self) -> Result<Vec<Identity>, PersistError> {
        Ok(self.read_document()?.people)
    }

    fn upsert(&mut self, identity: &Identity) -> Result<(), PersistError> {
        self.upsert_all(std::slice::from_ref(identity))
    }

    fn upsert_all(&mut self, identities: &[Identity]) -> Result<(), PersistError> {
        let mut document = self.read_document()?;
        for identity in identities {
            document.merge(identity);
        }
        self.write_document(&document)
    }

    fn describe(&self) -> String {
        format!("json:{}", self.path.display())
    }
}
