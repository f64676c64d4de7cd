use crate::{Backend, PersistError};
use facemood_core::Identity;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Process-local backend. Clones share the same records.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    people: Arc<Mutex<Vec<Identity>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail, to exercise fallback paths.
    #[cfg(any(test, feature = "test-util"))]
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    fn people(&self) -> MutexGuard<'_, Vec<Identity>> {
        self.people.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Backend for MemoryBackend {
    fn read_all(&self) -> Result<Vec<Identity>, PersistError> {
        Ok(self.people().clone())
    }

    fn upsert(&mut self, identity: &Identity) -> Result<(), PersistError> {
        if self.fail_writes.load(Ordering::Relaxed) {
            return Err(PersistError::io(
                std::path::Path::new(":memory:"),
                std::io::Error::new(std::io::ErrorKind::Other, "writes disabled"),
            ));
        }

        let mut people = self.people();
        match people.iter_mut().find(|p| p.name == identity.name) {
            Some(existing) => *existing = identity.clone(),
            None => people.push(identity.clone()),
        }
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facemood_core::{Descriptor, Mood, Observation};

    #[test]
    fn test_clones_share_records() {
        let mut writer = MemoryBackend::new();
        let reader = writer.clone();
        writer
            .upsert(&Identity {
                name: "Bob".into(),
                descriptor: Descriptor::new(vec![0.0; 2]),
                history: vec![Observation::now("a", Mood::Happy)],
            })
            .unwrap();
        assert_eq!(reader.read_all().unwrap().len(), 1);
    }

    #[test]
    fn test_fail_writes() {
        let mut backend = MemoryBackend::new();
        backend.set_fail_writes(true);
        let bob = Identity {
            name: "Bob".into(),
            descriptor: Descriptor::new(vec![0.0; 2]),
            history: vec![Observation::now("a", Mood::Happy)],
        };
        assert!(matches!(backend.upsert(&bob), Err(PersistError::Io { .. })));
        backend.set_fail_writes(false);
        assert!(backend.upsert(&bob).is_ok());
    }
}
