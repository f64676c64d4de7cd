//! In-memory descriptor store.
//!
//! Maps a person's name to their [`Identity`]. Names are unique, each
//! identity keeps the descriptor it was created with, and history is
//! append-only. Enumeration follows insertion order, which is also the
//! order the resolver scans in.

use crate::types::{Descriptor, DescriptorError, Identity, Mood, Observation};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("identity name must not be empty")]
    EmptyName,
    #[error("no descriptor supplied for new identity {0}")]
    MissingDescriptor(String),
    #[error("identity {0} already exists")]
    DuplicateName(String),
    #[error("identity {0} has no observations")]
    EmptyHistory(String),
    #[error("invalid descriptor for {name}: {source}")]
    Descriptor {
        name: String,
        #[source]
        source: DescriptorError,
    },
}

#[derive(Debug, Clone, Default)]
pub struct DescriptorStore {
    identities: Vec<Identity>,
    index: HashMap<String, usize>,
    /// Descriptor length shared by every identity. Fixed by the first insert
    /// unless pinned up front.
    dimension: Option<usize>,
}

impl DescriptorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store that only accepts descriptors of length `dimension`.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension: Some(dimension),
            ..Self::default()
        }
    }

    /// Rebuild a store from persisted records, checking every invariant.
    pub fn from_identities(
        identities: impl IntoIterator<Item = Identity>,
    ) -> Result<Self, StoreError> {
        let mut store = Self::new();
        store.restore_all(identities)?;
        Ok(store)
    }

    /// Insert previously persisted identities, in order.
    pub fn restore_all(
        &mut self,
        identities: impl IntoIterator<Item = Identity>,
    ) -> Result<(), StoreError> {
        for identity in identities {
            self.restore(identity)?;
        }
        Ok(())
    }

    /// Insert one previously persisted identity. The name is trimmed the
    /// same way [`record`](Self::record) trims it.
    pub fn restore(&mut self, mut identity: Identity) -> Result<(), StoreError> {
        let trimmed = identity.name.trim();
        if trimmed.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if trimmed.len() != identity.name.len() {
            identity.name = trimmed.to_string();
        }
        if self.index.contains_key(&identity.name) {
            return Err(StoreError::DuplicateName(identity.name));
        }
        if identity.history.is_empty() {
            return Err(StoreError::EmptyHistory(identity.name));
        }
        self.check_descriptor(&identity.name, &identity.descriptor)?;
        self.insert(identity);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Identity> {
        self.index.get(name).map(|&i| &self.identities[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// All identities in insertion order.
    pub fn all(&self) -> impl Iterator<Item = &Identity> + '_ {
        self.identities.iter()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    /// Record a sighting of `name` stamped with the current time.
    ///
    /// Creates the identity with `descriptor` if the name is new, otherwise
    /// appends to its history and ignores `descriptor`.
    pub fn upsert_observation(
        &mut self,
        name: &str,
        descriptor: Option<Descriptor>,
        image_ref: impl Into<String>,
        mood: Mood,
    ) -> Result<&Identity, StoreError> {
        self.record(name, descriptor, Observation::now(image_ref, mood))
    }

    /// [`upsert_observation`](Self::upsert_observation) with a caller-built observation.
    pub fn record(
        &mut self,
        name: &str,
        descriptor: Option<Descriptor>,
        observation: Observation,
    ) -> Result<&Identity, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }

        if let Some(&idx) = self.index.get(name) {
            let identity = &mut self.identities[idx];
            identity.history.push(observation);
            tracing::debug!(
                person = name,
                observations = identity.history.len(),
                "appended observation"
            );
            return Ok(&self.identities[idx]);
        }

        let descriptor =
            descriptor.ok_or_else(|| StoreError::MissingDescriptor(name.to_string()))?;
        self.create(name, descriptor, observation)
    }

    /// Create a new identity, failing if the name is already taken.
    pub fn create_identity(
        &mut self,
        name: &str,
        descriptor: Descriptor,
        observation: Observation,
    ) -> Result<&Identity, StoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::EmptyName);
        }
        if self.index.contains_key(name) {
            return Err(StoreError::DuplicateName(name.to_string()));
        }
        self.create(name, descriptor, observation)
    }

    fn create(
        &mut self,
        name: &str,
        descriptor: Descriptor,
        observation: Observation,
    ) -> Result<&Identity, StoreError> {
        self.check_descriptor(name, &descriptor)?;
        let idx = self.insert(Identity {
            name: name.to_string(),
            descriptor,
            history: vec![observation],
        });
        tracing::info!(person = name, total = self.identities.len(), "created identity");
        Ok(&self.identities[idx])
    }

    fn check_descriptor(&self, name: &str, descriptor: &Descriptor) -> Result<(), StoreError> {
        let invalid = |source| StoreError::Descriptor {
            name: name.to_string(),
            source,
        };
        descriptor.validate().map_err(invalid)?;
        match self.dimension {
            Some(expected) if descriptor.len() != expected => {
                Err(invalid(DescriptorError::DimensionMismatch {
                    expected,
                    actual: descriptor.len(),
                }))
            }
            _ => Ok(()),
        }
    }

    fn insert(&mut self, identity: Identity) -> usize {
        debug_assert!(!identity.history.is_empty());
        let idx = self.identities.len();
        self.dimension.get_or_insert(identity.descriptor.len());
        self.index.insert(identity.name.clone(), idx);
        self.identities.push(identity);
        idx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn zeros() -> Descriptor {
        Descriptor::new(vec![0.0; 128])
    }

    fn identity(name: &str, descriptor: Descriptor) -> Identity {
        Identity {
            name: name.into(),
            descriptor,
            history: vec![Observation {
                image_ref: "img".into(),
                mood: Mood::Neutral,
                timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            }],
        }
    }

    #[test]
    fn test_upsert_creates_identity() {
        let mut store = DescriptorStore::new();
        let created = store
            .upsert_observation("Bob", Some(zeros()), "img1", Mood::Neutral)
            .unwrap();
        assert_eq!(created.history.len(), 1);
        assert_eq!(created.descriptor, zeros());
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Bob").unwrap().history[0].image_ref, "img1");
        assert_eq!(store.dimension(), Some(128));
    }

    #[test]
    fn test_upsert_appends_and_keeps_descriptor() {
        let mut store = DescriptorStore::new();
        store.upsert_observation("Bob", Some(zeros()), "img1", Mood::Happy).unwrap();

        let other = Descriptor::new(vec![1.0; 128]);
        let updated = store
            .upsert_observation("Bob", Some(other), "img2", Mood::Sad)
            .unwrap();
        assert_eq!(updated.history.len(), 2);
        assert_eq!(updated.descriptor, zeros());
        assert_eq!(updated.history[1].mood, Mood::Sad);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_upsert_existing_without_descriptor() {
        let mut store = DescriptorStore::new();
        store.upsert_observation("Bob", Some(zeros()), "img1", Mood::Happy).unwrap();
        let updated = store.upsert_observation("Bob", None, "img2", Mood::Happy).unwrap();
        assert_eq!(updated.history.len(), 2);
    }

    #[test]
    fn test_upsert_new_requires_descriptor() {
        let mut store = DescriptorStore::new();
        let err = store.upsert_observation("Bob", None, "img1", Mood::Happy).unwrap_err();
        assert_eq!(err, StoreError::MissingDescriptor("Bob".into()));
        assert!(store.is_empty());
    }

    #[test]
    fn test_upsert_rejects_blank_name() {
        let mut store = DescriptorStore::new();
        let err = store
            .upsert_observation("   ", Some(zeros()), "img1", Mood::Happy)
            .unwrap_err();
        assert_eq!(err, StoreError::EmptyName);
    }

    #[test]
    fn test_upsert_trims_name() {
        let mut store = DescriptorStore::new();
        store.upsert_observation(" Bob ", Some(zeros()), "img1", Mood::Happy).unwrap();
        assert!(store.contains("Bob"));
    }

    #[test]
    fn test_dimension_fixed_by_first_identity() {
        let mut store = DescriptorStore::new();
        store.upsert_observation("Alice", Some(zeros()), "a", Mood::Happy).unwrap();
        let err = store
            .upsert_observation("Bob", Some(Descriptor::new(vec![0.0; 64])), "b", Mood::Happy)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Descriptor {
                source: DescriptorError::DimensionMismatch { expected: 128, actual: 64 },
                ..
            }
        ));
        assert!(!store.contains("Bob"));
    }

    #[test]
    fn test_pinned_dimension() {
        let mut store = DescriptorStore::with_dimension(4);
        assert!(store
            .upsert_observation("Alice", Some(zeros()), "a", Mood::Happy)
            .is_err());
        assert!(store
            .upsert_observation("Alice", Some(Descriptor::new(vec![0.0; 4])), "a", Mood::Happy)
            .is_ok());
    }

    #[test]
    fn test_rejects_non_finite_descriptor() {
        let mut store = DescriptorStore::new();
        let err = store
            .upsert_observation("Bob", Some(Descriptor::new(vec![f32::INFINITY])), "a", Mood::Sad)
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::Descriptor { source: DescriptorError::NonFinite { index: 0 }, .. }
        ));
    }

    #[test]
    fn test_create_identity_compare_and_set() {
        let mut store = DescriptorStore::new();
        store
            .create_identity("Bob", zeros(), Observation::now("a", Mood::Happy))
            .unwrap();
        let err = store
            .create_identity("Bob", zeros(), Observation::now("b", Mood::Happy))
            .unwrap_err();
        assert_eq!(err, StoreError::DuplicateName("Bob".into()));
        assert_eq!(store.get("Bob").unwrap().history.len(), 1);
    }

    #[test]
    fn test_all_in_insertion_order() {
        let mut store = DescriptorStore::new();
        for name in ["Carol", "Alice", "Bob"] {
            store.upsert_observation(name, Some(zeros()), "x", Mood::Neutral).unwrap();
        }
        let names: Vec<&str> = store.all().map(|i| i.name.as_str()).collect();
        assert_eq!(names, ["Carol", "Alice", "Bob"]);
    }

    #[test]
    fn test_restore_trims_persisted_name() {
        let mut store = DescriptorStore::from_identities(vec![identity(" Bob ", zeros())]).unwrap();
        assert!(store.contains("Bob"));

        store.upsert_observation("Bob", None, "img2", Mood::Happy).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("Bob").unwrap().history.len(), 2);

        let dup = DescriptorStore::from_identities(vec![
            identity("Bob", zeros()),
            identity("Bob ", zeros()),
        ]);
        assert_eq!(dup.unwrap_err(), StoreError::DuplicateName("Bob".into()));
    }

    #[test]
    fn test_from_identities_validates() {
        let ok = DescriptorStore::from_identities(vec![
            identity("Alice", zeros()),
            identity("Bob", zeros()),
        ])
        .unwrap();
        assert_eq!(ok.len(), 2);

        let dup = DescriptorStore::from_identities(vec![
            identity("Alice", zeros()),
            identity("Alice", zeros()),
        ]);
        assert_eq!(dup.unwrap_err(), StoreError::DuplicateName("Alice".into()));

        let mut empty = identity("Alice", zeros());
        empty.history.clear();
        assert_eq!(
            DescriptorStore::from_identities(vec![empty]).unwrap_err(),
            StoreError::EmptyHistory("Alice".into())
        );

        let mixed = DescriptorStore::from_identities(vec![
            identity("Alice", zeros()),
            identity("Bob", Descriptor::new(vec![0.0; 3])),
        ]);
        assert!(matches!(mixed, Err(StoreError::Descriptor { .. })));
    }
}
