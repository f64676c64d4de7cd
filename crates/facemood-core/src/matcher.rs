//! Identity resolution: map a probe descriptor onto a stored identity.

use crate::store::DescriptorStore;
use crate::types::{Descriptor, DescriptorError, Identity};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Euclidean distance below which two descriptors belong to the same person.
pub const DEFAULT_MATCH_THRESHOLD: f32 = 0.6;

/// A stored identity that matched a probe.
#[derive(Debug, Clone, Copy)]
pub struct Match<'a> {
    pub identity: &'a Identity,
    pub distance: f32,
}

impl<'a> Match<'a> {
    pub fn name(&self) -> &'a str {
        &self.identity.name
    }
}

/// Strategy for comparing a probe descriptor against a gallery of identities.
pub trait Matcher {
    fn compare<'a>(
        &self,
        probe: &Descriptor,
        gallery: &'a [Identity],
        threshold: f32,
    ) -> Result<Option<Match<'a>>, DescriptorError>;
}

/// Returns the first identity, in gallery order, strictly under the threshold.
///
/// When several identities qualify, an earlier one wins even if a later one
/// is closer.
pub struct FirstUnderThreshold;

impl Matcher for FirstUnderThreshold {
    fn compare<'a>(
        &self,
        probe: &Descriptor,
        gallery: &'a [Identity],
        threshold: f32,
    ) -> Result<Option<Match<'a>>, DescriptorError> {
        for identity in gallery {
            let distance = probe.distance(&identity.descriptor)?;
            if distance < threshold {
                return Ok(Some(Match { identity, distance }));
            }
        }
        Ok(None)
    }
}

/// Returns the closest identity, provided it is strictly under the threshold.
pub struct NearestNeighbor;

impl Matcher for NearestNeighbor {
    fn compare<'a>(
        &self,
        probe: &Descriptor,
        gallery: &'a [Identity],
        threshold: f32,
    ) -> Result<Option<Match<'a>>, DescriptorError> {
        let mut best: Option<Match<'a>> = None;

        for identity in gallery {
            let distance = probe.distance(&identity.descriptor)?;
            if best.map_or(true, |b| distance < b.distance) {
                best = Some(Match { identity, distance });
            }
        }

        Ok(best.filter(|b| b.distance < threshold))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStrategy {
    /// Linear scan, first hit under the threshold.
    #[default]
    First,
    /// Global minimum distance under the threshold. Changes outcomes when
    /// several enrolled people are close to the probe.
    Nearest,
}

impl fmt::Display for MatchStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MatchStrategy::First => f.write_str("first"),
            MatchStrategy::Nearest => f.write_str("nearest"),
        }
    }
}

impl FromStr for MatchStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "first" => Ok(MatchStrategy::First),
            "nearest" => Ok(MatchStrategy::Nearest),
            other => Err(format!("unknown match strategy: {other} (expected first|nearest)")),
        }
    }
}

/// Resolves probe descriptors against a [`DescriptorStore`].
#[derive(Debug, Clone, Copy)]
pub struct IdentityResolver {
    pub threshold: f32,
    pub strategy: MatchStrategy,
}

impl Default for IdentityResolver {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_MATCH_THRESHOLD,
            strategy: MatchStrategy::First,
        }
    }
}

impl IdentityResolver {
    pub fn new(threshold: f32, strategy: MatchStrategy) -> Self {
        Self { threshold, strategy }
    }

    /// Find the matching identity along with its distance.
    pub fn find<'s>(
        &self,
        candidate: &Descriptor,
        store: &'s DescriptorStore,
    ) -> Result<Option<Match<'s>>, DescriptorError> {
        // A pinned dimension applies even before anyone is enrolled.
        if let Some(expected) = store.dimension() {
            if candidate.len() != expected {
                return Err(DescriptorError::DimensionMismatch {
                    expected,
                    actual: candidate.len(),
                });
            }
        }

        let gallery = store.identities();
        let found = match self.strategy {
            MatchStrategy::First => FirstUnderThreshold.compare(candidate, gallery, self.threshold),
            MatchStrategy::Nearest => NearestNeighbor.compare(candidate, gallery, self.threshold),
        }?;

        match &found {
            Some(m) => tracing::debug!(
                person = m.name(),
                distance = m.distance,
                strategy = %self.strategy,
                "descriptor matched"
            ),
            None => tracing::debug!(
                gallery = gallery.len(),
                threshold = self.threshold,
                "no identity under threshold"
            ),
        }

        Ok(found)
    }

    /// Name of the matching identity, or `None` for an unknown face.
    pub fn resolve<'s>(
        &self,
        candidate: &Descriptor,
        store: &'s DescriptorStore,
    ) -> Result<Option<&'s str>, DescriptorError> {
        Ok(self.find(candidate, store)?.map(|m| m.name()))
    }
}

/// Resolve with the default threshold and first-under-threshold scan.
pub fn resolve<'s>(
    candidate: &Descriptor,
    store: &'s DescriptorStore,
) -> Result<Option<&'s str>, DescriptorError> {
    IdentityResolver::default().resolve(candidate, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Mood;

    fn filled(value: f32) -> Descriptor {
        Descriptor::new(vec![value; 128])
    }

    fn with_first(value: f32) -> Descriptor {
        let mut values = vec![0.0; 128];
        values[0] = value;
        Descriptor::new(values)
    }

    fn store_with(entries: &[(&str, Descriptor)]) -> DescriptorStore {
        let mut store = DescriptorStore::new();
        for (name, descriptor) in entries {
            store
                .upsert_observation(name, Some(descriptor.clone()), "img", Mood::Neutral)
                .unwrap();
        }
        store
    }

    #[test]
    fn test_resolve_close_descriptor() {
        let store = store_with(&[("Alice", filled(0.0))]);
        assert_eq!(resolve(&with_first(0.01), &store).unwrap(), Some("Alice"));
    }

    #[test]
    fn test_resolve_far_descriptor() {
        let store = store_with(&[("Alice", filled(0.0))]);
        assert_eq!(resolve(&filled(5.0), &store).unwrap(), None);
    }

    #[test]
    fn test_resolve_empty_store() {
        let store = DescriptorStore::new();
        assert_eq!(resolve(&filled(0.3), &store).unwrap(), None);
    }

    #[test]
    fn test_threshold_boundary() {
        let store = store_with(&[("Alice", filled(0.0))]);
        assert_eq!(resolve(&with_first(0.61), &store).unwrap(), None);
        assert_eq!(resolve(&with_first(0.59), &store).unwrap(), Some("Alice"));
    }

    #[test]
    fn test_first_under_threshold_not_nearest() {
        // Both qualify; Bob is closer but Alice was enrolled first.
        let store = store_with(&[("Alice", with_first(0.5)), ("Bob", with_first(0.1))]);
        let probe = with_first(0.0);

        assert_eq!(resolve(&probe, &store).unwrap(), Some("Alice"));

        let nearest = IdentityResolver::new(DEFAULT_MATCH_THRESHOLD, MatchStrategy::Nearest);
        assert_eq!(nearest.resolve(&probe, &store).unwrap(), Some("Bob"));
    }

    #[test]
    fn test_first_skips_identities_over_threshold() {
        let store = store_with(&[("Alice", with_first(3.0)), ("Bob", with_first(0.2))]);
        let found = IdentityResolver::default()
            .find(&with_first(0.0), &store)
            .unwrap()
            .unwrap();
        assert_eq!(found.name(), "Bob");
        assert!((found.distance - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_nearest_respects_threshold() {
        let store = store_with(&[("Alice", with_first(2.0))]);
        let nearest = IdentityResolver::new(DEFAULT_MATCH_THRESHOLD, MatchStrategy::Nearest);
        assert_eq!(nearest.resolve(&with_first(0.0), &store).unwrap(), None);
    }

    #[test]
    fn test_custom_threshold() {
        let store = store_with(&[("Alice", with_first(0.0))]);
        let strict = IdentityResolver::new(0.1, MatchStrategy::First);
        assert_eq!(strict.resolve(&with_first(0.3), &store).unwrap(), None);
    }

    #[test]
    fn test_resolve_dimension_mismatch() {
        let store = store_with(&[("Alice", filled(0.0))]);
        let err = resolve(&Descriptor::new(vec![0.0; 64]), &store).unwrap_err();
        assert_eq!(err, DescriptorError::DimensionMismatch { expected: 128, actual: 64 });
    }

    #[test]
    fn test_pinned_dimension_checked_on_empty_store() {
        let store = DescriptorStore::with_dimension(128);
        let err = resolve(&Descriptor::new(vec![0.0; 512]), &store).unwrap_err();
        assert_eq!(err, DescriptorError::DimensionMismatch { expected: 128, actual: 512 });
        assert_eq!(resolve(&filled(0.0), &store).unwrap(), None);
    }

    #[test]
    fn test_strategy_parse() {
        assert_eq!("First".parse::<MatchStrategy>().unwrap(), MatchStrategy::First);
        assert_eq!("nearest".parse::<MatchStrategy>().unwrap(), MatchStrategy::Nearest);
        assert!("closest".parse::<MatchStrategy>().is_err());
    }
}
