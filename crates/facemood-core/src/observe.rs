//! Observation flow: inference output → identity → history entry.
//!
//! Face detection and expression classification are done by an external
//! model behind [`FaceAnalyzer`]; picking a name for an unknown face is
//! delegated to a [`NamePrompt`].

use crate::matcher::IdentityResolver;
use crate::store::{DescriptorStore, StoreError};
use crate::types::{Descriptor, DescriptorError, Detection, Mood, Observation};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AnalyzerError {
    #[error("face model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("inference failed: {0}")]
    Failed(String),
}

/// External face inference. Returns at most one detection per image.
pub trait FaceAnalyzer {
    fn analyze(&mut self, image: &str) -> Result<Option<Detection>, AnalyzerError>;
}

/// Supplies a name for a face that matched nobody. `None` aborts the observation.
pub trait NamePrompt {
    fn ask_name(&mut self, image: &str) -> Option<String>;
}

impl<F> NamePrompt for F
where
    F: FnMut(&str) -> Option<String>,
{
    fn ask_name(&mut self, image: &str) -> Option<String> {
        self(image)
    }
}

#[derive(Error, Debug)]
pub enum ObserveError {
    #[error("face model unavailable: {0}")]
    ModelUnavailable(String),
    #[error("no face detected in {0}")]
    NoFaceDetected(String),
    #[error("inference failed: {0}")]
    Inference(String),
    #[error(transparent)]
    Descriptor(#[from] DescriptorError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<AnalyzerError> for ObserveError {
    fn from(err: AnalyzerError) -> Self {
        match err {
            AnalyzerError::ModelUnavailable(msg) => ObserveError::ModelUnavailable(msg),
            AnalyzerError::Failed(msg) => ObserveError::Inference(msg),
        }
    }
}

/// Descriptor and dominant mood extracted from one image.
#[derive(Debug, Clone, PartialEq)]
pub struct Sighting {
    pub descriptor: Descriptor,
    pub mood: Mood,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum Outcome {
    /// Matched an enrolled person; observation appended.
    Recognized { name: String, mood: Mood, distance: f32 },
    /// Unknown face, named by the prompt.
    Enrolled { name: String, mood: Mood },
    /// Unknown face and no name given; nothing recorded.
    Skipped { mood: Mood },
}

impl Outcome {
    pub fn name(&self) -> Option<&str> {
        match self {
            Outcome::Recognized { name, .. } | Outcome::Enrolled { name, .. } => Some(name),
            Outcome::Skipped { .. } => None,
        }
    }
}

/// Run inference on `image` and reduce the result to a [`Sighting`].
pub fn detect(analyzer: &mut dyn FaceAnalyzer, image: &str) -> Result<Sighting, ObserveError> {
    let detection = analyzer
        .analyze(image)?
        .ok_or_else(|| ObserveError::NoFaceDetected(image.to_string()))?;
    let mood = detection
        .dominant_mood()
        .ok_or_else(|| ObserveError::Inference(format!("no expression scores for {image}")))?;
    detection.descriptor.validate()?;

    tracing::debug!(image, %mood, dim = detection.descriptor.len(), "face detected");

    Ok(Sighting {
        descriptor: detection.descriptor,
        mood,
    })
}

/// Pick the name a sighting should be recorded under.
///
/// Returns the matched name and distance, or asks `prompt` for a new one.
pub fn identify(
    store: &DescriptorStore,
    resolver: &IdentityResolver,
    sighting: &Sighting,
    prompt: &mut dyn NamePrompt,
    image: &str,
) -> Result<Option<(String, Option<f32>)>, ObserveError> {
    if let Some(found) = resolver.find(&sighting.descriptor, store)? {
        tracing::info!(person = found.name(), distance = found.distance, "recognized person");
        return Ok(Some((found.name().to_string(), Some(found.distance))));
    }

    let name = prompt
        .ask_name(image)
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty());
    Ok(name.map(|n| (n, None)))
}

/// Analyze `image`, resolve or name the face, and append the observation.
///
/// `image_ref` is what gets stored in the history (a path, URL or data URL).
pub fn observe(
    store: &mut DescriptorStore,
    resolver: &IdentityResolver,
    analyzer: &mut dyn FaceAnalyzer,
    prompt: &mut dyn NamePrompt,
    image: &str,
    image_ref: String,
) -> Result<Outcome, ObserveError> {
    let sighting = detect(analyzer, image)?;
    let mood = sighting.mood;

    let Some((name, distance)) = identify(store, resolver, &sighting, prompt, image)? else {
        tracing::info!(image, "unknown face left unnamed; observation skipped");
        return Ok(Outcome::Skipped { mood });
    };

    store.record(&name, Some(sighting.descriptor), Observation::now(image_ref, mood))?;

    Ok(match distance {
        Some(distance) => Outcome::Recognized { name, mood, distance },
        None => Outcome::Enrolled { name, mood },
    })
}
