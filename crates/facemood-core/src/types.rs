use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Descriptor length produced by the face recognition network.
pub const DEFAULT_DESCRIPTOR_DIM: usize = 128;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum DescriptorError {
    #[error("descriptor dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("descriptor is empty")]
    Empty,
    #[error("descriptor value at index {index} is not finite")]
    NonFinite { index: usize },
}

/// Face descriptor vector (typically 128-dimensional).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Descriptor {
    pub values: Vec<f32>,
}

impl Descriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Reject descriptors that cannot take part in a distance comparison.
    pub fn validate(&self) -> Result<(), DescriptorError> {
        if self.values.is_empty() {
            return Err(DescriptorError::Empty);
        }
        match self.values.iter().position(|v| !v.is_finite()) {
            Some(index) => Err(DescriptorError::NonFinite { index }),
            None => Ok(()),
        }
    }

    /// Euclidean distance to a stored descriptor.
    ///
    /// Fails instead of truncating when the lengths differ: zipping two
    /// vectors of different size silently yields a meaningless distance.
    pub fn distance(&self, stored: &Descriptor) -> Result<f32, DescriptorError> {
        if self.len() != stored.len() {
            return Err(DescriptorError::DimensionMismatch {
                expected: stored.len(),
                actual: self.len(),
            });
        }

        Ok(self
            .values
            .iter()
            .zip(stored.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt())
    }
}

impl From<Vec<f32>> for Descriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown mood label: {0}")]
pub struct UnknownMood(pub String);

/// Facial expression labels reported by the expression classifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Neutral,
    Happy,
    Sad,
    Angry,
    Fearful,
    Disgusted,
    Surprised,
}

impl Mood {
    pub const ALL: [Mood; 7] = [
        Mood::Neutral,
        Mood::Happy,
        Mood::Sad,
        Mood::Angry,
        Mood::Fearful,
        Mood::Disgusted,
        Mood::Surprised,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Mood::Neutral => "neutral",
            Mood::Happy => "happy",
            Mood::Sad => "sad",
            Mood::Angry => "angry",
            Mood::Fearful => "fearful",
            Mood::Disgusted => "disgusted",
            Mood::Surprised => "surprised",
        }
    }

    /// Display color used for this mood in summary charts.
    pub fn color(&self) -> &'static str {
        match self {
            Mood::Neutral => "#90EE90",
            Mood::Happy => "#FFD700",
            Mood::Sad => "#6495ED",
            Mood::Angry => "#FF6347",
            Mood::Fearful => "#DDA0DD",
            Mood::Disgusted => "#A0522D",
            Mood::Surprised => "#FFA500",
        }
    }
}

impl fmt::Display for Mood {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

impl FromStr for Mood {
    type Err = UnknownMood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let label = s.trim().to_ascii_lowercase();
        Mood::ALL
            .into_iter()
            .find(|m| m.as_str() == label)
            .ok_or_else(|| UnknownMood(s.to_string()))
    }
}

/// One recorded sighting of a person.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Image URL, path, or `data:` URL. Opaque to the store.
    pub image_ref: String,
    pub mood: Mood,
    pub timestamp: DateTime<Utc>,
}

impl Observation {
    pub fn now(image_ref: impl Into<String>, mood: Mood) -> Self {
        Self {
            image_ref: image_ref.into(),
            mood,
            timestamp: Utc::now(),
        }
    }
}

/// A named person with one canonical descriptor and their observation history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub descriptor: Descriptor,
    pub history: Vec<Observation>,
}

impl Identity {
    pub fn last_seen(&self) -> Option<DateTime<Utc>> {
        self.history.last().map(|o| o.timestamp)
    }
}

/// A single face found by the external inference step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub descriptor: Descriptor,
    /// Per-mood probability from the expression classifier.
    #[serde(default)]
    pub expressions: BTreeMap<Mood, f32>,
}

impl Detection {
    /// Highest-scoring expression. On equal scores the later label wins.
    /// Non-finite scores are ignored.
    pub fn dominant_mood(&self) -> Option<Mood> {
        self.expressions
            .iter()
            .filter(|(_, score)| score.is_finite())
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(mood, _)| *mood)
    }
}
