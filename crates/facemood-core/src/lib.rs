//! facemood-core — Face identity resolution and mood history.
//!
//! Keeps one canonical descriptor per named person, matches new descriptors
//! against them by Euclidean distance, and tallies the moods recorded in
//! each person's history. Face detection itself is external.

pub mod matcher;
pub mod observe;
pub mod store;
pub mod tally;
pub mod types;

pub use matcher::{
    resolve, FirstUnderThreshold, IdentityResolver, Match, MatchStrategy, Matcher,
    NearestNeighbor, DEFAULT_MATCH_THRESHOLD,
};
pub use observe::{
    observe, AnalyzerError, FaceAnalyzer, NamePrompt, ObserveError, Outcome, Sighting,
};
pub use store::{DescriptorStore, StoreError};
pub use tally::{chart_slices, tally, MoodSlice};
pub use types::{
    Descriptor, DescriptorError, Detection, Identity, Mood, Observation, UnknownMood,
    DEFAULT_DESCRIPTOR_DIM,
};
