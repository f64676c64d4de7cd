//! Mood frequency over an observation history.

use crate::types::{Mood, Observation};
use serde::Serialize;
use std::collections::BTreeMap;

/// Count how often each mood appears in `history`.
pub fn tally(history: &[Observation]) -> BTreeMap<Mood, usize> {
    let mut counts = BTreeMap::new();
    for observation in history {
        *counts.entry(observation.mood).or_insert(0) += 1;
    }
    counts
}

/// Most frequent mood. Ties go to the mood seen most recently.
pub fn dominant(history: &[Observation]) -> Option<Mood> {
    let counts = tally(history);
    let best = counts.values().copied().max()?;
    history
        .iter()
        .rev()
        .map(|o| o.mood)
        .find(|m| counts.get(m) == Some(&best))
}

/// One slice of a mood distribution chart.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MoodSlice {
    pub mood: Mood,
    pub count: usize,
    /// Fraction of the history, in `0.0..=1.0`.
    pub share: f32,
    pub color: &'static str,
}

pub fn chart_slices(history: &[Observation]) -> Vec<MoodSlice> {
    let total = history.len();
    tally(history)
        .into_iter()
        .map(|(mood, count)| MoodSlice {
            mood,
            count,
            share: count as f32 / total as f32,
            color: mood.color(),
        })
        .collect()
}
