//! Capacity-bounded, score-ordered set of hypotheses.

use std::cmp::Ordering;

use crate::core::hypothesis::Hypothesis;

/// Ranking key for a score. NaN ranks below every real score.
#[inline]
fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// Compare two scores for best-first ordering.
#[inline]
pub fn descending(a: f32, b: f32) -> Ordering {
    rank_key(b).total_cmp(&rank_key(a))
}

/// A beam of at most `capacity` hypotheses, best first.
///
/// Ties keep insertion order, so the first-seen hypothesis wins and
/// results are identical across runs.
#[derive(Debug, Clone)]
pub struct Beam<S> {
    capacity: usize,
    hypotheses: Vec<Hypothesis<S>>,
}

impl<S> Beam<S> {
    /// Create an empty beam.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            hypotheses: Vec::with_capacity(capacity),
        }
    }

    /// Build a beam from unordered candidates, keeping the best `capacity`.
    pub fn from_candidates(capacity: usize, candidates: Vec<Hypothesis<S>>) -> Self {
        let mut beam = Self {
            capacity,
            hypotheses: candidates,
        };
        beam.prune();
        beam
    }

    /// Add a hypothesis without pruning.
    pub fn push(&mut self, hypothesis: Hypothesis<S>) {
        self.hypotheses.push(hypothesis);
    }

    /// Restore the ordering and capacity invariants.
    pub fn prune(&mut self) {
        // `sort_by` is stable: equal scores keep insertion order.
        self.hypotheses
            .sort_by(|a, b| descending(a.score(), b.score()));
        self.hypotheses.truncate(self.capacity);
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }

    /// Highest-ranked hypothesis.
    pub fn best(&self) -> Option<&Hypothesis<S>> {
        self.hypotheses.first()
    }

    /// Hypotheses in rank order.
    pub fn as_slice(&self) -> &[Hypothesis<S>] {
        &self.hypotheses
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Hypothesis<S>> {
        self.hypotheses.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Hypothesis<S>> {
        self.hypotheses.iter_mut()
    }

    /// Consume the beam, yielding hypotheses best first.
    pub fn into_vec(self) -> Vec<Hypothesis<S>> {
        self.hypotheses
    }
}
