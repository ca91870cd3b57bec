//! LM-guided beam search over neural shortlists.
//!
//! One search runs per batch element:
//!
//! ```text
//! beam = { root }
//! for t in 0..length:
//!     for hyp in beam, for (token, p) in shortlist[t]:
//!         (lm, state') = LM.score(hyp.state, token)
//!         child = hyp.score + fuse(ln p, lm, gate[t])
//!     beam = best beam_size children          (stable: first seen wins ties)
//! if score_end_of_sequence:
//!     hyp.score += LM.score(hyp.state, </s>); re-rank
//! result = beam, best first
//! ```

use serde::Serialize;
use tracing::trace;

use super::fusion::log_sum_exp;
use crate::config::SearchConfig;
use crate::core::beam::{Beam, descending};
use crate::core::hypothesis::{Hypothesis, HypothesisArena};
use crate::core::vocab::TokenId;
use crate::error::{Error, Result};
use crate::lm::LanguageModel;

/// Shortlisted candidates of one batch element.
///
/// `candidates` and `probs` are `[steps, width]` row-major, each row sorted
/// by descending probability; `gates` is `[steps]`.
#[derive(Debug, Clone, Copy)]
pub struct SearchInput<'a> {
    candidates: &'a [TokenId],
    probs: &'a [f32],
    gates: &'a [f32],
    width: usize,
    length: usize,
}

impl<'a> SearchInput<'a> {
    /// Wrap one element's rows, searching its first `length` steps.
    pub fn new(
        candidates: &'a [TokenId],
        probs: &'a [f32],
        gates: &'a [f32],
        width: usize,
        length: usize,
    ) -> Result<Self> {
        let steps = gates.len();
        if candidates.len() != steps * width {
            return Err(Error::shape("candidates", (steps, width), candidates.len()));
        }
        if probs.len() != candidates.len() {
            return Err(Error::shape("probs", candidates.len(), probs.len()));
        }
        if length > steps {
            return Err(Error::InvalidLength {
                index: 0,
                length,
                max: steps,
            });
        }
        if length > 0 && width == 0 {
            return Err(Error::shape("candidates", "at least one candidate per step", 0));
        }
        Ok(Self {
            candidates,
            probs,
            gates,
            width,
            length,
        })
    }

    /// Number of valid steps.
    pub fn length(&self) -> usize {
        self.length
    }

    /// Candidates available per step.
    pub fn width(&self) -> usize {
        self.width
    }

    fn step(&self, t: usize, width: usize) -> (&'a [TokenId], &'a [f32], f32) {
        let start = t * self.width;
        (
            &self.candidates[start..start + width],
            &self.probs[start..start + width],
            self.gates[t],
        )
    }
}

/// A finished token sequence and its combined score.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoredSequence {
    pub tokens: Vec<TokenId>,
    pub score: f32,
}

/// Final beam of one search, best first.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    hypotheses: Vec<ScoredSequence>,
}

impl SearchResult {
    /// Result of a zero-length search: the empty sequence with score 0.
    pub fn empty() -> Self {
        Self {
            hypotheses: vec![ScoredSequence {
                tokens: Vec::new(),
                score: 0.0,
            }],
        }
    }

    /// Highest-scoring sequence.
    pub fn best(&self) -> &ScoredSequence {
        &self.hypotheses[0]
    }

    /// All surviving sequences, best first.
    pub fn hypotheses(&self) -> &[ScoredSequence] {
        &self.hypotheses
    }

    pub fn len(&self) -> usize {
        self.hypotheses.len()
    }

    /// Always false: a result holds at least one sequence.
    pub fn is_empty(&self) -> bool {
        self.hypotheses.is_empty()
    }
}

/// One scored expansion waiting for beam selection.
#[derive(Debug)]
struct Expansion<S> {
    parent: usize,
    token: TokenId,
    score: f32,
    state: S,
}

/// Beam search driven by a language model.
pub struct BeamSearch<'a, L: LanguageModel> {
    lm: &'a L,
    config: &'a SearchConfig,
}

impl<'a, L: LanguageModel> BeamSearch<'a, L> {
    pub fn new(lm: &'a L, config: &'a SearchConfig) -> Self {
        Self { lm, config }
    }

    /// Search one element and return its final beam.
    pub fn search(&self, input: &SearchInput<'_>) -> SearchResult {
        if input.length() == 0 {
            return SearchResult::empty();
        }

        let beam_size = self.config.beam_size.max(1);
        let width = self.config.short_list.max(1).min(input.width());
        let fusion = self.config.fusion;

        let mut arena = HypothesisArena::with_capacity(input.length() * beam_size);
        let mut beam = Beam::new(beam_size);
        beam.push(Hypothesis::root(self.lm.initial_state()));

        let mut expansions: Vec<Expansion<L::State>> = Vec::with_capacity(beam_size * width);
        let mut group_scores: Vec<f32> = Vec::with_capacity(width);

        for t in 0..input.length() {
            let (tokens, probs, gate) = input.step(t, width);
            expansions.clear();

            for (parent, hyp) in beam.iter().enumerate() {
                let first = expansions.len();
                for (&token, &prob) in tokens.iter().zip(probs) {
                    let (lm_log_prob, state) = self.lm.score(hyp.state(), token);
                    expansions.push(Expansion {
                        parent,
                        token,
                        score: fusion.combine(prob.ln(), lm_log_prob, gate),
                        state,
                    });
                }

                let group = &mut expansions[first..];
                if fusion.is_normalized() {
                    group_scores.clear();
                    group_scores.extend(group.iter().map(|e| e.score));
                    // A parent whose children are all -inf keeps them at -inf.
                    let z = log_sum_exp(&group_scores);
                    if z > f32::NEG_INFINITY {
                        for expansion in group.iter_mut() {
                            expansion.score -= z;
                        }
                    }
                }
                for expansion in group.iter_mut() {
                    expansion.score += hyp.score();
                }
            }

            // Stable: equal scores keep (parent rank, candidate rank) order.
            expansions.sort_by(|a, b| descending(a.score, b.score));
            expansions.truncate(beam_size);

            let parents = beam.as_slice();
            let children: Vec<Hypothesis<L::State>> = expansions
                .drain(..)
                .map(|e| parents[e.parent].extend(&mut arena, e.token, e.score, e.state))
                .collect();
            beam = Beam::from_candidates(beam_size, children);
        }

        for hyp in beam.iter_mut() {
            hyp.finish();
        }
        if self.config.score_end_of_sequence {
            for hyp in beam.iter_mut() {
                let end = self.lm.score_end(hyp.state());
                hyp.add_score(end);
            }
            beam.prune();
        }

        trace!(
            steps = input.length(),
            beam = beam.len(),
            nodes = arena.len(),
            "search finished"
        );

        SearchResult {
            hypotheses: beam
                .into_vec()
                .into_iter()
                .map(|hyp| ScoredSequence {
                    tokens: hyp.tokens(&arena),
                    score: hyp.score(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::fusion::Fusion;

    /// Scores every token 0 and keeps no context.
    struct FlatLm;

    impl LanguageModel for FlatLm {
        type State = ();

        fn initial_state(&self) -> Self::State {}

        fn score(&self, _state: &(), _token: TokenId) -> (f32, ()) {
            (0.0, ())
        }

        fn end_of_sequence(&self) -> TokenId {
            1
        }
    }

    /// Penalizes repeating the previous token.
    struct NoRepeatLm;

    impl LanguageModel for NoRepeatLm {
        type State = Option<TokenId>;

        fn initial_state(&self) -> Option<TokenId> {
            None
        }

        fn score(&self, state: &Option<TokenId>, token: TokenId) -> (f32, Option<TokenId>) {
            let score = if *state == Some(token) { -10.0 } else { 0.0 };
            (score, Some(token))
        }

        fn end_of_sequence(&self) -> TokenId {
            1
        }
    }

    #[test]
    fn test_zero_length() {
        let config = SearchConfig::default();
        let input = SearchInput::new(&[2, 3], &[0.6, 0.4], &[0.5], 2, 0).unwrap();
        let result = BeamSearch::new(&FlatLm, &config).search(&input);

        assert_eq!(result.len(), 1);
        assert!(result.best().tokens.is_empty());
        assert_eq!(result.best().score, 0.0);
    }

    #[test]
    fn test_flat_lm_follows_neural_model() {
        let config = SearchConfig::default().beam_size(2).short_list(2);
        let candidates = [2, 3, 2, 3, 2, 3];
        let probs = [0.7, 0.3, 0.6, 0.4, 0.9, 0.1];
        let gates = [1.0, 1.0, 1.0];
        let input = SearchInput::new(&candidates, &probs, &gates, 2, 3).unwrap();

        let result = BeamSearch::new(&FlatLm, &config).search(&input);
        let expected = 0.7f32.ln() + 0.6f32.ln() + 0.9f32.ln();

        assert_eq!(result.best().tokens, vec![2, 2, 2]);
        assert!((result.best().score - expected).abs() < 1e-5);
        assert_eq!(result.len(), 2);
    }

    #[test]
    fn test_lm_overrides_greedy_choice() {
        let config = SearchConfig::default()
            .beam_size(2)
            .short_list(2)
            .score_end_of_sequence(false);
        // Greedy picks 2 twice and pays the repeat penalty.
        let candidates = [2, 3, 2, 3];
        let probs = [0.6, 0.4, 0.6, 0.4];
        let gates = [0.5, 0.5];
        let input = SearchInput::new(&candidates, &probs, &gates, 2, 2).unwrap();

        let result = BeamSearch::new(&NoRepeatLm, &config).search(&input);
        assert_eq!(result.best().tokens, vec![2, 3]);
    }

    #[test]
    fn test_shortlist_wider_than_candidates() {
        let config = SearchConfig::default().beam_size(4).short_list(50);
        let input = SearchInput::new(&[5, 6], &[0.5, 0.5], &[1.0], 2, 1).unwrap();
        let result = BeamSearch::new(&FlatLm, &config).search(&input);

        assert_eq!(result.len(), 2);
        assert_eq!(result.best().tokens, vec![5]);
        assert_eq!(result.hypotheses()[1].tokens, vec![6]);
    }

    #[test]
    fn test_normalized_fusion_sums_to_one_per_parent() {
        let config = SearchConfig::default()
            .beam_size(3)
            .short_list(3)
            .fusion(Fusion::Normalized)
            .score_end_of_sequence(false);
        let input = SearchInput::new(&[2, 3, 4], &[0.5, 0.3, 0.2], &[0.7], 3, 1).unwrap();
        let result = BeamSearch::new(&FlatLm, &config).search(&input);

        let total: f32 = result.hypotheses().iter().map(|h| h.score.exp()).sum();
        assert!((total - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_zero_short_list_keeps_one_candidate() {
        let config = SearchConfig::default().short_list(0);
        let input = SearchInput::new(&[2, 3], &[0.6, 0.4], &[1.0], 2, 1).unwrap();
        let result = BeamSearch::new(&FlatLm, &config).search(&input);

        assert!(!result.is_empty());
        assert_eq!(result.len(), 1);
        assert_eq!(result.best().tokens, vec![2]);
    }

    #[test]
    fn test_normalized_fusion_with_zero_probs() {
        let config = SearchConfig::default()
            .beam_size(2)
            .short_list(2)
            .fusion(Fusion::Normalized)
            .score_end_of_sequence(false);
        let input = SearchInput::new(&[2, 3], &[0.0, 0.0], &[1.0], 2, 1).unwrap();
        let result = BeamSearch::new(&FlatLm, &config).search(&input);

        assert_eq!(result.len(), 2);
        assert!(result.hypotheses().iter().all(|h| h.score == f32::NEG_INFINITY));
        assert_eq!(result.best().tokens, vec![2]);
    }

    #[test]
    fn test_input_shape_errors() {
        assert!(SearchInput::new(&[1, 2, 3], &[0.1, 0.2, 0.3], &[1.0, 1.0], 2, 2).is_err());
        assert!(SearchInput::new(&[1, 2], &[0.1], &[1.0], 2, 1).is_err());
        assert!(SearchInput::new(&[1, 2], &[0.1, 0.2], &[1.0], 2, 2).is_err());
    }
}
