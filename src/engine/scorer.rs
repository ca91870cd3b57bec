//! Per-position language-model scores of complete sequences.
//!
//! For a sequence of `length` tokens the output row holds:
//!
//! ```text
//! [ s(t0 | <s>), s(t1 | .. t0), ..., s(t{n-1} | ..), s(</s> | ..), 0, 0, ... ]
//!   \_______________ length entries _______________/  trailing     neutral
//! ```

use crate::core::vocab::TokenId;
use crate::error::{Error, Result};
use crate::lm::LanguageModel;

/// Value written to positions past the end-of-sequence slot.
pub const NEUTRAL_SCORE: f32 = 0.0;

/// Score `tokens` into `out`, which must hold at least `tokens.len() + 1` slots.
pub fn score_sequence<L: LanguageModel>(lm: &L, tokens: &[TokenId], out: &mut [f32]) -> Result<()> {
    let length = tokens.len();
    if out.len() <= length {
        return Err(Error::shape("scores", format!(">= {}", length + 1), out.len()));
    }

    let mut state = lm.initial_state();
    for (slot, &token) in out.iter_mut().zip(tokens) {
        let (log_prob, next) = lm.score(&state, token);
        *slot = log_prob;
        state = next;
    }
    out[length] = lm.score_end(&state);
    out[length + 1..].fill(NEUTRAL_SCORE);
    Ok(())
}

/// Total log-probability of `tokens` followed by end-of-sequence.
pub fn sentence_log_prob<L: LanguageModel>(lm: &L, tokens: &[TokenId]) -> f32 {
    let mut state = lm.initial_state();
    let mut total = 0.0;
    for &token in tokens {
        let (log_prob, next) = lm.score(&state, token);
        total += log_prob;
        state = next;
    }
    total + lm.score_end(&state)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Scores token `t` as `-(t as f32)`, end-of-sequence as -0.5.
    struct IdLm;

    impl LanguageModel for IdLm {
        type State = usize;

        fn initial_state(&self) -> usize {
            0
        }

        fn score(&self, state: &usize, token: TokenId) -> (f32, usize) {
            let score = if token == 1 { -0.5 } else { -(token as f32) };
            (score, state + 1)
        }

        fn end_of_sequence(&self) -> TokenId {
            1
        }
    }

    #[test]
    fn test_layout() {
        let mut out = [9.0f32; 6];
        score_sequence(&IdLm, &[2, 3, 4], &mut out).unwrap();
        assert_eq!(out, [-2.0, -3.0, -4.0, -0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_empty_sequence() {
        let mut out = [9.0f32; 3];
        score_sequence(&IdLm, &[], &mut out).unwrap();
        assert_eq!(out, [-0.5, 0.0, 0.0]);
    }

    #[test]
    fn test_row_too_short() {
        let mut out = [0.0f32; 2];
        assert!(score_sequence(&IdLm, &[2, 3], &mut out).is_err());
    }

    #[test]
    fn test_sentence_total() {
        assert_eq!(sentence_log_prob(&IdLm, &[2, 3]), -5.5);
    }
}
