//! Language-model scoring.
//!
//! The search engine only sees the [`LanguageModel`] capability: an initial
//! context state and a pure `score(state, token)` transition. Any n-gram,
//! neural or table-driven model can sit behind it.
//!
//! - [`arpa::ArpaModel`]: back-off n-gram model loaded from an ARPA file
//! - [`adapter::NgramScorer`]: binds a [`Vocabulary`] to an `ArpaModel`
//!
//! [`Vocabulary`]: crate::core::vocab::Vocabulary

pub mod adapter;
pub mod arpa;

use crate::core::vocab::TokenId;

pub use adapter::NgramScorer;
pub use arpa::{ArpaModel, NgramState, WordIndex};

/// Incremental token scorer.
///
/// Implementations must be pure functions of `(state, token)` so one model
/// can be shared by every worker without locking.
pub trait LanguageModel: Send + Sync {
    /// Context state carried by each hypothesis.
    type State: Clone + Send + Sync + std::fmt::Debug;

    /// State at the start of a sequence.
    fn initial_state(&self) -> Self::State;

    /// Natural-log probability of `token` after `state`, and the next state.
    ///
    /// Unknown tokens are scored with the model's fallback; this never fails.
    fn score(&self, state: &Self::State, token: TokenId) -> (f32, Self::State);

    /// Token id that terminates a sequence.
    fn end_of_sequence(&self) -> TokenId;

    /// Log-probability of ending the sequence after `state`.
    fn score_end(&self, state: &Self::State) -> f32 {
        self.score(state, self.end_of_sequence()).0
    }
}

impl<L: LanguageModel + ?Sized> LanguageModel for &L {
    type State = L::State;

    fn initial_state(&self) -> Self::State {
        (**self).initial_state()
    }

    fn score(&self, state: &Self::State, token: TokenId) -> (f32, Self::State) {
        (**self).score(state, token)
    }

    fn end_of_sequence(&self) -> TokenId {
        (**self).end_of_sequence()
    }
}

impl<L: LanguageModel + ?Sized> LanguageModel for std::sync::Arc<L> {
    type State = L::State;

    fn initial_state(&self) -> Self::State {
        (**self).initial_state()
    }

    fn score(&self, state: &Self::State, token: TokenId) -> (f32, Self::State) {
        (**self).score(state, token)
    }

    fn end_of_sequence(&self) -> TokenId {
        (**self).end_of_sequence()
    }
}
