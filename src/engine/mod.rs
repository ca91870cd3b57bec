//! Decoding engine.
//!
//! - [`beam_search`]: LM-guided beam search for one batch element
//! - [`scorer`]: per-position LM scores of a complete sequence
//! - [`fusion`]: neural/LM score combination policies

pub mod beam_search;
pub mod fusion;
pub mod scorer;

pub use beam_search::{BeamSearch, ScoredSequence, SearchInput, SearchResult};
pub use fusion::Fusion;
pub use scorer::{NEUTRAL_SCORE, score_sequence, sentence_log_prob};
