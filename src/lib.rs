//! lm-decoder: n-gram language-model fusion for neural sequence decoders.
//!
//! This crate combines a neural model's per-step distributions with an
//! n-gram language model:
//! - Batched rescoring of complete target sequences
//! - LM-guided beam search over per-step neural shortlists
//! - Pluggable score fusion (shallow, mixture, normalized)
//! - One independent job per batch element on a worker pool

pub mod config;
pub mod error;

pub mod core;
pub mod decoder;
pub mod engine;
pub mod lm;
pub mod scheduler;

pub use config::{DecoderConfig, PoolConfig, ScorerConfig, SearchConfig};
pub use crate::core::{TokenId, Vocabulary};
pub use decoder::{DecodedBatch, LmDecoder};
pub use engine::{BeamSearch, Fusion, ScoredSequence, SearchInput, SearchResult};
pub use error::{Error, Result};
pub use lm::{ArpaModel, LanguageModel, NgramScorer, NgramState};
pub use scheduler::{BatchScores, ScoringBatch, SearchBatch, SearchOutput};
