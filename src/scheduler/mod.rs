//! Batch scheduling.
//!
//! This module handles:
//! - Shape validation of flat batch inputs
//! - Fan-out of one scoring or search job per batch element
//! - The worker pool the jobs run on

pub mod batch;
pub mod pool;

pub use batch::{
    BatchScores, ScoringBatch, SearchBatch, SearchOutput, lengths_from_masks, score_batch,
    search_batch,
};
pub use pool::{Executor, WorkerPool};
