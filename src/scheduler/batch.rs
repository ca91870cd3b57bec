//! Batch containers and per-element dispatch.
//!
//! Inputs arrive as flat row-major arrays. They are shape-checked when a
//! batch is built, before any job starts, then fanned out one job per
//! element:
//!
//! ```text
//!   ScoringBatch [B, T]          SearchBatch [B, T, K]
//!        │                             │
//!        ▼  one job per row            ▼  one job per row
//!   score_sequence()              BeamSearch::search()
//!        │                             │
//!        ▼                             ▼
//!   BatchScores [B, T + 1]        SearchOutput (B results)
//! ```

use serde::Serialize;
use tracing::debug;

use super::pool::Executor;
use crate::config::{PoolConfig, SearchConfig};
use crate::core::vocab::TokenId;
use crate::engine::beam_search::{BeamSearch, SearchInput, SearchResult};
use crate::engine::scorer::{NEUTRAL_SCORE, score_sequence};
use crate::error::{Error, Result};
use crate::lm::LanguageModel;

/// Count the valid (non-zero) mask entries of each row.
pub fn lengths_from_masks(masks: &[u8], batch_size: usize, seq_len: usize) -> Result<Vec<usize>> {
    if masks.len() != batch_size * seq_len {
        return Err(Error::shape("masks", (batch_size, seq_len), masks.len()));
    }
    if seq_len == 0 {
        return Ok(vec![0; batch_size]);
    }
    Ok(masks
        .chunks(seq_len)
        .map(|row| row.iter().filter(|&&m| m != 0).count())
        .collect())
}

fn check_lengths(lengths: &[usize], seq_len: usize) -> Result<()> {
    match lengths.iter().position(|&len| len > seq_len) {
        Some(index) => Err(Error::InvalidLength {
            index,
            length: lengths[index],
            max: seq_len,
        }),
        None => Ok(()),
    }
}

// ========== Scoring ==========

/// Complete target sequences, `[batch, seq_len]`, with their valid lengths.
#[derive(Debug, Clone)]
pub struct ScoringBatch<'a> {
    targets: &'a [TokenId],
    lengths: Vec<usize>,
    seq_len: usize,
}

impl<'a> ScoringBatch<'a> {
    /// Build a batch from explicit lengths; `lengths.len()` is the batch size.
    pub fn new(targets: &'a [TokenId], lengths: Vec<usize>, seq_len: usize) -> Result<Self> {
        let batch_size = lengths.len();
        if targets.len() != batch_size * seq_len {
            return Err(Error::shape("targets", (batch_size, seq_len), targets.len()));
        }
        check_lengths(&lengths, seq_len)?;
        Ok(Self {
            targets,
            lengths,
            seq_len,
        })
    }

    /// Build a batch whose lengths are the number of set mask entries per row.
    pub fn from_masks(
        targets: &'a [TokenId],
        masks: &[u8],
        batch_size: usize,
        seq_len: usize,
    ) -> Result<Self> {
        let lengths = lengths_from_masks(masks, batch_size, seq_len)?;
        Self::new(targets, lengths, seq_len)
    }

    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Valid tokens of element `index`.
    pub fn tokens(&self, index: usize) -> &'a [TokenId] {
        let start = index * self.seq_len;
        &self.targets[start..start + self.lengths[index]]
    }
}

/// Per-position LM scores, `[batch, seq_len + 1]` row-major.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchScores {
    scores: Vec<f32>,
    width: usize,
}

impl BatchScores {
    /// Scores of element `index`.
    pub fn row(&self, index: usize) -> &[f32] {
        &self.scores[index * self.width..(index + 1) * self.width]
    }

    /// Row length (`seq_len + 1`).
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn batch_size(&self) -> usize {
        self.scores.len() / self.width
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.scores
    }

    pub fn into_vec(self) -> Vec<f32> {
        self.scores
    }
}

/// Score every element of `batch` in parallel.
pub fn score_batch<L: LanguageModel>(
    lm: &L,
    batch: &ScoringBatch<'_>,
    pool: &PoolConfig,
) -> Result<BatchScores> {
    let width = batch.seq_len() + 1;
    let mut scores = vec![NEUTRAL_SCORE; batch.batch_size() * width];
    let executor = Executor::for_batch(pool, batch.batch_size())?;

    debug!(
        batch_size = batch.batch_size(),
        seq_len = batch.seq_len(),
        workers = executor.workers(),
        "scoring batch"
    );

    executor.fill(&mut scores, width, |index, row| {
        score_sequence(lm, batch.tokens(index), row)
    })?;

    Ok(BatchScores { scores, width })
}

// ========== Search ==========

/// Shortlisted candidates for a batch, `[batch, seq_len, width]`.
#[derive(Debug, Clone)]
pub struct SearchBatch<'a> {
    probs: &'a [f32],
    candidates: &'a [TokenId],
    gates: &'a [f32],
    lengths: Vec<usize>,
    seq_len: usize,
    width: usize,
}

impl<'a> SearchBatch<'a> {
    /// Build a batch from explicit lengths; `lengths.len()` is the batch size.
    ///
    /// `probs` and `candidates` are `[batch, seq_len, width]`, each step's
    /// row sorted by descending probability; `gates` is `[batch, seq_len]`.
    pub fn new(
        probs: &'a [f32],
        candidates: &'a [TokenId],
        gates: &'a [f32],
        lengths: Vec<usize>,
        seq_len: usize,
        width: usize,
    ) -> Result<Self> {
        let batch_size = lengths.len();
        if probs.len() != batch_size * seq_len * width {
            return Err(Error::shape("probs", (batch_size, seq_len, width), probs.len()));
        }
        if candidates.len() != probs.len() {
            return Err(Error::shape("candidates", (batch_size, seq_len, width), candidates.len()));
        }
        if gates.len() != batch_size * seq_len {
            return Err(Error::shape("gates", (batch_size, seq_len), gates.len()));
        }
        check_lengths(&lengths, seq_len)?;
        if width == 0 && lengths.iter().any(|&len| len > 0) {
            return Err(Error::shape("candidates", "at least one candidate per step", 0));
        }
        Ok(Self {
            probs,
            candidates,
            gates,
            lengths,
            seq_len,
            width,
        })
    }

    /// Build a batch whose lengths are the number of set mask entries per row.
    pub fn from_masks(
        probs: &'a [f32],
        candidates: &'a [TokenId],
        gates: &'a [f32],
        masks: &[u8],
        batch_size: usize,
        seq_len: usize,
        width: usize,
    ) -> Result<Self> {
        let lengths = lengths_from_masks(masks, batch_size, seq_len)?;
        Self::new(probs, candidates, gates, lengths, seq_len, width)
    }

    pub fn batch_size(&self) -> usize {
        self.lengths.len()
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Candidates per step.
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn lengths(&self) -> &[usize] {
        &self.lengths
    }

    /// Search input of element `index`.
    pub fn input(&self, index: usize) -> Result<SearchInput<'a>> {
        let step_span = self.seq_len * self.width;
        let start = index * step_span;
        let gate_start = index * self.seq_len;
        SearchInput::new(
            &self.candidates[start..start + step_span],
            &self.probs[start..start + step_span],
            &self.gates[gate_start..gate_start + self.seq_len],
            self.width,
            self.lengths[index],
        )
        .map_err(|err| match err {
            Error::InvalidLength { length, max, .. } => Error::InvalidLength { index, length, max },
            other => other,
        })
    }
}

/// Search results of a batch, in batch order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutput {
    results: Vec<SearchResult>,
    seq_len: usize,
}

impl SearchOutput {
    pub fn results(&self) -> &[SearchResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<SearchResult> {
        self.results
    }

    pub fn batch_size(&self) -> usize {
        self.results.len()
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Best score of each element.
    pub fn best_scores(&self) -> Vec<f32> {
        self.results.iter().map(|r| r.best().score).collect()
    }

    /// Best sequences, `[batch, seq_len]` row-major, padded with `pad_id`.
    pub fn padded_tokens(&self, pad_id: TokenId) -> Vec<TokenId> {
        let mut tokens = vec![pad_id; self.results.len() * self.seq_len];
        for (row, result) in tokens.chunks_mut(self.seq_len.max(1)).zip(&self.results) {
            let best = &result.best().tokens;
            row[..best.len()].copy_from_slice(best);
        }
        tokens
    }
}

/// Run one beam search per element of `batch` in parallel.
pub fn search_batch<L: LanguageModel>(
    lm: &L,
    config: &SearchConfig,
    batch: &SearchBatch<'_>,
    pool: &PoolConfig,
) -> Result<SearchOutput> {
    config.validate()?;
    let executor = Executor::for_batch(pool, batch.batch_size())?;

    debug!(
        batch_size = batch.batch_size(),
        seq_len = batch.seq_len(),
        beam_size = config.beam_size,
        short_list = config.short_list.min(batch.width()),
        fusion = config.fusion.as_str(),
        workers = executor.workers(),
        "searching batch"
    );

    let search = BeamSearch::new(lm, config);
    let results = executor.map(batch.batch_size(), |index| {
        let input = batch.input(index)?;
        Ok(search.search(&input))
    })?;

    Ok(SearchOutput {
        results,
        seq_len: batch.seq_len(),
    })
}
