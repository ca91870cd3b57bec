//! Tensor-facing decoder.
//!
//! [`LmDecoder`] owns a language model and a [`DecoderConfig`] and exposes
//! the two batch operations over `candle_core::Tensor` inputs:
//!
//! - [`LmDecoder::language_model_scores`]: per-position LM scores of
//!   complete target sequences, `[batch, seq_len + 1]`
//! - [`LmDecoder::beam_search_with_language_model`]: LM-guided beam search
//!   over the top `short_list` tokens of each step's distribution
//!
//! Tensors are copied to host memory once, validated, and handed to the
//! flat batch scheduler. Outputs are created on the device of the primary
//! input.

use std::path::Path;
use std::time::Instant;

use candle_core::{DType, Device, Tensor};
use tracing::{debug, info};

use crate::config::{DecoderConfig, PoolConfig, SearchConfig};
use crate::core::beam::descending;
use crate::core::vocab::{TokenId, Vocabulary};
use crate::error::{Error, Result};
use crate::lm::{LanguageModel, NgramScorer};
use crate::scheduler::{
    BatchScores, ScoringBatch, SearchBatch, SearchOutput, lengths_from_masks, score_batch,
    search_batch,
};

/// Result of a batched beam search.
#[derive(Debug, Clone)]
pub struct DecodedBatch {
    /// Best score per element, `[batch]` f32.
    pub scores: Tensor,
    /// Best sequence per element padded with the pad id, `[batch, seq_len]` u32.
    pub tokens: Tensor,
    /// Full final beams, best first.
    pub nbest: SearchOutput,
}

/// N-gram fusion decoder.
pub struct LmDecoder<L: LanguageModel = NgramScorer> {
    lm: L,
    config: DecoderConfig,
}

impl LmDecoder<NgramScorer> {
    /// Load an ARPA model from `model_path` and bind `vocab` to it.
    ///
    /// Any load or vocabulary error is fatal: no decoder is returned.
    pub fn load<S: Into<String>>(
        model_path: impl AsRef<Path>,
        vocab: impl IntoIterator<Item = S>,
        config: DecoderConfig,
    ) -> Result<Self> {
        let start = Instant::now();
        config.validate()?;
        let vocab = Vocabulary::new(vocab)?;
        let lm = NgramScorer::load(model_path, vocab, &config.scorer)?;

        info!(
            order = lm.max_order(),
            dict_size = lm.dict_size(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "decoder ready"
        );
        Self::new(lm, config)
    }

    /// Highest n-gram order of the model.
    pub fn max_order(&self) -> usize {
        self.lm.max_order()
    }

    /// Number of tokens in the vocabulary.
    pub fn dict_size(&self) -> usize {
        self.lm.dict_size()
    }
}

impl<L: LanguageModel> LmDecoder<L> {
    /// Wrap an already-built language model.
    pub fn new(lm: L, config: DecoderConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { lm, config })
    }

    pub fn language_model(&self) -> &L {
        &self.lm
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Score complete target sequences.
    ///
    /// `targets` is `[batch, seq_len]` of token ids, `masks` has the same
    /// shape; an element's length is its number of non-zero mask entries.
    /// Returns `[batch, seq_len + 1]` f32 on the device of `targets`.
    pub fn language_model_scores(
        &self,
        targets: &Tensor,
        masks: &Tensor,
        workers: usize,
    ) -> Result<Tensor> {
        let (batch_size, seq_len) = dims2("targets", targets)?;
        let lengths = mask_lengths(masks, batch_size, seq_len)?;
        let ids = token_ids(targets)?;

        let batch = ScoringBatch::new(&ids, lengths, seq_len)?;
        let scores = score_batch(&self.lm, &batch, &self.pool(workers))?;

        let width = scores.width();
        Ok(Tensor::from_vec(
            scores.into_vec(),
            (batch_size, width),
            targets.device(),
        )?)
    }

    /// Beam search over full per-step distributions.
    ///
    /// `mt_probs` is `[batch, seq_len, vocab]`; the `short_list` most
    /// probable tokens of each step are searched, ties going to the lower
    /// id. `gates` and `masks` are `[batch, seq_len]`.
    pub fn beam_search_with_language_model(
        &self,
        mt_probs: &Tensor,
        gates: &Tensor,
        masks: &Tensor,
        short_list: usize,
        beam_size: usize,
        workers: usize,
    ) -> Result<DecodedBatch> {
        let (batch_size, seq_len, vocab_size) = dims3("mt_probs", mt_probs)?;
        let search = self
            .config
            .search
            .clone()
            .short_list(short_list)
            .beam_size(beam_size);
        search.validate()?;

        let gates_flat = step_values("gates", gates, batch_size, seq_len)?;
        let lengths = mask_lengths(masks, batch_size, seq_len)?;
        let dense = host_f32(mt_probs)?;
        let width = short_list.min(vocab_size);
        let (probs, candidates) = shortlist(&dense, vocab_size, width);

        let batch = SearchBatch::new(&probs, &candidates, &gates_flat, lengths, seq_len, width)?;
        self.decode(&batch, &search, workers, mt_probs.device())
    }

    /// Beam search over caller-selected shortlists.
    ///
    /// `probs` and `ids` are `[batch, seq_len, width]`, each step sorted by
    /// descending probability.
    pub fn beam_search_shortlisted(
        &self,
        probs: &Tensor,
        ids: &Tensor,
        gates: &Tensor,
        masks: &Tensor,
        beam_size: usize,
        workers: usize,
    ) -> Result<DecodedBatch> {
        let (batch_size, seq_len, width) = dims3("probs", probs)?;
        let id_dims = dims3("ids", ids)?;
        if id_dims != (batch_size, seq_len, width) {
            return Err(Error::shape("ids", (batch_size, seq_len, width), id_dims));
        }
        let search = self.config.search.clone().beam_size(beam_size);
        search.validate()?;

        let gates_flat = step_values("gates", gates, batch_size, seq_len)?;
        let lengths = mask_lengths(masks, batch_size, seq_len)?;
        let probs_flat = host_f32(probs)?;
        let ids_flat = token_ids(ids)?;

        let batch = SearchBatch::new(&probs_flat, &ids_flat, &gates_flat, lengths, seq_len, width)?;
        self.decode(&batch, &search, workers, probs.device())
    }

    /// Score flat target sequences with the configured pool.
    pub fn score_batch(&self, batch: &ScoringBatch<'_>) -> Result<BatchScores> {
        score_batch(&self.lm, batch, &self.config.pool)
    }

    /// Search flat shortlists with the configured search and pool.
    pub fn search_batch(&self, batch: &SearchBatch<'_>) -> Result<SearchOutput> {
        search_batch(&self.lm, &self.config.search, batch, &self.config.pool)
    }

    fn decode(
        &self,
        batch: &SearchBatch<'_>,
        search: &SearchConfig,
        workers: usize,
        device: &Device,
    ) -> Result<DecodedBatch> {
        let nbest = search_batch(&self.lm, search, batch, &self.pool(workers))?;
        let batch_size = nbest.batch_size();

        let scores = Tensor::from_vec(nbest.best_scores(), batch_size, device)?;
        let tokens = Tensor::from_vec(
            nbest.padded_tokens(self.config.pad_id),
            (batch_size, nbest.seq_len()),
            device,
        )?;
        debug!(batch_size, seq_len = nbest.seq_len(), "decoded batch");

        Ok(DecodedBatch {
            scores,
            tokens,
            nbest,
        })
    }

    fn pool(&self, workers: usize) -> PoolConfig {
        PoolConfig {
            workers,
            ..self.config.pool.clone()
        }
    }
}

fn dims2(name: &'static str, tensor: &Tensor) -> Result<(usize, usize)> {
    match tensor.dims() {
        &[b, t] => Ok((b, t)),
        dims => Err(Error::shape(name, "[batch, seq_len]", dims)),
    }
}

fn dims3(name: &'static str, tensor: &Tensor) -> Result<(usize, usize, usize)> {
    match tensor.dims() {
        &[b, t, k] => Ok((b, t, k)),
        dims => Err(Error::shape(name, "[batch, seq_len, width]", dims)),
    }
}

fn host_f32(tensor: &Tensor) -> Result<Vec<f32>> {
    Ok(tensor.to_dtype(DType::F32)?.flatten_all()?.to_vec1::<f32>()?)
}

fn token_ids(tensor: &Tensor) -> Result<Vec<TokenId>> {
    Ok(tensor.to_dtype(DType::U32)?.flatten_all()?.to_vec1::<u32>()?)
}

fn step_values(
    name: &'static str,
    tensor: &Tensor,
    batch_size: usize,
    seq_len: usize,
) -> Result<Vec<f32>> {
    let dims = dims2(name, tensor)?;
    if dims != (batch_size, seq_len) {
        return Err(Error::shape(name, (batch_size, seq_len), dims));
    }
    host_f32(tensor)
}

fn mask_lengths(masks: &Tensor, batch_size: usize, seq_len: usize) -> Result<Vec<usize>> {
    let flags: Vec<u8> = step_values("masks", masks, batch_size, seq_len)?
        .into_iter()
        .map(|m| u8::from(m != 0.0))
        .collect();
    lengths_from_masks(&flags, batch_size, seq_len)
}

/// Top-`width` (prob, id) pairs of every `vocab_size` row, most probable first.
fn shortlist(dense: &[f32], vocab_size: usize, width: usize) -> (Vec<f32>, Vec<TokenId>) {
    let rows = if vocab_size == 0 { 0 } else { dense.len() / vocab_size };
    let mut probs = Vec::with_capacity(rows * width);
    let mut ids = Vec::with_capacity(rows * width);
    let mut order: Vec<usize> = Vec::with_capacity(vocab_size);

    for row in dense.chunks(vocab_size.max(1)).take(rows) {
        order.clear();
        order.extend(0..vocab_size);
        order.sort_by(|&a, &b| descending(row[a], row[b]));
        for &id in &order[..width] {
            probs.push(row[id]);
            ids.push(id as TokenId);
        }
    }
    (probs, ids)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shortlist_ties_prefer_lower_id() {
        let dense = [0.1, 0.4, 0.1, 0.4, 0.7, 0.2, 0.05, 0.05];
        let (probs, ids) = shortlist(&dense, 4, 2);
        assert_eq!(ids, vec![1, 3, 0, 1]);
        assert_eq!(probs, vec![0.4, 0.4, 0.7, 0.2]);
    }

    #[test]
    fn test_mask_lengths_accept_float_masks() {
        let device = Device::Cpu;
        let masks = Tensor::new(&[[1.0f32, 1.0, 0.0], [0.0, 0.0, 0.0]], &device).unwrap();
        assert_eq!(mask_lengths(&masks, 2, 3).unwrap(), vec![2, 0]);
        assert!(mask_lengths(&masks, 3, 2).is_err());
    }

    #[test]
    fn test_rank_errors() {
        let device = Device::Cpu;
        let flat = Tensor::new(&[1u32, 2, 3], &device).unwrap();
        assert!(matches!(
            dims2("targets", &flat),
            Err(Error::ShapeMismatch { name: "targets", .. })
        ));
        assert!(dims3("probs", &flat).is_err());
    }
}
