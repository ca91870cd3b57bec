//! Configuration types for lm-decoder.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::vocab::DEFAULT_EOS_ID;
use crate::engine::fusion::Fusion;
use crate::error::{Error, Result};

/// Log-probability returned for tokens the language model does not know.
pub const DEFAULT_OOV_LOG_PROB: f32 = -1000.0;

/// Beam search configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Number of top neural candidates considered per step.
    pub short_list: usize,
    /// Maximum number of hypotheses kept after each step.
    pub beam_size: usize,
    /// How neural and language-model scores are combined.
    pub fusion: Fusion,
    /// Add the end-of-sequence LM score before the final ranking.
    pub score_end_of_sequence: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            short_list: 30,
            beam_size: 5,
            fusion: Fusion::default(),
            score_end_of_sequence: true,
        }
    }
}

impl SearchConfig {
    /// Set the beam size.
    pub fn beam_size(mut self, beam_size: usize) -> Self {
        self.beam_size = beam_size;
        self
    }

    /// Set the shortlist width.
    pub fn short_list(mut self, short_list: usize) -> Self {
        self.short_list = short_list;
        self
    }

    /// Set the fusion policy.
    pub fn fusion(mut self, fusion: Fusion) -> Self {
        self.fusion = fusion;
        self
    }

    /// Enable or disable end-of-sequence rescoring.
    pub fn score_end_of_sequence(mut self, enabled: bool) -> Self {
        self.score_end_of_sequence = enabled;
        self
    }

    /// Check that the search can make progress.
    pub fn validate(&self) -> Result<()> {
        if self.beam_size == 0 {
            return Err(Error::Config("beam_size must be at least 1".into()));
        }
        if self.short_list == 0 {
            return Err(Error::Config("short_list must be at least 1".into()));
        }
        Ok(())
    }
}

/// Language-model scorer configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    /// Score for unknown tokens. `None` uses the model's own `<unk>` probability.
    pub oov_log_prob: Option<f32>,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            oov_log_prob: Some(DEFAULT_OOV_LOG_PROB),
        }
    }
}

impl ScorerConfig {
    pub fn validate(&self) -> Result<()> {
        match self.oov_log_prob {
            Some(score) if !score.is_finite() => Err(Error::Config(format!(
                "oov_log_prob must be finite, got {score}"
            ))),
            _ => Ok(()),
        }
    }
}

/// Worker pool configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Number of worker threads per batch call.
    pub workers: usize,
    /// Prefix for worker thread names.
    pub thread_name_prefix: String,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: 20,
            thread_name_prefix: "lm-decoder".to_string(),
        }
    }
}

impl PoolConfig {
    /// Create a pool config with the given worker count.
    pub fn with_workers(workers: usize) -> Self {
        Self {
            workers,
            ..Default::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::Config("workers must be at least 1".into()));
        }
        Ok(())
    }
}

/// Top-level decoder configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub search: SearchConfig,
    pub scorer: ScorerConfig,
    pub pool: PoolConfig,
    /// Token id written past each element's length in decoded sequences.
    pub pad_id: u32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            scorer: ScorerConfig::default(),
            pool: PoolConfig::default(),
            pad_id: DEFAULT_EOS_ID,
        }
    }
}

impl DecoderConfig {
    /// Load and validate a configuration from a JSON file.
    ///
    /// Missing fields take their default values.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate every section.
    pub fn validate(&self) -> Result<()> {
        self.search.validate()?;
        self.scorer.validate()?;
        self.pool.validate()
    }
}
