//! Token-id scoring on top of an [`ArpaModel`].
//!
//! The neural model speaks token ids; the n-gram model is keyed on words.
//! [`NgramScorer`] resolves every id once at construction so scoring is a
//! table lookup followed by a back-off query, with no string handling on
//! the hot path.

use std::path::Path;

use tracing::{debug, warn};

use super::LanguageModel;
use super::arpa::{ArpaModel, NgramState, UNK_INDEX, WordIndex};
use crate::config::ScorerConfig;
use crate::core::vocab::{TokenId, Vocabulary};
use crate::error::{Error, Result};

/// ln(10), converts log10 scores to natural log.
const LN_10: f32 = std::f32::consts::LN_10;

/// Language-model adapter bound to a fixed vocabulary.
///
/// # Example
///
/// ```
/// use lm_decoder::core::vocab::Vocabulary;
/// use lm_decoder::lm::{ArpaModel, LanguageModel, NgramScorer};
/// use lm_decoder::config::ScorerConfig;
///
/// let arpa = "\\data\\\nngram 1=3\n\n\\1-grams:\n-1.0\t<s>\n-0.5\t</s>\n-0.3\ta\n\n\\end\\\n";
/// let model = ArpaModel::from_reader(arpa.as_bytes(), "inline").unwrap();
/// let vocab = Vocabulary::new(vec!["<init>", "<eos>", "a"]).unwrap();
/// let scorer = NgramScorer::new(model, vocab, &ScorerConfig::default()).unwrap();
///
/// let (log_prob, _state) = scorer.score(&scorer.initial_state(), 2);
/// assert!((log_prob - (-0.3 * std::f32::consts::LN_10)).abs() < 1e-5);
/// ```
#[derive(Debug, Clone)]
pub struct NgramScorer {
    model: ArpaModel,
    vocab: Vocabulary,
    /// Model word index per token id; `None` when the model lacks the word.
    word_ids: Vec<Option<WordIndex>>,
    /// Natural-log score for unknown tokens; `None` uses the model's `<unk>`.
    oov_log_prob: Option<f32>,
}

impl NgramScorer {
    /// Bind `vocab` to `model`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Vocabulary`] if no ordinary token of `vocab` is known
    /// to the model, which means the two were built for different data.
    pub fn new(model: ArpaModel, vocab: Vocabulary, config: &ScorerConfig) -> Result<Self> {
        config.validate()?;

        let word_ids: Vec<Option<WordIndex>> = vocab
            .iter()
            .map(|(id, token)| {
                if id == vocab.init_id() {
                    model.bos()
                } else if id == vocab.eos_id() {
                    Some(model.eos())
                } else {
                    model.contains(token).then(|| model.index(token))
                }
            })
            .collect();

        let ordinary = vocab.len().saturating_sub(2);
        let unknown = vocab
            .iter()
            .filter(|&(id, _)| !vocab.is_reserved(id))
            .filter(|&(id, _)| word_ids[id as usize].is_none())
            .count();

        if ordinary > 0 && unknown == ordinary {
            return Err(Error::Vocabulary(format!(
                "none of the {ordinary} vocabulary tokens is known to the language model"
            )));
        }
        if unknown > 0 {
            warn!(unknown, total = ordinary, "vocabulary tokens missing from the language model");
        }
        debug!(
            order = model.order(),
            dict_size = vocab.len(),
            "bound vocabulary to language model"
        );

        Ok(Self {
            model,
            vocab,
            word_ids,
            oov_log_prob: config.oov_log_prob,
        })
    }

    /// Load an ARPA model from `path` and bind `vocab` to it.
    pub fn load(path: impl AsRef<Path>, vocab: Vocabulary, config: &ScorerConfig) -> Result<Self> {
        let model = ArpaModel::load(path)?;
        Self::new(model, vocab, config)
    }

    /// Highest n-gram order of the underlying model.
    pub fn max_order(&self) -> usize {
        self.model.order()
    }

    /// Number of tokens in the bound vocabulary.
    pub fn dict_size(&self) -> usize {
        self.vocab.len()
    }

    pub fn vocab(&self) -> &Vocabulary {
        &self.vocab
    }

    pub fn model(&self) -> &ArpaModel {
        &self.model
    }

    /// Whether the model knows `token`.
    pub fn is_known(&self, token: TokenId) -> bool {
        matches!(self.word_ids.get(token as usize), Some(Some(_)))
    }
}

impl LanguageModel for NgramScorer {
    type State = NgramState;

    fn initial_state(&self) -> NgramState {
        self.model.begin_sentence_state()
    }

    fn score(&self, state: &NgramState, token: TokenId) -> (f32, NgramState) {
        match self.word_ids.get(token as usize).copied().flatten() {
            Some(word) => {
                let (log10_prob, next) = self.model.base_score(state, word);
                (log10_prob * LN_10, next)
            }
            None => {
                let (log10_prob, next) = self.model.base_score(state, UNK_INDEX);
                (self.oov_log_prob.unwrap_or(log10_prob * LN_10), next)
            }
        }
    }

    fn end_of_sequence(&self) -> TokenId {
        self.vocab.eos_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ARPA: &str = "\\data\\
ngram 1=5
ngram 2=2

\\1-grams:
-99\t<s>\t-0.4
-1.0\t</s>
-0.6\ta\t-0.2
-0.9\tb
-3.0\t<unk>

\\2-grams:
-0.1\t<s> a
-0.2\ta b

\\end\\
";

    fn scorer(oov_log_prob: Option<f32>) -> NgramScorer {
        let model = ArpaModel::from_reader(ARPA.as_bytes(), "test").unwrap();
        let vocab = Vocabulary::new(["<init>", "<eos>", "a", "b", "zzz"]).unwrap();
        NgramScorer::new(model, vocab, &ScorerConfig { oov_log_prob }).unwrap()
    }

    #[test]
    fn test_known_token_in_natural_log() {
        let lm = scorer(Some(-1000.0));
        let (score, state) = lm.score(&lm.initial_state(), 2);
        assert!((score - (-0.1 * LN_10)).abs() < 1e-5);

        let (score, _) = lm.score(&state, 3);
        assert!((score - (-0.2 * LN_10)).abs() < 1e-5);
    }

    #[test]
    fn test_oov_uses_configured_score() {
        let lm = scorer(Some(-1000.0));
        assert!(!lm.is_known(4));
        let (score, _) = lm.score(&lm.initial_state(), 4);
        assert_eq!(score, -1000.0);

        let (score, _) = lm.score(&lm.initial_state(), 77);
        assert_eq!(score, -1000.0);
    }

    #[test]
    fn test_oov_uses_model_unk() {
        let lm = scorer(None);
        let (score, _) = lm.score(&lm.initial_state(), 4);
        // bo(<s>) + P(<unk>)
        assert!((score - (-0.4 + -3.0) * LN_10).abs() < 1e-4);
    }

    #[test]
    fn test_end_of_sequence() {
        let lm = scorer(None);
        assert_eq!(lm.end_of_sequence(), 1);
        let (_, state) = lm.score(&lm.initial_state(), 3);
        let end = lm.score_end(&state);
        assert!((end - (-1.0 * LN_10)).abs() < 1e-5);
    }

    #[test]
    fn test_missing_end_marker_scores_as_unk() {
        let arpa = "\\data\\\nngram 1=3\n\n\\1-grams:\n-3.0\t<unk>\n-99\t<s>\t0.0\n-0.5\ta\n\n\\end\\\n";
        let model = ArpaModel::from_reader(arpa.as_bytes(), "no-eos").unwrap();
        let vocab = Vocabulary::new(["<init>", "<eos>", "a"]).unwrap();
        let lm = NgramScorer::new(model, vocab, &ScorerConfig::default()).unwrap();

        assert_eq!(lm.model().eos(), UNK_INDEX);
        assert!(lm.is_known(1));
        let end = lm.score_end(&lm.initial_state());
        assert!((end - (-3.0 * LN_10)).abs() < 1e-4);
    }

    #[test]
    fn test_order_and_dict_size() {
        let lm = scorer(None);
        assert_eq!(lm.max_order(), 2);
        assert_eq!(lm.dict_size(), 5);
    }

    #[test]
    fn test_vocabulary_mismatch() {
        let model = ArpaModel::from_reader(ARPA.as_bytes(), "test").unwrap();
        let vocab = Vocabulary::new(["<init>", "<eos>", "x", "y"]).unwrap();
        let err = NgramScorer::new(model, vocab, &ScorerConfig::default()).unwrap_err();
        assert!(matches!(err, Error::Vocabulary(_)));
    }
}
