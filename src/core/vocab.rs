//! Token vocabulary.
//!
//! Maps the integer token ids produced by the neural model to the surface
//! strings the language model is keyed on. Two ids are reserved for the
//! sequence-start and sequence-end markers.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{Error, Result};

/// Integer token id in `[0, vocab_size)`.
pub type TokenId = u32;

/// Default id of the sequence-start token (`<init>`).
pub const DEFAULT_INIT_ID: TokenId = 0;

/// Default id of the end-of-sequence token (`<eos>`).
pub const DEFAULT_EOS_ID: TokenId = 1;

/// Ordered, immutable id-to-string table.
///
/// # Example
///
/// ```
/// use lm_decoder::core::vocab::Vocabulary;
///
/// let vocab = Vocabulary::new(vec!["<init>", "<eos>", "a", "b"]).unwrap();
/// assert_eq!(vocab.len(), 4);
/// assert_eq!(vocab.token(2), Some("a"));
/// assert_eq!(vocab.id("b"), Some(3));
/// assert!(vocab.is_reserved(1));
/// ```
#[derive(Debug, Clone)]
pub struct Vocabulary {
    tokens: Vec<String>,
    index: HashMap<String, TokenId>,
    init_id: TokenId,
    eos_id: TokenId,
}

impl Vocabulary {
    /// Create a vocabulary whose first two entries are the init and end tokens.
    pub fn new<S: Into<String>>(tokens: impl IntoIterator<Item = S>) -> Result<Self> {
        Self::with_reserved(tokens, DEFAULT_INIT_ID, DEFAULT_EOS_ID)
    }

    /// Create a vocabulary with explicit reserved ids.
    pub fn with_reserved<S: Into<String>>(
        tokens: impl IntoIterator<Item = S>,
        init_id: TokenId,
        eos_id: TokenId,
    ) -> Result<Self> {
        let tokens: Vec<String> = tokens.into_iter().map(Into::into).collect();
        let size = tokens.len();

        if init_id == eos_id {
            return Err(Error::Vocabulary(format!(
                "init and end-of-sequence ids must differ, both are {init_id}"
            )));
        }
        for (name, id) in [("init", init_id), ("end-of-sequence", eos_id)] {
            if id as usize >= size {
                return Err(Error::Vocabulary(format!(
                    "{name} id {id} is outside a vocabulary of {size} tokens"
                )));
            }
        }

        let mut index = HashMap::with_capacity(size);
        let mut duplicates = 0usize;
        for (id, token) in tokens.iter().enumerate() {
            if index.contains_key(token) {
                duplicates += 1;
            } else {
                index.insert(token.clone(), id as TokenId);
            }
        }
        if duplicates > 0 {
            debug!(duplicates, "vocabulary has repeated entries; keeping first occurrence");
        }

        Ok(Self {
            tokens,
            index,
            init_id,
            eos_id,
        })
    }

    /// Number of tokens.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Whether the vocabulary is empty. Always false for a constructed vocabulary.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Surface string for `id`.
    pub fn token(&self, id: TokenId) -> Option<&str> {
        self.tokens.get(id as usize).map(String::as_str)
    }

    /// Id of the first entry equal to `token`.
    pub fn id(&self, token: &str) -> Option<TokenId> {
        self.index.get(token).copied()
    }

    pub fn init_id(&self) -> TokenId {
        self.init_id
    }

    pub fn eos_id(&self) -> TokenId {
        self.eos_id
    }

    /// Whether `id` is one of the reserved markers.
    pub fn is_reserved(&self, id: TokenId) -> bool {
        id == self.init_id || id == self.eos_id
    }

    /// Iterate over `(id, token)` pairs in id order.
    pub fn iter(&self) -> impl Iterator<Item = (TokenId, &str)> {
        self.tokens
            .iter()
            .enumerate()
            .map(|(id, token)| (id as TokenId, token.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reserved_ids() {
        let vocab = Vocabulary::new(["<init>", "<eos>", "a"]).unwrap();
        assert_eq!(vocab.init_id(), 0);
        assert_eq!(vocab.eos_id(), 1);
        assert!(vocab.is_reserved(0));
        assert!(!vocab.is_reserved(2));
    }

    #[test]
    fn test_too_small() {
        assert!(Vocabulary::new(["<init>"]).is_err());
        assert!(Vocabulary::new(Vec::<String>::new()).is_err());
    }

    #[test]
    fn test_custom_reserved() {
        let vocab = Vocabulary::with_reserved(["a", "</s>", "<s>"], 2, 1).unwrap();
        assert_eq!(vocab.init_id(), 2);
        assert_eq!(vocab.token(vocab.init_id()), Some("<s>"));

        assert!(Vocabulary::with_reserved(["a", "b"], 1, 1).is_err());
        assert!(Vocabulary::with_reserved(["a", "b"], 0, 5).is_err());
    }

    #[test]
    fn test_duplicates_keep_first() {
        let vocab = Vocabulary::new(["<init>", "<eos>", "x", "x"]).unwrap();
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.id("x"), Some(2));
        assert_eq!(vocab.token(3), Some("x"));
    }

    #[test]
    fn test_out_of_range_lookup() {
        let vocab = Vocabulary::new(["<init>", "<eos>"]).unwrap();
        assert_eq!(vocab.token(7), None);
        assert_eq!(vocab.id("missing"), None);
    }
}
