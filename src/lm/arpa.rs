//! Back-off n-gram language model in ARPA format.
//!
//! ARPA layout:
//!
//! ```text
//! \data\
//! ngram 1=<count>
//! ngram 2=<count>
//!
//! \1-grams:
//! <log10_prob> <word> [<log10_backoff>]
//!
//! \2-grams:
//! <log10_prob> <word1> <word2> [<log10_backoff>]
//!
//! \end\
//! ```
//!
//! Scores are log10. An n-gram missing from the table is scored by backing
//! off to its shorter suffix and adding the back-off weight of the dropped
//! history:
//!
//! ```text
//! log P(w | h1..hk) = log P(h1..hk w)                  if stored
//!                   = bo(h1..hk) + log P(w | h2..hk)   otherwise
//! ```

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use std::time::Instant;

use tracing::{info, warn};

use crate::error::{Error, Result};

/// Index of a word in the model's own vocabulary.
pub type WordIndex = u32;

/// `<unk>` always occupies index 0.
pub const UNK_INDEX: WordIndex = 0;

pub const UNK_WORD: &str = "<unk>";
pub const BOS_WORD: &str = "<s>";
pub const EOS_WORD: &str = "</s>";

/// log10 probability assigned to `<unk>` when the file does not list it.
const MISSING_UNK_LOG10: f32 = -100.0;

#[derive(Debug, Clone, Copy, PartialEq)]
struct NgramEntry {
    log10_prob: f32,
    log10_backoff: f32,
}

/// Context state: the most recent words the model can still extend.
///
/// The context is trimmed to the longest suffix stored in the model, so two
/// states compare equal exactly when they score every continuation alike.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct NgramState {
    context: Vec<WordIndex>,
}

impl NgramState {
    /// Words in the context, oldest first.
    pub fn context(&self) -> &[WordIndex] {
        &self.context
    }

    pub fn len(&self) -> usize {
        self.context.len()
    }

    pub fn is_empty(&self) -> bool {
        self.context.is_empty()
    }
}

/// N-gram language model with back-off smoothing.
#[derive(Debug, Clone)]
pub struct ArpaModel {
    /// Highest n-gram order.
    order: usize,
    /// Word string to index.
    words: HashMap<String, WordIndex>,
    /// Index to word string.
    id_to_word: Vec<String>,
    /// All n-grams of every order, keyed by word indices.
    ngrams: HashMap<Vec<WordIndex>, NgramEntry>,
    /// Number of n-grams read per order (index 0 = unigrams).
    counts: Vec<usize>,
    bos: Option<WordIndex>,
    eos: Option<WordIndex>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Header,
    Ngrams(usize),
    End,
}

impl ArpaModel {
    /// Load a model from an ARPA file.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ModelLoad`] if the file cannot be read or is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let start = Instant::now();
        let file = File::open(path)
            .map_err(|e| Error::ModelLoad(format!("{}: {e}", path.display())))?;
        let model = Self::from_reader(BufReader::new(file), &path.display().to_string())?;

        info!(
            path = %path.display(),
            order = model.order,
            vocab_size = model.vocab_size(),
            ngrams = model.ngrams.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "loaded n-gram language model"
        );
        Ok(model)
    }

    /// Parse a model from ARPA text. `source` names the input in error messages.
    pub fn from_reader(reader: impl BufRead, source: &str) -> Result<Self> {
        let corrupt = |line_no: usize, msg: String| {
            Error::ModelLoad(format!("{source}:{line_no}: {msg}"))
        };

        let mut model = Self {
            order: 0,
            words: HashMap::new(),
            id_to_word: Vec::new(),
            ngrams: HashMap::new(),
            counts: Vec::new(),
            bos: None,
            eos: None,
        };
        model.intern(UNK_WORD);

        let mut declared: Vec<usize> = Vec::new();
        let mut section = Section::Preamble;
        let mut line_no = 0;

        for line in reader.lines() {
            line_no += 1;
            let line = line.map_err(|e| corrupt(line_no, e.to_string()))?;
            let line = line.trim();

            match section {
                Section::Preamble => {
                    if line == "\\data\\" {
                        section = Section::Header;
                    }
                }
                Section::Header => {
                    if line.is_empty() {
                        continue;
                    }
                    if let Some(spec) = line.strip_prefix("ngram ") {
                        let (n, count) = spec
                            .split_once('=')
                            .and_then(|(n, c)| {
                                Some((n.trim().parse::<usize>().ok()?, c.trim().parse::<usize>().ok()?))
                            })
                            .ok_or_else(|| corrupt(line_no, format!("bad count line `{line}`")))?;
                        if n != declared.len() + 1 {
                            return Err(corrupt(line_no, format!("expected count for order {}, got {n}", declared.len() + 1)));
                        }
                        declared.push(count);
                    } else if let Some(n) = parse_section_header(line) {
                        if declared.is_empty() {
                            return Err(corrupt(line_no, "no n-gram counts in header".into()));
                        }
                        if n != 1 {
                            return Err(corrupt(line_no, format!("expected \\1-grams:, got \\{n}-grams:")));
                        }
                        model.order = declared.len();
                        model.counts = vec![0; model.order];
                        section = Section::Ngrams(1);
                    } else {
                        return Err(corrupt(line_no, format!("unexpected header line `{line}`")));
                    }
                }
                Section::Ngrams(n) => {
                    if line.is_empty() {
                        continue;
                    }
                    if line == "\\end\\" {
                        if n != model.order {
                            return Err(corrupt(line_no, format!("\\end\\ after order {n} of {}", model.order)));
                        }
                        section = Section::End;
                        continue;
                    }
                    if let Some(next) = parse_section_header(line) {
                        if next != n + 1 || next > model.order {
                            return Err(corrupt(line_no, format!("unexpected section \\{next}-grams: after order {n}")));
                        }
                        section = Section::Ngrams(next);
                        continue;
                    }
                    model
                        .add_ngram_line(line, n)
                        .map_err(|msg| corrupt(line_no, msg))?;
                }
                Section::End => {
                    if !line.is_empty() {
                        return Err(corrupt(line_no, "content after \\end\\".into()));
                    }
                }
            }
        }

        match section {
            Section::End => {}
            Section::Preamble => {
                return Err(Error::ModelLoad(format!("{source}: missing \\data\\ header")));
            }
            _ => {
                return Err(Error::ModelLoad(format!("{source}: truncated, missing \\end\\")));
            }
        }

        for (i, (&want, &got)) in declared.iter().zip(&model.counts).enumerate() {
            if want != got {
                return Err(Error::ModelLoad(format!(
                    "{source}: header declares {want} {}-grams, found {got}",
                    i + 1
                )));
            }
        }

        if !model.ngrams.contains_key([UNK_INDEX].as_slice()) {
            model.ngrams.insert(
                vec![UNK_INDEX],
                NgramEntry {
                    log10_prob: MISSING_UNK_LOG10,
                    log10_backoff: 0.0,
                },
            );
        }
        model.bos = model.words.get(BOS_WORD).copied();
        model.eos = model.words.get(EOS_WORD).copied();
        if model.eos.is_none() {
            warn!(source, "model has no {EOS_WORD} entry; end of sequence scores as {UNK_WORD}");
        }

        Ok(model)
    }

    /// Parse one n-gram line of order `n`.
    fn add_ngram_line(&mut self, line: &str, n: usize) -> std::result::Result<(), String> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let has_backoff = match fields.len() {
            len if len == n + 1 => false,
            len if len == n + 2 && n < self.order => true,
            len => return Err(format!("{n}-gram line has {len} fields")),
        };

        let log10_prob = parse_score(fields[0])?;
        let log10_backoff = if has_backoff {
            parse_score(fields[n + 1])?
        } else {
            0.0
        };

        let mut key = Vec::with_capacity(n);
        for &word in &fields[1..=n] {
            let index = if n == 1 {
                self.intern(word)
            } else {
                *self
                    .words
                    .get(word)
                    .ok_or_else(|| format!("word `{word}` has no unigram entry"))?
            };
            key.push(index);
        }

        self.ngrams.insert(
            key,
            NgramEntry {
                log10_prob,
                log10_backoff,
            },
        );
        self.counts[n - 1] += 1;
        Ok(())
    }

    fn intern(&mut self, word: &str) -> WordIndex {
        if let Some(&index) = self.words.get(word) {
            return index;
        }
        let index = self.id_to_word.len() as WordIndex;
        self.words.insert(word.to_string(), index);
        self.id_to_word.push(word.to_string());
        index
    }

    // ========== Queries ==========

    /// Highest n-gram order.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Number of distinct words, including `<unk>`.
    pub fn vocab_size(&self) -> usize {
        self.id_to_word.len()
    }

    /// Number of `n`-grams read from the file.
    pub fn num_ngrams(&self, n: usize) -> usize {
        n.checked_sub(1)
            .and_then(|i| self.counts.get(i))
            .copied()
            .unwrap_or(0)
    }

    /// Index of `word`, or [`UNK_INDEX`] if the model does not know it.
    pub fn index(&self, word: &str) -> WordIndex {
        self.words.get(word).copied().unwrap_or(UNK_INDEX)
    }

    /// Whether `word` is in the model vocabulary (`<unk>` itself counts).
    pub fn contains(&self, word: &str) -> bool {
        self.words.contains_key(word)
    }

    /// Word string for `index`.
    pub fn word(&self, index: WordIndex) -> Option<&str> {
        self.id_to_word.get(index as usize).map(String::as_str)
    }

    /// Index of `<s>`, if present.
    pub fn bos(&self) -> Option<WordIndex> {
        self.bos
    }

    /// Index of `</s>`, or `<unk>` if the model lacks one.
    pub fn eos(&self) -> WordIndex {
        self.eos.unwrap_or(UNK_INDEX)
    }

    /// State after `<s>`.
    pub fn begin_sentence_state(&self) -> NgramState {
        match self.bos {
            Some(bos) if self.order > 1 => NgramState { context: vec![bos] },
            _ => NgramState::default(),
        }
    }

    /// State with no history.
    pub fn null_context_state(&self) -> NgramState {
        NgramState::default()
    }

    /// log10 probability of `word` after `state`, and the state after it.
    ///
    /// Indices outside the vocabulary are scored as `<unk>`.
    pub fn base_score(&self, state: &NgramState, word: WordIndex) -> (f32, NgramState) {
        let word = if (word as usize) < self.id_to_word.len() {
            word
        } else {
            UNK_INDEX
        };
        let context = state.context();

        let mut key: Vec<WordIndex> = Vec::with_capacity(context.len() + 1);
        let mut backoff = 0.0f32;
        let mut log10_prob = MISSING_UNK_LOG10;
        for start in 0..=context.len() {
            key.clear();
            key.extend_from_slice(&context[start..]);
            key.push(word);
            if let Some(entry) = self.ngrams.get(key.as_slice()) {
                log10_prob = entry.log10_prob;
                break;
            }
            if start < context.len() {
                if let Some(history) = self.ngrams.get(&context[start..]) {
                    backoff += history.log10_backoff;
                }
            }
        }

        (backoff + log10_prob, self.next_state(context, word))
    }

    /// Append `word` and keep the longest suffix the model stores.
    fn next_state(&self, context: &[WordIndex], word: WordIndex) -> NgramState {
        let keep = self.order.saturating_sub(1);
        let mut history: Vec<WordIndex> = Vec::with_capacity(context.len() + 1);
        history.extend_from_slice(context);
        history.push(word);

        let mut start = history.len().saturating_sub(keep);
        while start < history.len() && !self.ngrams.contains_key(&history[start..]) {
            start += 1;
        }
        history.drain(..start);
        NgramState { context: history }
    }
}

fn parse_section_header(line: &str) -> Option<usize> {
    line.strip_prefix('\\')?
        .strip_suffix("-grams:")?
        .parse()
        .ok()
}

fn parse_score(field: &str) -> std::result::Result<f32, String> {
    let value: f32 = field
        .parse()
        .map_err(|_| format!("`{field}` is not a number"))?;
    if value.is_nan() {
        return Err(format!("`{field}` is not a number"));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BIGRAM: &str = "\\data\\
ngram 1=5
ngram 2=3

\\1-grams:
-99\t<s>\t-0.5
-1.0\t</s>
-0.5\thello\t-0.3
-1.5\tworld\t-0.2
-2.0\t<unk>

\\2-grams:
-0.2\t<s> hello
-0.3\thello world
-0.1\tworld </s>

\\end\\
";

    fn bigram() -> ArpaModel {
        ArpaModel::from_reader(BIGRAM.as_bytes(), "bigram").unwrap()
    }

    #[test]
    fn test_header_and_counts() {
        let lm = bigram();
        assert_eq!(lm.order(), 2);
        assert_eq!(lm.num_ngrams(1), 5);
        assert_eq!(lm.num_ngrams(2), 3);
        assert_eq!(lm.num_ngrams(3), 0);
        assert_eq!(lm.vocab_size(), 5);
        assert_eq!(lm.index("<unk>"), UNK_INDEX);
        assert_eq!(lm.index("missing"), UNK_INDEX);
        assert!(lm.contains("hello"));
    }

    #[test]
    fn test_stored_bigram() {
        let lm = bigram();
        let state = lm.begin_sentence_state();
        let (score, next) = lm.base_score(&state, lm.index("hello"));

        assert!((score - (-0.2)).abs() < 1e-6);
        assert_eq!(next.context(), &[lm.index("hello")]);
    }

    #[test]
    fn test_backoff() {
        let lm = bigram();
        let hello = lm.index("hello");
        let state = NgramState {
            context: vec![hello],
        };

        // "hello hello" is not stored: bo(hello) + P(hello)
        let (score, _) = lm.base_score(&state, hello);
        assert!((score - (-0.3 + -0.5)).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_word() {
        let lm = bigram();
        let (score, next) = lm.base_score(&lm.null_context_state(), 999);
        assert!((score - (-2.0)).abs() < 1e-6);
        assert_eq!(next.context(), &[UNK_INDEX]);
    }

    #[test]
    fn test_missing_unk_is_synthesized() {
        let arpa = "\\data\\\nngram 1=2\n\n\\1-grams:\n-1.0\t</s>\n-0.5\ta\n\n\\end\\\n";
        let lm = ArpaModel::from_reader(arpa.as_bytes(), "mem").unwrap();
        let (score, _) = lm.base_score(&lm.null_context_state(), UNK_INDEX);
        assert_eq!(score, MISSING_UNK_LOG10);
    }

    #[test]
    fn test_unigram_state_is_empty() {
        let arpa = "\\data\\\nngram 1=2\n\n\\1-grams:\n-1.0\t</s>\n-0.5\ta\n\n\\end\\\n";
        let lm = ArpaModel::from_reader(arpa.as_bytes(), "mem").unwrap();
        let (_, next) = lm.base_score(&lm.begin_sentence_state(), lm.index("a"));
        assert!(next.is_empty());
    }

    #[test]
    fn test_corrupt_inputs() {
        let cases = [
            ("", "missing"),
            ("\\data\\\nngram 1=1\n\n\\1-grams:\n-1.0\ta\n", "truncated"),
            ("\\data\\\nngram 1=2\n\n\\1-grams:\n-1.0\ta\n\\end\\\n", "declares"),
            ("\\data\\\nngram 1=1\n\n\\1-grams:\nfoo\ta\n\\end\\\n", "not a number"),
            ("\\data\\\nngram 1=1\nngram 2=1\n\n\\1-grams:\n-1.0\ta\n\n\\2-grams:\n-1.0\ta b\n\\end\\\n", "no unigram"),
            ("\\data\\\nngram 1=1\n\n\\2-grams:\n", "expected"),
            ("\\data\\\nngram 1=1\n\n\\1-grams:\n-1.0\ta\t-0.1\n\\end\\\n", "fields"),
        ];
        for (arpa, needle) in cases {
            let err = ArpaModel::from_reader(arpa.as_bytes(), "mem").unwrap_err();
            let msg = err.to_string();
            assert!(msg.contains(needle), "`{msg}` should mention `{needle}`");
        }
    }
}
