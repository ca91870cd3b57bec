//! Integration tests for ArpaModel.

use std::io::Write;

use lm_decoder::Error;
use lm_decoder::lm::ArpaModel;
use lm_decoder::lm::arpa::UNK_INDEX;
use tempfile::NamedTempFile;

const TRIGRAM_ARPA: &str = "\\data\\
ngram 1=6
ngram 2=4
ngram 3=1

\\1-grams:
-1.0\t<unk>
-99\t<s>\t-0.5
-0.7\t</s>
-0.6\ta\t-0.3
-0.8\tb\t-0.2
-1.2\tc

\\2-grams:
-0.2\t<s> a\t-0.1
-0.4\ta b\t-0.15
-0.3\tb </s>
-0.5\tb a

\\3-grams:
-0.05\t<s> a b

\\end\\
";

fn write_model(text: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-5,
        "expected {expected}, got {actual}"
    );
}

#[test]
fn test_load_from_file() {
    let file = write_model(TRIGRAM_ARPA);
    let model = ArpaModel::load(file.path()).unwrap();

    assert_eq!(model.order(), 3);
    assert_eq!(model.vocab_size(), 6);
    assert_eq!(model.num_ngrams(1), 6);
    assert_eq!(model.num_ngrams(2), 4);
    assert_eq!(model.num_ngrams(3), 1);
    assert_eq!(model.num_ngrams(4), 0);
    assert_eq!(model.num_ngrams(0), 0);
}

#[test]
fn test_missing_file_is_load_error() {
    let dir = tempfile::tempdir().unwrap();
    let err = ArpaModel::load(dir.path().join("missing.arpa")).unwrap_err();
    assert!(matches!(err, Error::ModelLoad(_)));
}

#[test]
fn test_stored_ngrams() {
    let model = ArpaModel::from_reader(TRIGRAM_ARPA.as_bytes(), "trigram").unwrap();
    let a = model.index("a");
    let b = model.index("b");

    let (score, state) = model.base_score(&model.begin_sentence_state(), a);
    assert_close(score, -0.2);
    assert_eq!(state.len(), 2);

    let (score, state) = model.base_score(&state, b);
    assert_close(score, -0.05);
    assert_eq!(state.context(), &[a, b]);
}

#[test]
fn test_backoff_accumulates_weights() {
    let model = ArpaModel::from_reader(TRIGRAM_ARPA.as_bytes(), "trigram").unwrap();
    let a = model.index("a");
    let b = model.index("b");
    let c = model.index("c");
    let eos = model.eos();

    // P(</s> | a b) = bo(a b) + P(</s> | b)
    let (_, state) = model.base_score(&model.begin_sentence_state(), a);
    let (_, state) = model.base_score(&state, b);
    let (score, _) = model.base_score(&state, eos);
    assert_close(score, -0.15 + -0.3);

    // P(c | <s>) = bo(<s>) + P(c)
    let (score, state) = model.base_score(&model.begin_sentence_state(), c);
    assert_close(score, -0.5 + -1.2);
    assert_eq!(state.context(), &[c]);
}

#[test]
fn test_state_keeps_longest_stored_suffix() {
    let model = ArpaModel::from_reader(TRIGRAM_ARPA.as_bytes(), "trigram").unwrap();
    let a = model.index("a");
    let c = model.index("c");

    // "c a" is not stored, so only "a" is kept.
    let (_, state) = model.base_score(&model.null_context_state(), c);
    let (_, after_ca) = model.base_score(&state, a);
    let (_, after_a) = model.base_score(&model.null_context_state(), a);
    assert_eq!(after_ca, after_a);
}

#[test]
fn test_unknown_words() {
    let model = ArpaModel::from_reader(TRIGRAM_ARPA.as_bytes(), "trigram").unwrap();
    assert!(!model.contains("zzz"));
    assert_eq!(model.index("zzz"), UNK_INDEX);
    assert_eq!(model.word(UNK_INDEX), Some("<unk>"));

    let (score, _) = model.base_score(&model.null_context_state(), UNK_INDEX);
    assert_close(score, -1.0);

    // Out-of-range indices score as <unk>.
    let (score, _) = model.base_score(&model.null_context_state(), 999);
    assert_close(score, -1.0);
}

#[test]
fn test_missing_unk_is_synthesized() {
    let text = "\\data\\\nngram 1=2\n\n\\1-grams:\n-0.5\t</s>\n-0.3\ta\n\n\\end\\\n";
    let model = ArpaModel::from_reader(text.as_bytes(), "no-unk").unwrap();

    assert!(model.contains("<unk>"));
    let (score, _) = model.base_score(&model.null_context_state(), UNK_INDEX);
    assert_close(score, -100.0);
}

#[test]
fn test_corrupt_models_are_rejected() {
    let cases = [
        ("empty", ""),
        ("no header", "\\1-grams:\n-1.0\ta\n\\end\\\n"),
        ("count mismatch", "\\data\\\nngram 1=3\n\n\\1-grams:\n-1.0\ta\n\n\\end\\\n"),
        ("bad probability", "\\data\\\nngram 1=1\n\n\\1-grams:\nxyz\ta\n\n\\end\\\n"),
        ("missing end", "\\data\\\nngram 1=1\n\n\\1-grams:\n-1.0\ta\n"),
        ("wrong arity", "\\data\\\nngram 1=1\n\n\\1-grams:\n-1.0\ta b c d\n\n\\end\\\n"),
    ];

    for (name, text) in cases {
        let result = ArpaModel::from_reader(text.as_bytes(), name);
        assert!(
            matches!(result, Err(Error::ModelLoad(_))),
            "{name}: expected a load error"
        );
    }
}
