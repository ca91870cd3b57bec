//! Error types for lm-decoder.

use thiserror::Error;

/// Result type alias for lm-decoder operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for lm-decoder.
#[derive(Error, Debug)]
pub enum Error {
    /// Language model loading failed (missing or corrupt file).
    #[error("failed to load language model: {0}")]
    ModelLoad(String),

    /// Vocabulary is invalid or does not match the language model.
    #[error("vocabulary error: {0}")]
    Vocabulary(String),

    /// Batch inputs disagree on their dimensions.
    #[error("shape mismatch for `{name}`: expected {expected}, got {actual}")]
    ShapeMismatch {
        name: &'static str,
        expected: String,
        actual: String,
    },

    /// A batch element declares more valid steps than its row holds.
    #[error("batch element {index} has length {length}, exceeding {max} steps")]
    InvalidLength {
        index: usize,
        length: usize,
        max: usize,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// Worker pool could not be created.
    #[error("worker pool error: {0}")]
    WorkerPool(String),

    /// A job panicked while processing its batch element.
    #[error("job for batch element {job} panicked: {message}")]
    WorkerPanic { job: usize, message: String },

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn shape(
        name: &'static str,
        expected: impl std::fmt::Debug,
        actual: impl std::fmt::Debug,
    ) -> Self {
        Self::ShapeMismatch {
            name,
            expected: format!("{expected:?}"),
            actual: format!("{actual:?}"),
        }
    }
}
