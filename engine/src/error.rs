use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors from the inference pipeline and session lifecycle.
///
/// Payloads are plain strings so an error hitting a whole sub-batch can be
/// cloned into each affected row's result.
#[derive(Error, Debug, Clone)]
pub enum EngineError {
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Failed to encode input: {0}")]
    Encode(String),

    #[error("Tensor shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Native engine failure: {0}")]
    EngineFailure(String),

    #[error("Timed out after {0:?} waiting for a free session")]
    Timeout(Duration),

    #[error("Session pool exhausted: no healthy sessions remain")]
    PoolExhausted,

    #[error("Session pool is shut down")]
    PoolClosed,
}

impl EngineError {
    /// Shorthand for the mismatch variant.
    pub fn shape_mismatch<E: Into<String>, A: Into<String>>(expected: E, actual: A) -> Self {
        Self::ShapeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }
}

impl From<rinfer_tokenization::TokenizationError> for EngineError {
    fn from(err: rinfer_tokenization::TokenizationError) -> Self {
        Self::Encode(err.to_string())
    }
}
