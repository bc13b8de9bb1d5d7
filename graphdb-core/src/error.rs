//! Error taxonomy shared across the core, storage and index crates.
//!
//! Every crate boundary wraps this taxonomy rather than inventing its own:
//! storage adapters produce `CoreError` directly, and the index crate wraps
//! it via `#[from]`.

use thiserror::Error;

/// Error kinds produced anywhere in the database core: `InvalidArgument`,
/// `NotFound`, `Conflict`, `Throttled`, `TimedOut`, `Corrupt`,
/// `ConfigurationError`, `Internal`.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("throttled: {0}")]
    Throttled(String),

    #[error("timed out: {0}")]
    TimedOut(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("configuration error: {0}")]
    ConfigurationError(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Whether retrying the same operation could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::Throttled(_) | CoreError::TimedOut(_))
    }

    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        CoreError::InvalidArgument(format!(
            "dimension mismatch: expected {expected}, got {actual}"
        ))
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn throttled_and_timed_out_are_retryable() {
        assert!(CoreError::Throttled("429".into()).is_retryable());
        assert!(CoreError::TimedOut("budget exceeded".into()).is_retryable());
        assert!(!CoreError::NotFound("x".into()).is_retryable());
        assert!(!CoreError::Corrupt("bad json".into()).is_retryable());
    }

    #[test]
    fn dimension_mismatch_message() {
        let err = CoreError::dimension_mismatch(384, 128);
        assert!(err.to_string().contains("expected 384"));
        assert!(err.to_string().contains("got 128"));
    }
}
