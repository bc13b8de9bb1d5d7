//! Error taxonomy for the index crate.
//!
//! Wraps [`CoreError`] via `#[from]`, adding only the variants specific to
//! graph/vector operations rather than storage.

use graphdb_core::{CoreError, EntityId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("not found: {0}")]
    NotFound(EntityId),

    #[error("invalid vector: {0}")]
    InvalidVector(String),

    #[error("entry point not initialized on a non-empty index")]
    MissingEntryPoint,

    #[error(transparent)]
    Storage(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, IndexError::Storage(e) if e.is_retryable())
    }
}
