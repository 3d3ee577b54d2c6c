//! Error types for the vector index.

use thiserror::Error;

/// Result type alias for index operations.
pub type Result<T> = std::result::Result<T, IndexError>;

/// Errors raised by index mutation, search and persistence.
#[derive(Error, Debug)]
pub enum IndexError {
    /// A vector's length differs from the index dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Search issued before anything was added.
    #[error("index is empty")]
    EmptyIndex,

    /// Chunk id already present in the index.
    #[error("duplicate chunk id: {0}")]
    DuplicateChunkId(String),

    /// A chunk carried a zero-length embedding.
    #[error("chunk {0} has an empty embedding")]
    EmptyEmbedding(String),

    /// Persisted files are inconsistent or unreadable.
    #[error("corrupt index at {path}: {reason}")]
    Corrupt { path: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
