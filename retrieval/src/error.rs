//! Error types for tier services.

use strata_embeddings::EmbeddingError;
use strata_tier_pipeline::{CompletionError, PipelineError};
use strata_vector_index::{IndexError, TierLevel};
use thiserror::Error;

/// Result type alias for tier service operations.
pub type Result<T> = std::result::Result<T, TierError>;

/// Errors that can occur while serving a tier.
#[derive(Error, Debug)]
pub enum TierError {
    /// The request itself is malformed.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The service is not accepting queries.
    #[error("tier {tier} is not running")]
    Unavailable { tier: TierLevel },

    /// Embedding the question failed.
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),

    /// Composing the answer failed.
    #[error("completion error: {0}")]
    Completion(#[from] CompletionError),

    /// Index error.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// Ingestion or summarization failed.
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
}

impl TierError {
    /// Stable machine-readable name, used as the `error` field of HTTP bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidRequest(_) => "invalid_request",
            Self::Unavailable { .. } => "tier_unavailable",
            Self::Embedding(_) => "embedding_error",
            Self::Completion(_) => "completion_error",
            Self::Index(IndexError::EmptyIndex) => "empty_index",
            Self::Index(IndexError::DimensionMismatch { .. }) => "dimension_mismatch",
            Self::Index(_) => "index_error",
            Self::Pipeline(PipelineError::MissingSourceSummary { .. }) => "missing_source_summary",
            Self::Pipeline(PipelineError::NothingIngested { .. }) => "nothing_ingested",
            Self::Pipeline(PipelineError::UnsupportedOperation { .. }) => "unsupported_operation",
            Self::Pipeline(PipelineError::UpstreamService { .. }) => "upstream_service_error",
            Self::Pipeline(_) => "pipeline_error",
        }
    }
}
