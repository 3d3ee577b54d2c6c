//! Error types for tier pipelines and their collaborators.

use serde::{Deserialize, Serialize};
use strata_vector_index::{IndexError, TierLevel};
use thiserror::Error;

use crate::pipeline::DocumentFailure;

/// Result type alias for pipeline operations.
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Pipeline stage that talks to an external collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Extraction,
    Embedding,
    Completion,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::Extraction => "extraction",
            Stage::Embedding => "embedding",
            Stage::Completion => "completion",
        };
        f.write_str(name)
    }
}

/// Text extraction failed for one file.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("failed to extract {file}: {reason}")]
pub struct ExtractionError {
    pub file: String,
    pub reason: String,
}

impl ExtractionError {
    pub fn new(file: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            reason: reason.into(),
        }
    }
}

/// Errors from the completion collaborator.
#[derive(Error, Debug)]
pub enum CompletionError {
    /// Provider not configured.
    #[error("completion provider not configured")]
    NotConfigured,

    /// API request failed with a non-success status.
    #[error("API request failed ({status}): {message}")]
    ApiRequest { status: u16, message: String },

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl CompletionError {
    /// Whether retrying the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::RateLimited { .. } => true,
            Self::ApiRequest { status, .. } => *status >= 500,
            Self::Http(err) => err.is_timeout() || err.is_connect() || err.is_request(),
            _ => false,
        }
    }
}

/// Errors that abort a pipeline run.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A collaborator failed and no unit of work could recover.
    #[error("upstream {stage} service failed: {message}")]
    UpstreamService { stage: Stage, message: String },

    /// Tier 2/3 asked to summarize before the source tier has a summary.
    #[error("no summary from tier {} yet; build that tier first", .tier.number())]
    MissingSourceSummary { tier: TierLevel },

    /// Every document in the batch failed.
    #[error("nothing ingested ({} documents failed)", .failures.len())]
    NothingIngested { failures: Vec<DocumentFailure> },

    /// Operation not available on this tier.
    #[error("tier {tier} does not support {operation}")]
    UnsupportedOperation {
        tier: TierLevel,
        operation: &'static str,
    },

    /// Invalid pipeline configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Index error.
    #[error("index error: {0}")]
    Index(#[from] IndexError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn upstream(stage: Stage, err: impl std::fmt::Display) -> Self {
        Self::UpstreamService {
            stage,
            message: err.to_string(),
        }
    }
}
