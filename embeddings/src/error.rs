//! Error types for the embeddings system.

use thiserror::Error;

/// Result type alias for embedding operations.
pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// Errors that can occur while talking to an embedding provider.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    /// Provider not configured.
    #[error("embedding provider not configured")]
    ProviderNotConfigured,

    /// API request failed with a non-success status.
    #[error("API request failed ({status}): {message}")]
    ApiRequest { status: u16, message: String },

    /// Invalid response from provider.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Rate limit exceeded.
    #[error("rate limit exceeded, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Empty input text.
    #[error("cannot embed empty text")]
    EmptyInput,

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl EmbeddingError {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(EmbeddingError::RateLimited { retry_after_secs: 1 }.is_retryable());
        assert!(
            EmbeddingError::ApiRequest {
                status: 503,
                message: "busy".to_string()
            }
            .is_retryable()
        );
        assert!(
            !EmbeddingError::ApiRequest {
                status: 400,
                message: "bad".to_string()
            }
            .is_retryable()
        );
        assert!(!EmbeddingError::EmptyInput.is_retryable());
    }
}
