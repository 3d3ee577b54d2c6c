//! # Embeddings
//!
//! This crate provides the embedding collaborator used by every retrieval
//! tier, together with the vector math and retry policy shared by the
//! upstream HTTP clients.
//!
//! ## Features
//!
//! - **Embedding Generation**: Convert text to dense vectors via an
//!   OpenAI-compatible `/embeddings` endpoint or an offline hashing model
//! - **Similarity**: Cosine similarity over raw (unnormalized) vectors
//! - **Caching**: LRU cache for repeated question embeddings
//! - **Retries**: Bounded exponential backoff for transient upstream failures
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                    Embeddings System                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  Embedder ──► Embedding ──► cosine_similarity                   │
//! │     │                                                           │
//! │     ▼                                                           │
//! │  OpenAiEmbedder / HashingEmbedder   CachedEmbedder  RetryPolicy │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

pub mod cache;
pub mod error;
pub mod provider;
pub mod retry;
pub mod similarity;

pub use cache::{CacheStats, CachedEmbedder, QueryEmbeddingCache};
pub use error::{EmbeddingError, Result};
pub use provider::{Embedder, HashingEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig};
pub use retry::RetryPolicy;
pub use similarity::{cosine_similarity, cosine_with_norms, magnitude};

/// A dense vector embedding.
pub type Embedding = Vec<f32>;

/// Dimension of embeddings produced by the default OpenAI model.
pub const DEFAULT_DIMENSION: usize = 1536; // text-embedding-3-small
