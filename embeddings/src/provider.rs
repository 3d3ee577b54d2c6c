//! Embedding providers.
//!
//! Every tier vectorizes its chunks and incoming questions through the
//! [`Embedder`] trait. Two implementations ship with the crate: an
//! OpenAI-compatible HTTP client and an offline feature-hashing model.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::Embedding;
use crate::error::{EmbeddingError, Result};
use crate::retry::RetryPolicy;

/// Trait for embedding providers.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Get the name of this provider.
    fn name(&self) -> &str;

    /// Model identifier; part of the cache key for embeddings.
    fn model(&self) -> &str;

    /// Output dimension, when known before the first call.
    fn dimension(&self) -> Option<usize>;

    /// Generate an embedding for the given text.
    async fn embed(&self, text: &str) -> Result<Embedding>;

    /// Generate embeddings for multiple texts, preserving input order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        // Default implementation: process sequentially
        let mut results = Vec::with_capacity(texts.len());
        for text in texts {
            results.push(self.embed(text).await?);
        }
        Ok(results)
    }

    /// Check if the provider is usable (API key set, etc.).
    fn is_available(&self) -> bool {
        true
    }
}

#[async_trait]
impl<T: Embedder + ?Sized> Embedder for Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn model(&self) -> &str {
        (**self).model()
    }

    fn dimension(&self) -> Option<usize> {
        (**self).dimension()
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        (**self).embed(text).await
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        (**self).embed_batch(texts).await
    }

    fn is_available(&self) -> bool {
        (**self).is_available()
    }
}

/// Settings for [`OpenAiEmbedder`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAiEmbedderConfig {
    /// API key; falls back to `OPENAI_API_KEY` when absent.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    pub base_url: String,

    /// Embedding model.
    pub model: String,

    /// Optional output dimension override.
    pub dimensions: Option<usize>,

    /// Max inputs per request.
    pub batch_size: usize,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,

    /// Retry policy for transient failures.
    pub retry: RetryPolicy,
}

impl Default for OpenAiEmbedderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: "https://api.openai.com/v1".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimensions: None,
            batch_size: 32,
            timeout_secs: 30,
            retry: RetryPolicy::default(),
        }
    }
}

/// OpenAI-compatible embedding provider.
pub struct OpenAiEmbedder {
    api_key: Option<String>,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
    batch_size: usize,
    retry: RetryPolicy,
    client: reqwest::Client,
}

impl OpenAiEmbedder {
    /// Create a new provider from its settings.
    pub fn new(config: OpenAiEmbedderConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs.max(1)))
            .build()?;
        let api_key = config
            .api_key
            .or_else(|| std::env::var("OPENAI_API_KEY").ok())
            .filter(|key| !key.trim().is_empty());
        Ok(Self {
            api_key,
            endpoint: format!("{}/embeddings", config.base_url.trim_end_matches('/')),
            model: config.model,
            dimensions: config.dimensions,
            batch_size: config.batch_size.max(1),
            retry: config.retry,
            client,
        })
    }

    /// Set the API key.
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    /// Maximum batch size configured for this client.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    fn default_dimension(&self) -> usize {
        if let Some(dims) = self.dimensions {
            return dims;
        }
        match self.model.as_str() {
            "text-embedding-3-large" => 3072,
            _ => crate::DEFAULT_DIMENSION,
        }
    }

    async fn request_batch(&self, inputs: &[String]) -> Result<Vec<Embedding>> {
        let api_key = self
            .api_key
            .as_ref()
            .ok_or(EmbeddingError::ProviderNotConfigured)?;

        let body = OpenAiEmbeddingRequest {
            input: inputs,
            model: &self.model,
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key.trim())
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse().ok())
                .unwrap_or(60);
            return Err(EmbeddingError::RateLimited {
                retry_after_secs: retry_after,
            });
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::ApiRequest {
                status: status.as_u16(),
                message,
            });
        }

        let mut result: OpenAiEmbeddingResponse = response.json().await?;
        if result.data.len() != inputs.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "{} embeddings returned for {} inputs",
                result.data.len(),
                inputs.len()
            )));
        }
        result.data.sort_by_key(|item| item.index);

        Ok(result.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn name(&self) -> &str {
        "openai"
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.default_dimension())
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no embedding in response".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Embedding>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::EmptyInput);
        }

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            debug!(
                model = %self.model,
                inputs = batch.len(),
                "requesting embeddings"
            );
            let vectors = self
                .retry
                .run("embeddings", EmbeddingError::is_retryable, || {
                    self.request_batch(batch)
                })
                .await?;
            out.extend(vectors);
        }

        info!("Generated {} embeddings", out.len());
        Ok(out)
    }

    fn is_available(&self) -> bool {
        self.api_key.is_some()
    }
}

#[derive(Debug, Serialize)]
struct OpenAiEmbeddingRequest<'a> {
    input: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// OpenAI API response format.
#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

/// Offline embedder based on signed feature hashing of lowercase word
/// unigrams and bigrams.
///
/// Deterministic across processes and platforms, so indices built with it
/// can be reloaded and queried later without a network dependency.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    /// Create a hashing embedder with the given output dimension.
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn vectorize(&self, text: &str) -> Embedding {
        let mut vector = vec![0.0f32; self.dimension];
        let words: Vec<String> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .map(str::to_lowercase)
            .collect();

        for word in &words {
            self.accumulate(&mut vector, word.as_bytes(), 1.0);
        }
        for pair in words.windows(2) {
            let bigram = format!("{} {}", pair[0], pair[1]);
            self.accumulate(&mut vector, bigram.as_bytes(), 0.5);
        }

        let norm = crate::similarity::magnitude(&vector);
        if norm > 0.0 {
            for x in &mut vector {
                *x /= norm;
            }
        }
        vector
    }

    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = feature_hash(feature);
        let bucket = (hash % self.dimension as u64) as usize;
        let sign = if (hash >> 63) == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign * weight;
    }
}

impl Default for HashingEmbedder {
    fn default() -> Self {
        Self::new(384)
    }
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn model(&self) -> &str {
        "feature-hashing-sha256"
    }

    fn dimension(&self) -> Option<usize> {
        Some(self.dimension)
    }

    async fn embed(&self, text: &str) -> Result<Embedding> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::EmptyInput);
        }
        Ok(self.vectorize(text))
    }
}

/// First eight bytes of the feature's SHA-256.
fn feature_hash(feature: &[u8]) -> u64 {
    let digest = Sha256::digest(feature);
    let mut head = [0u8; 8];
    head.copy_from_slice(&digest[..8]);
    u64::from_le_bytes(head)
}
