//! Wire types shared by tier services and the router.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_embeddings::CacheStats;
use strata_vector_index::{ScoredChunk, TierLevel};

/// Body of `POST /query`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub question: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
}

impl QueryRequest {
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            top_k: None,
            max_output_tokens: None,
        }
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = Some(top_k);
        self
    }
}

/// One retrieved chunk backing an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    pub source_file: String,
    pub page_start: u32,
    pub page_end: u32,
    /// Cosine similarity to the question.
    pub score: f32,
    /// Leading text of the chunk.
    pub snippet: String,
}

impl Citation {
    /// Cite `hit`, quoting at most `snippet_chars` characters of it.
    pub fn from_hit(hit: &ScoredChunk, snippet_chars: usize) -> Self {
        Self {
            source_file: hit.source_file.clone(),
            page_start: hit.page_start,
            page_end: hit.page_end,
            score: hit.score,
            snippet: snippet(&hit.text, snippet_chars),
        }
    }
}

fn snippet(text: &str, max_chars: usize) -> String {
    let text = text.trim();
    match text.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", text[..cut].trim_end()),
        None => text.to_string(),
    }
}

/// Answer from one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryAnswer {
    pub answer: String,
    /// Retrieved chunks in relevance order.
    pub citations: Vec<Citation>,
    pub used_top_k: usize,
    pub prompt: String,
}

/// Live state of one tier, as reported by `GET /health`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierHealth {
    pub tier: TierLevel,
    pub server: String,
    pub running: bool,
    pub vector_count: usize,
    pub files_indexed: usize,
    #[serde(default)]
    pub built_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub source_generation: Option<u64>,
    /// The upstream summary moved on since this index was built.
    #[serde(default)]
    pub stale: bool,
    pub last_checked: DateTime<Utc>,
}

/// Index statistics, as reported by `GET /stats`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierStats {
    pub tier: TierLevel,
    pub vectors: usize,
    pub files_indexed: usize,
    pub vector_dim: Option<usize>,
    pub built_at: Option<DateTime<Utc>>,
    pub source_generation: Option<u64>,
    pub index_path: String,
    pub metadata_path: String,
    pub index_exists: bool,
    pub query_cache: CacheStats,
}

/// Optional body of the ingest and summarize triggers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RebuildRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_ratio: Option<f64>,
}

/// JSON body returned with every non-2xx response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub message: String,
}

/// Path of the endpoint that rebuilds `tier` from its input.
pub fn rebuild_path(tier: TierLevel) -> &'static str {
    match tier {
        TierLevel::L1 => "/ingest",
        TierLevel::L2 => "/summarize_l1",
        TierLevel::L3 => "/summarize_l2",
    }
}
