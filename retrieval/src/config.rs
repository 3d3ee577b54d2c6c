//! Configuration for a tier service.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use strata_tier_pipeline::{ChunkerConfig, PipelineConfig};
use strata_vector_index::TierLevel;

/// Configuration for one tier service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    /// Which tier this service answers for.
    pub tier: TierLevel,

    /// Interface to bind.
    pub host: String,

    /// Port to bind.
    pub port: u16,

    /// Chunks retrieved when a request does not say.
    pub top_k: usize,

    /// Upper bound on `top_k` accepted from a request.
    pub max_top_k: usize,

    /// Completion budget when a request does not say.
    pub max_output_tokens: u32,

    /// Characters of chunk text quoted in each citation.
    pub snippet_chars: usize,

    /// Entries in the question embedding cache (0 disables).
    pub query_cache_size: usize,

    /// Source documents read by tier 1 on ingest.
    pub documents_dir: PathBuf,

    /// Chunking, compression and embedding batch settings.
    pub pipeline: PipelineConfig,
}

impl TierConfig {
    /// Defaults for `tier`.
    pub fn for_tier(tier: TierLevel) -> Self {
        let (port, ratio, max_output_tokens, top_k) = match tier {
            TierLevel::L1 => (8001, 0.1, 1024, 8),
            TierLevel::L2 => (8002, 0.2, 512, 5),
            TierLevel::L3 => (8003, 0.1, 256, 3),
        };
        Self {
            tier,
            host: "127.0.0.1".to_string(),
            port,
            top_k,
            max_top_k: 50,
            max_output_tokens,
            snippet_chars: 240,
            query_cache_size: 256,
            documents_dir: PathBuf::from("data/raw"),
            pipeline: PipelineConfig::default().with_compression_ratio(ratio),
        }
    }

    /// Set the bind port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the default retrieval depth.
    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k;
        self
    }

    /// Set the chunker used by this tier's pipeline.
    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.pipeline.chunker = chunker;
        self
    }

    /// Set the directory tier 1 ingests from.
    pub fn with_documents_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.documents_dir = dir.into();
        self
    }

    /// Set the question embedding cache size.
    pub fn with_query_cache_size(mut self, size: usize) -> Self {
        self.query_cache_size = size;
        self
    }

    /// Compression ratio applied by this tier's summarizer.
    pub fn compression_ratio(&self) -> f64 {
        self.pipeline.compression_ratio
    }

    /// Address to bind, as `host:port`.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self::for_tier(TierLevel::L1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_per_tier_defaults() {
        let l1 = TierConfig::for_tier(TierLevel::L1);
        let l2 = TierConfig::for_tier(TierLevel::L2);
        let l3 = TierConfig::for_tier(TierLevel::L3);

        assert_eq!((l1.port, l1.top_k, l1.max_output_tokens), (8001, 8, 1024));
        assert_eq!((l2.port, l2.top_k, l2.max_output_tokens), (8002, 5, 512));
        assert_eq!((l3.port, l3.top_k, l3.max_output_tokens), (8003, 3, 256));
        assert_eq!(l2.compression_ratio(), 0.2);
        assert_eq!(l3.compression_ratio(), 0.1);
        assert_eq!(l1.pipeline.chunker.chunk_size, 1200);
        assert_eq!(l1.pipeline.chunker.chunk_overlap, 200);
    }

    #[test]
    fn test_missing_fields_take_tier_one_defaults() {
        let config: TierConfig = serde_json::from_str(r#"{"tier": 2, "top_k": 7}"#).unwrap();
        assert_eq!(config.tier, TierLevel::L2);
        assert_eq!(config.top_k, 7);
        assert_eq!(config.port, 8001);
        assert_eq!(config.bind_addr(), "127.0.0.1:8001");
    }
}
