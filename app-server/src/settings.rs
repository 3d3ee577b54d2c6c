//! Settings file for `strata-server`.
//!
//! ```toml
//! data_dir = "data"
//!
//! [embedder]
//! provider = "openai"
//! model = "text-embedding-3-small"
//!
//! [completion]
//! model = "gpt-4o-mini"
//!
//! [tiers.l2]
//! port = 9002
//! compression_ratio = 0.25
//!
//! [router]
//! port = 9000
//! monitor_interval_secs = 60
//! ```
//!
//! Tier tables hold overrides only; anything left out keeps that tier's
//! defaults.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use strata_embeddings::{Embedder, HashingEmbedder, OpenAiEmbedder, OpenAiEmbedderConfig};
use strata_retrieval::TierConfig;
use strata_router::{RouterConfig, TierEndpoint};
use strata_tier_pipeline::{ChunkerConfig, DataLayout, OpenAiCompletionConfig};
use strata_vector_index::TierLevel;

/// Which embedder the tiers use.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum EmbedderSettings {
    /// An OpenAI-compatible `/embeddings` endpoint.
    #[serde(rename = "openai")]
    OpenAi(OpenAiEmbedderConfig),
    /// Deterministic local hashing, for offline runs.
    Hashing { dimension: usize },
}

impl Default for EmbedderSettings {
    fn default() -> Self {
        EmbedderSettings::OpenAi(OpenAiEmbedderConfig::default())
    }
}

impl EmbedderSettings {
    pub fn build(&self) -> anyhow::Result<Arc<dyn Embedder>> {
        Ok(match self {
            EmbedderSettings::OpenAi(config) => Arc::new(
                OpenAiEmbedder::new(config.clone()).context("failed to build embedder")?,
            ),
            EmbedderSettings::Hashing { dimension } => Arc::new(HashingEmbedder::new(*dimension)),
        })
    }
}

/// Per-tier overrides applied on top of [`TierConfig::for_tier`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub top_k: Option<usize>,
    pub max_top_k: Option<usize>,
    pub max_output_tokens: Option<u32>,
    pub snippet_chars: Option<usize>,
    pub query_cache_size: Option<usize>,
    pub documents_dir: Option<PathBuf>,
    pub compression_ratio: Option<f64>,
    pub chunk_size: Option<usize>,
    pub chunk_overlap: Option<usize>,
    pub embed_batch_size: Option<usize>,
}

impl TierOverrides {
    pub fn apply(&self, mut config: TierConfig) -> TierConfig {
        if let Some(host) = &self.host {
            config.host.clone_from(host);
        }
        if let Some(dir) = &self.documents_dir {
            config.documents_dir.clone_from(dir);
        }
        let pipeline = &mut config.pipeline;
        let chunker = ChunkerConfig {
            chunk_size: self.chunk_size.unwrap_or(pipeline.chunker.chunk_size),
            chunk_overlap: self.chunk_overlap.unwrap_or(pipeline.chunker.chunk_overlap),
        };
        pipeline.chunker = chunker;
        pipeline.compression_ratio = self.compression_ratio.unwrap_or(pipeline.compression_ratio);
        pipeline.embed_batch_size = self.embed_batch_size.unwrap_or(pipeline.embed_batch_size);
        config.port = self.port.unwrap_or(config.port);
        config.top_k = self.top_k.unwrap_or(config.top_k);
        config.max_top_k = self.max_top_k.unwrap_or(config.max_top_k);
        config.max_output_tokens = self.max_output_tokens.unwrap_or(config.max_output_tokens);
        config.snippet_chars = self.snippet_chars.unwrap_or(config.snippet_chars);
        config.query_cache_size = self.query_cache_size.unwrap_or(config.query_cache_size);
        config
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TierTable {
    pub l1: TierOverrides,
    pub l2: TierOverrides,
    pub l3: TierOverrides,
}

impl TierTable {
    fn get(&self, tier: TierLevel) -> &TierOverrides {
        match tier {
            TierLevel::L1 => &self.l1,
            TierLevel::L2 => &self.l2,
            TierLevel::L3 => &self.l3,
        }
    }
}

/// Everything `strata-server` reads from its settings file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of persisted indexes and summaries.
    pub data_dir: PathBuf,
    pub embedder: EmbedderSettings,
    pub completion: OpenAiCompletionConfig,
    pub tiers: TierTable,
    pub router: RouterConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data"),
            embedder: EmbedderSettings::default(),
            completion: OpenAiCompletionConfig::default(),
            tiers: TierTable::default(),
            router: RouterConfig::default(),
        }
    }
}

impl Settings {
    /// Read settings from `path`, or use defaults when no path is given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn from_toml(text: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Effective configuration of `tier`.
    pub fn tier_config(&self, tier: TierLevel) -> TierConfig {
        self.tiers.get(tier).apply(TierConfig::for_tier(tier))
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.data_dir)
    }

    /// Router servers pointing at the configured tier ports.
    pub fn local_endpoints(&self) -> Vec<TierEndpoint> {
        TierLevel::ALL
            .into_iter()
            .map(|tier| {
                let config = self.tier_config(tier);
                TierEndpoint::new(tier, format!("http://{}", config.bind_addr()))
            })
            .collect()
    }

    /// Problems that make these settings unusable. Empty when valid.
    pub fn validate(&self) -> Vec<String> {
        let mut problems = Vec::new();
        let mut ports: HashMap<u16, String> = HashMap::new();
        ports.insert(self.router.port, "router".to_string());

        for tier in TierLevel::ALL {
            let config = self.tier_config(tier);
            let name = tier.server_name();
            if let Some(owner) = ports.insert(config.port, name.to_string()) {
                problems.push(format!("{name} port {} is also used by {owner}", config.port));
            }
            let ratio = config.compression_ratio();
            if !(ratio > 0.0 && ratio <= 1.0) {
                problems.push(format!("{name} compression_ratio {ratio} outside (0, 1]"));
            }
            if let Err(e) = config.pipeline.chunker.validate() {
                problems.push(format!("{name}: {e}"));
            }
            if config.top_k == 0 || config.top_k > config.max_top_k {
                problems.push(format!(
                    "{name} top_k {} outside 1..={}",
                    config.top_k, config.max_top_k
                ));
            }
            if config.pipeline.embed_batch_size == 0 {
                problems.push(format!("{name} embed_batch_size must be greater than zero"));
            }
        }
        if let EmbedderSettings::Hashing { dimension: 0 } = self.embedder {
            problems.push("embedder dimension must be greater than zero".to_string());
        }
        if self.completion.timeout_secs == 0 {
            problems.push("completion timeout_secs must be greater than zero".to_string());
        }
        problems.extend(self.router.validate().into_iter().map(|p| format!("router: {p}")));
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert_eq!(settings.validate(), Vec::<String>::new());
        let endpoints = settings.local_endpoints();
        assert_eq!(endpoints, settings.router.servers);
    }

    #[test]
    fn test_tier_overrides_keep_tier_defaults() {
        let settings = Settings::from_toml(
            r#"
            data_dir = "/srv/strata"

            [embedder]
            provider = "hashing"
            dimension = 128

            [tiers.l2]
            port = 9002
            compression_ratio = 0.25

            [router]
            port = 9000
            monitor_interval_secs = 60
            "#,
        )
        .unwrap();

        let l2 = settings.tier_config(TierLevel::L2);
        assert_eq!(l2.port, 9002);
        assert_eq!(l2.compression_ratio(), 0.25);
        assert_eq!(l2.top_k, 5);
        assert_eq!(l2.max_output_tokens, 512);
        let l3 = settings.tier_config(TierLevel::L3);
        assert_eq!((l3.port, l3.top_k), (8003, 3));
        assert_eq!(settings.router.port, 9000);
        assert_eq!(settings.router.monitor_interval_secs, Some(60));
        assert!(matches!(
            settings.embedder,
            EmbedderSettings::Hashing { dimension: 128 }
        ));
        assert_eq!(settings.layout().root(), Path::new("/srv/strata"));
    }

    #[test]
    fn test_validate_reports_every_problem() {
        let settings = Settings::from_toml(
            r#"
            [tiers.l1]
            port = 8000
            chunk_size = 100
            chunk_overlap = 100

            [tiers.l3]
            compression_ratio = 1.5
            top_k = 0

            [router]
            request_timeout_secs = 0
            "#,
        )
        .unwrap();

        let problems = settings.validate();
        assert_eq!(problems.len(), 5, "{problems:?}");
        assert!(problems[0].contains("also used by router"));
        assert!(problems.iter().any(|p| p.contains("chunk_overlap")));
        assert!(problems.iter().any(|p| p.starts_with("router: request_timeout_secs")));
    }

    #[test]
    fn test_unknown_tier_field_is_rejected() {
        let err = Settings::from_toml("[tiers.l1]\nportt = 1\n").unwrap_err();
        assert!(format!("{err:#}").contains("portt"), "{err:#}");
    }
}
