//! Tier service implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, info, warn};

use strata_embeddings::{CachedEmbedder, Embedder};
use strata_tier_pipeline::{
    Collaborators, Completion, DataLayout, PipelineReport, TierPipeline,
};
use strata_vector_index::persist::{META_FILE, VECTORS_FILE, index_exists};
use strata_vector_index::{ScoredChunk, TierLevel, VectorIndex};

use crate::config::TierConfig;
use crate::error::{Result, TierError};
use crate::protocol::{Citation, QueryAnswer, TierHealth, TierStats};

/// Answers questions against one tier's index and rebuilds that index on
/// request.
///
/// The service shares its [`VectorIndex`] with its [`TierPipeline`]; queries
/// read whatever snapshot is current while a rebuild publishes the next one.
pub struct TierService {
    /// Configuration.
    config: TierConfig,

    /// Index searched by queries and rebuilt by the pipeline.
    index: Arc<VectorIndex>,

    /// Ingestion (tier 1) or summarization (tiers 2 and 3).
    pipeline: TierPipeline,

    /// Embeds questions, consulting a small LRU first.
    query_embedder: CachedEmbedder<Arc<dyn Embedder>>,

    /// Composes answers from retrieved chunks.
    completion: Arc<dyn Completion>,

    /// Whether queries are accepted.
    running: AtomicBool,
}

impl TierService {
    /// Open the tier's persisted index (or start empty) and wire up its
    /// pipeline.
    pub async fn open(
        config: TierConfig,
        collaborators: Collaborators,
        layout: &DataLayout,
    ) -> Result<Self> {
        let tier = config.tier;
        info!(tier = %tier, "Initializing tier service");

        let index = Arc::new(VectorIndex::open(tier, &layout.index_dir(tier)).await?);
        let query_embedder = CachedEmbedder::new(
            Arc::clone(&collaborators.embedder),
            config.query_cache_size,
        );
        let completion = Arc::clone(&collaborators.completion);
        let pipeline = TierPipeline::new(
            config.pipeline.clone(),
            collaborators,
            Arc::clone(&index),
            layout,
        )?;

        info!(
            tier = %tier,
            vectors = index.len(),
            "Tier service initialized"
        );
        Ok(Self {
            config,
            index,
            pipeline,
            query_embedder,
            completion,
            running: AtomicBool::new(true),
        })
    }

    pub fn tier(&self) -> TierLevel {
        self.config.tier
    }

    pub fn config(&self) -> &TierConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn pipeline(&self) -> &TierPipeline {
        &self.pipeline
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start or stop accepting queries. Health keeps reporting either way.
    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        info!(tier = %self.tier(), running, "Tier running state changed");
    }

    /// Answer `question` from the `top_k` most similar chunks.
    pub async fn answer(
        &self,
        question: &str,
        top_k: Option<usize>,
        max_output_tokens: Option<u32>,
    ) -> Result<QueryAnswer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(TierError::InvalidRequest(
                "question must not be empty".to_string(),
            ));
        }
        if !self.is_running() {
            return Err(TierError::Unavailable { tier: self.tier() });
        }

        let top_k = top_k.unwrap_or(self.config.top_k);
        if top_k == 0 || top_k > self.config.max_top_k {
            return Err(TierError::InvalidRequest(format!(
                "top_k {top_k} outside 1..={}",
                self.config.max_top_k
            )));
        }
        let max_output_tokens = max_output_tokens.unwrap_or(self.config.max_output_tokens);
        let start = Instant::now();

        let embedding = self.query_embedder.embed(question).await?;
        let hits = self.index.search(&embedding, top_k)?;
        let prompt = build_prompt(self.tier(), question, &hits);
        let answer = self.completion.complete(&prompt, max_output_tokens).await?;

        let citations = hits
            .iter()
            .map(|hit| Citation::from_hit(hit, self.config.snippet_chars))
            .collect();
        info!(
            tier = %self.tier(),
            top_k,
            hits = hits.len(),
            latency_ms = start.elapsed().as_millis() as u64,
            "answered query"
        );
        Ok(QueryAnswer {
            answer: answer.trim().to_string(),
            citations,
            used_top_k: top_k,
            prompt,
        })
    }

    /// Current state, read from the live index snapshot.
    pub async fn health(&self) -> TierHealth {
        let snapshot = self.index.snapshot();
        let stale = match self.pipeline.is_stale().await {
            Ok(stale) => stale,
            Err(e) => {
                warn!(tier = %self.tier(), "failed to read upstream summary generation: {e}");
                false
            }
        };
        TierHealth {
            tier: self.tier(),
            server: self.tier().server_name().to_string(),
            running: self.is_running(),
            vector_count: snapshot.len(),
            files_indexed: snapshot.file_count(),
            built_at: snapshot.built_at(),
            source_generation: snapshot.source_generation(),
            stale,
            last_checked: Utc::now(),
        }
    }

    /// Index statistics plus where the index lives on disk.
    pub async fn stats(&self) -> TierStats {
        let stats = self.index.stats();
        let dir = self.pipeline.index_dir();
        TierStats {
            tier: stats.tier,
            vectors: stats.vector_count,
            files_indexed: stats.files_indexed,
            vector_dim: stats.vector_dim,
            built_at: stats.built_at,
            source_generation: stats.source_generation,
            index_path: dir.join(VECTORS_FILE).display().to_string(),
            metadata_path: dir.join(META_FILE).display().to_string(),
            index_exists: index_exists(dir),
            query_cache: self.query_embedder.cache().stats().await,
        }
    }

    /// Rebuild this tier from its input: the documents directory for tier 1,
    /// the source tier's summary otherwise.
    pub async fn rebuild(&self, target_ratio: Option<f64>) -> Result<PipelineReport> {
        if let Some(ratio) = target_ratio
            && !(ratio > 0.0 && ratio <= 1.0)
        {
            return Err(TierError::InvalidRequest(format!(
                "target_ratio {ratio} outside (0, 1]"
            )));
        }
        let report = match self.tier() {
            TierLevel::L1 => {
                self.pipeline
                    .ingest_dir(&self.config.documents_dir, target_ratio)
                    .await?
            }
            TierLevel::L2 | TierLevel::L3 => self.pipeline.summarize(target_ratio).await?,
        };
        // Questions asked against the old index may now rank differently.
        self.query_embedder.cache().clear().await;
        debug!(tier = %self.tier(), run_id = %report.run_id, "rebuild finished");
        Ok(report)
    }
}

/// Grounding prompt: numbered excerpts followed by the question.
fn build_prompt(tier: TierLevel, question: &str, hits: &[ScoredChunk]) -> String {
    let mut prompt = String::new();
    prompt.push_str(match tier {
        TierLevel::L1 => "You answer questions about a document collection using only the excerpts below.",
        TierLevel::L2 => "You answer questions from a condensed summary of a document collection, using only the excerpts below.",
        TierLevel::L3 => "You answer questions from a brief overview of a document collection, using only the excerpts below.",
    });
    prompt.push_str(
        " Cite excerpts as [n]. If the excerpts do not contain the answer, say so.\n\nExcerpts:\n",
    );
    for (n, hit) in hits.iter().enumerate() {
        prompt.push_str(&format!(
            "[{}] {} (pages {}-{})\n{}\n\n",
            n + 1,
            hit.source_file,
            hit.page_start,
            hit.page_end,
            hit.text.trim()
        ));
    }
    prompt.push_str("Question:\n");
    prompt.push_str(question);
    prompt.push_str("\n\nAnswer:");
    prompt
}
