//! Tier pipeline orchestration.
//!
//! Tier 1 ingests documents: extract, chunk, embed, summarize, then publish
//! the summary generation and rebuild the index. Tiers 2 and 3 read the
//! previous tier's live summary, compress it further, and index their own
//! compressed text.
//!
//! Collaborator failures are isolated per document (tier 1) or per section
//! (tiers 2/3) and reported; the run only fails when nothing usable is left,
//! in which case the previous index and summary stay live.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use strata_embeddings::{Embedder, Embedding};
use strata_vector_index::{Chunk, TierLevel, VectorIndex};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::chunker::{ChunkerConfig, TextChunker, TextSpan};
use crate::completion::Completion;
use crate::error::{PipelineError, Result, Stage};
use crate::extraction::{Extractor, discover_documents, source_name};
use crate::storage::SummaryStore;
use crate::summarize::{SectionFailure, Summarizer, SummarizerConfig, SummarySection};

/// Configuration for one tier's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Chunking of the tier's text.
    pub chunker: ChunkerConfig,

    /// Target output/input length ratio of this tier's summary.
    pub compression_ratio: f64,

    /// Summarizer tuning.
    pub summarizer: SummarizerConfig,

    /// Texts per embedding request.
    pub embed_batch_size: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunker: ChunkerConfig::default(),
            compression_ratio: 0.1,
            summarizer: SummarizerConfig::default(),
            embed_batch_size: 32,
        }
    }
}

impl PipelineConfig {
    pub fn with_chunker(mut self, chunker: ChunkerConfig) -> Self {
        self.chunker = chunker;
        self
    }

    pub fn with_compression_ratio(mut self, ratio: f64) -> Self {
        self.compression_ratio = ratio;
        self
    }

    pub fn with_embed_batch_size(mut self, size: usize) -> Self {
        self.embed_batch_size = size;
        self
    }
}

/// Where a deployment keeps its indices and summaries.
#[derive(Debug, Clone)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/index/L{n}`
    pub fn index_dir(&self, tier: TierLevel) -> PathBuf {
        self.root.join("index").join(tier.to_string())
    }

    /// `<root>/summaries`
    pub fn summaries_dir(&self) -> PathBuf {
        self.root.join("summaries")
    }

    pub fn summary_store(&self) -> SummaryStore {
        SummaryStore::new(self.summaries_dir())
    }
}

/// External services a pipeline depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub embedder: Arc<dyn Embedder>,
    pub completion: Arc<dyn Completion>,
    pub extractor: Arc<dyn Extractor>,
}

/// A document that could not be ingested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentFailure {
    pub source_file: String,
    pub stage: Stage,
    pub reason: String,
}

/// What happened to one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    Indexed { pages: usize, chunks: usize },
    Failed { stage: Stage, reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentStatus {
    pub source_file: String,
    #[serde(flatten)]
    pub outcome: DocumentOutcome,
}

/// Outcome of an ingestion or summarization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineReport {
    pub tier: TierLevel,
    pub run_id: Uuid,
    /// Generation of the summary this run published.
    pub generation: u64,
    /// Generation the index was built from.
    pub source_generation: u64,
    /// Per-document status (tier 1 only).
    pub documents: Vec<DocumentStatus>,
    /// Documents (tier 1) or distinct source files (tiers 2/3) that made it
    /// into the index.
    pub files_processed: usize,
    pub chunks_added: usize,
    pub input_length: usize,
    pub output_length: usize,
    pub compression_ratio: f64,
    pub within_tolerance: bool,
    pub processing_time_secs: f64,
    pub failures: Vec<DocumentFailure>,
    pub section_failures: Vec<SectionFailure>,
}

/// Builds one tier's index and summary.
pub struct TierPipeline {
    tier: TierLevel,
    config: PipelineConfig,
    chunker: TextChunker,
    summarizer: Summarizer,
    embedder: Arc<dyn Embedder>,
    extractor: Arc<dyn Extractor>,
    index: Arc<VectorIndex>,
    index_dir: PathBuf,
    store: SummaryStore,
    /// One run at a time per tier.
    run_lock: Mutex<()>,
}

impl TierPipeline {
    pub fn new(
        config: PipelineConfig,
        collaborators: Collaborators,
        index: Arc<VectorIndex>,
        layout: &DataLayout,
    ) -> Result<Self> {
        let chunker = TextChunker::new(config.chunker)?;
        if !(config.compression_ratio > 0.0 && config.compression_ratio <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "compression ratio {} outside (0, 1]",
                config.compression_ratio
            )));
        }
        let tier = index.tier();
        Ok(Self {
            tier,
            summarizer: Summarizer::new(collaborators.completion, config.summarizer.clone()),
            chunker,
            embedder: collaborators.embedder,
            extractor: collaborators.extractor,
            index,
            index_dir: layout.index_dir(tier),
            store: layout.summary_store(),
            config,
            run_lock: Mutex::new(()),
        })
    }

    pub fn tier(&self) -> TierLevel {
        self.tier
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn index(&self) -> &Arc<VectorIndex> {
        &self.index
    }

    pub fn index_dir(&self) -> &Path {
        &self.index_dir
    }

    pub fn store(&self) -> &SummaryStore {
        &self.store
    }

    /// Generation of the summary this tier's index should reflect.
    pub async fn upstream_generation(&self) -> Result<Option<u64>> {
        let tier = self.tier.source().unwrap_or(self.tier);
        self.store.current_generation(tier).await
    }

    /// Whether a non-empty index was built from an older summary than the
    /// one currently live upstream.
    pub async fn is_stale(&self) -> Result<bool> {
        let snapshot = self.index.snapshot();
        if snapshot.is_empty() {
            return Ok(false);
        }
        let upstream = self.upstream_generation().await?;
        Ok(upstream.is_some() && upstream != snapshot.source_generation())
    }

    /// Ingest every document the extractor supports in `dir`.
    pub async fn ingest_dir(&self, dir: &Path, target_ratio: Option<f64>) -> Result<PipelineReport> {
        let documents = discover_documents(dir, self.extractor.extensions()).await?;
        info!(tier = %self.tier, dir = %dir.display(), found = documents.len(), "discovered documents");
        self.ingest(&documents, target_ratio).await
    }

    /// Build tier 1 from `documents`, replacing the previous index and
    /// publishing a new summary generation.
    pub async fn ingest(
        &self,
        documents: &[PathBuf],
        target_ratio: Option<f64>,
    ) -> Result<PipelineReport> {
        if self.tier != TierLevel::L1 {
            return Err(PipelineError::UnsupportedOperation {
                tier: self.tier,
                operation: "ingest",
            });
        }
        let _run = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(tier = %self.tier, %run_id, documents = documents.len(), "starting ingestion");

        let mut statuses = Vec::with_capacity(documents.len());
        let mut failures = Vec::new();
        let mut chunks = Vec::new();
        let mut sections = Vec::new();

        for (doc_idx, path) in documents.iter().enumerate() {
            match self.process_document(doc_idx, path).await {
                Ok(doc) => {
                    debug!(file = %doc.source_file, chunks = doc.chunks.len(), "document indexed");
                    statuses.push(DocumentStatus {
                        source_file: doc.source_file,
                        outcome: DocumentOutcome::Indexed {
                            pages: doc.pages,
                            chunks: doc.chunks.len(),
                        },
                    });
                    chunks.extend(doc.chunks);
                    sections.extend(doc.sections);
                }
                Err(failure) => {
                    warn!(
                        %run_id,
                        file = %failure.source_file,
                        stage = %failure.stage,
                        "skipping document: {}",
                        failure.reason
                    );
                    statuses.push(DocumentStatus {
                        source_file: failure.source_file.clone(),
                        outcome: DocumentOutcome::Failed {
                            stage: failure.stage,
                            reason: failure.reason.clone(),
                        },
                    });
                    failures.push(failure);
                }
            }
        }

        if chunks.is_empty() {
            return Err(PipelineError::NothingIngested { failures });
        }

        let ratio = target_ratio.unwrap_or(self.config.compression_ratio);
        let outcome = self.summarizer.summarize(&sections, ratio).await?;
        let files_processed = statuses.len() - failures.len();
        let chunks_added = chunks.len();

        let manifest = self.store.write(self.tier, outcome.sections.clone()).await?;
        self.index.rebuild_from(chunks, Some(manifest.generation)).await?;
        self.index.save(&self.index_dir).await?;

        let report = PipelineReport {
            tier: self.tier,
            run_id,
            generation: manifest.generation,
            source_generation: manifest.generation,
            documents: statuses,
            files_processed,
            chunks_added,
            input_length: outcome.input_length,
            output_length: outcome.output_length,
            compression_ratio: outcome.compression_ratio(),
            within_tolerance: outcome.within_tolerance,
            processing_time_secs: started.elapsed().as_secs_f64(),
            failures,
            section_failures: outcome.failures,
        };
        info!(
            tier = %self.tier,
            %run_id,
            files = report.files_processed,
            failed = report.failures.len(),
            chunks = report.chunks_added,
            generation = report.generation,
            secs = report.processing_time_secs,
            "ingestion complete"
        );
        Ok(report)
    }

    /// Build tier 2 or 3 from the previous tier's live summary.
    pub async fn summarize(&self, target_ratio: Option<f64>) -> Result<PipelineReport> {
        let source = self
            .tier
            .source()
            .ok_or(PipelineError::UnsupportedOperation {
                tier: self.tier,
                operation: "summarize",
            })?;
        let _run = self.run_lock.lock().await;
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        let artifact = self
            .store
            .read_current(source)
            .await?
            .ok_or(PipelineError::MissingSourceSummary { tier: source })?;
        info!(
            tier = %self.tier,
            %run_id,
            source_generation = artifact.generation,
            sections = artifact.sections.len(),
            "starting summarization"
        );

        let ratio = target_ratio.unwrap_or(self.config.compression_ratio);
        let outcome = self.summarizer.summarize(&artifact.sections, ratio).await?;

        let mut chunks = Vec::new();
        let mut section_failures = outcome.failures.clone();
        for (section_idx, section) in outcome.sections.iter().enumerate() {
            let spans = self.chunker.chunk_section(
                &section.text,
                section.page_start,
                section.page_end,
            );
            match self.embed_spans(&spans).await {
                Ok(vectors) => chunks.extend(self.build_chunks(
                    section_idx,
                    &section.source_file,
                    spans,
                    vectors,
                )),
                Err(reason) => {
                    warn!(%run_id, file = %section.source_file, "skipping section: {reason}");
                    section_failures.push(SectionFailure {
                        source_file: section.source_file.clone(),
                        page_start: section.page_start,
                        page_end: section.page_end,
                        reason,
                    });
                }
            }
        }

        if chunks.is_empty() {
            let reason = section_failures
                .last()
                .map(|f| f.reason.clone())
                .unwrap_or_else(|| "summary produced no text".to_string());
            return Err(PipelineError::upstream(Stage::Embedding, reason));
        }

        let files_processed = chunks
            .iter()
            .flat_map(Chunk::source_files)
            .collect::<BTreeSet<_>>()
            .len();
        let chunks_added = chunks.len();

        let manifest = self.store.write(self.tier, outcome.sections.clone()).await?;
        self.index
            .rebuild_from(chunks, Some(artifact.generation))
            .await?;
        self.index.save(&self.index_dir).await?;

        let report = PipelineReport {
            tier: self.tier,
            run_id,
            generation: manifest.generation,
            source_generation: artifact.generation,
            documents: Vec::new(),
            files_processed,
            chunks_added,
            input_length: outcome.input_length,
            output_length: outcome.output_length,
            compression_ratio: outcome.compression_ratio(),
            within_tolerance: outcome.within_tolerance,
            processing_time_secs: started.elapsed().as_secs_f64(),
            failures: Vec::new(),
            section_failures,
        };
        info!(
            tier = %self.tier,
            %run_id,
            chunks = report.chunks_added,
            ratio = report.compression_ratio,
            generation = report.generation,
            secs = report.processing_time_secs,
            "summarization complete"
        );
        Ok(report)
    }

    async fn process_document(
        &self,
        doc_idx: usize,
        path: &Path,
    ) -> std::result::Result<ProcessedDocument, DocumentFailure> {
        let failure = |stage: Stage, reason: String| DocumentFailure {
            source_file: source_name(path),
            stage,
            reason,
        };

        let doc = self
            .extractor
            .extract(path)
            .await
            .map_err(|e| failure(Stage::Extraction, e.reason))?;
        if doc.is_blank() {
            return Err(failure(
                Stage::Extraction,
                "no extractable text".to_string(),
            ));
        }

        let spans = self.chunker.chunk_pages(&doc.pages);
        let vectors = self
            .embed_spans(&spans)
            .await
            .map_err(|reason| failure(Stage::Embedding, reason))?;

        let sections = doc
            .pages
            .iter()
            .enumerate()
            .filter(|(_, text)| !text.trim().is_empty())
            .map(|(i, text)| {
                let page = i as u32 + 1;
                SummarySection::new(&doc.source_file, (page, page), text.as_str())
            })
            .collect();

        Ok(ProcessedDocument {
            chunks: self.build_chunks(doc_idx, &doc.source_file, spans, vectors),
            pages: doc.pages.len(),
            sections,
            source_file: doc.source_file,
        })
    }

    /// Embed span texts in batches. Any failed batch fails the whole unit.
    async fn embed_spans(&self, spans: &[TextSpan]) -> std::result::Result<Vec<Embedding>, String> {
        let texts: Vec<String> = spans.iter().map(|s| s.text.clone()).collect();
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.config.embed_batch_size.max(1)) {
            let embedded = self
                .embedder
                .embed_batch(batch)
                .await
                .map_err(|e| e.to_string())?;
            if embedded.len() != batch.len() {
                return Err(format!(
                    "embedder returned {} vectors for {} texts",
                    embedded.len(),
                    batch.len()
                ));
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    /// Chunk ids are `L{tier}-{unit:04}-{seq:05}`: the document (tier 1) or
    /// summary section (tiers 2/3) index, then the span within it.
    fn build_chunks(
        &self,
        unit_idx: usize,
        source_file: &str,
        spans: Vec<TextSpan>,
        vectors: Vec<Embedding>,
    ) -> Vec<Chunk> {
        spans
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (span, embedding))| {
                Chunk::new(
                    format!("{}-{unit_idx:04}-{i:05}", self.tier),
                    source_file,
                    (span.page_start, span.page_end),
                    span.text,
                    embedding,
                )
            })
            .collect()
    }
}

struct ProcessedDocument {
    source_file: String,
    pages: usize,
    chunks: Vec<Chunk>,
    sections: Vec<SummarySection>,
}
