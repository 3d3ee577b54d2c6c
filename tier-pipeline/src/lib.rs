//! # Tier Pipeline
//!
//! Builds the index and summary artifact of one retrieval tier.
//!
//! ```text
//! documents ─► Extractor ─► TextChunker ─► Embedder ─► VectorIndex (L1)
//!                   │
//!                   └──────► Summarizer ─► SummaryStore (L1, generation N)
//!                                              │
//!                      ┌───────────────────────┘
//!                      ▼
//!              Summarizer ─► TextChunker ─► Embedder ─► VectorIndex (L2)
//!                      │
//!                      └──► SummaryStore (L2) ─► ... (L3)
//! ```
//!
//! The collaborators (`Extractor`, `Embedder`, `Completion`) are traits so a
//! deployment can plug in its own services and tests can use in-memory fakes.

pub mod chunker;
pub mod completion;
pub mod error;
pub mod extraction;
pub mod pipeline;
pub mod storage;
pub mod summarize;

pub use chunker::{ChunkerConfig, TextChunker, TextSpan};
pub use completion::{Completion, OpenAiCompletion, OpenAiCompletionConfig};
pub use error::{CompletionError, ExtractionError, PipelineError, Result, Stage};
pub use extraction::{ExtractedDocument, Extractor, PlainTextExtractor, discover_documents};
pub use pipeline::{
    Collaborators, DataLayout, DocumentFailure, DocumentOutcome, DocumentStatus, PipelineConfig,
    PipelineReport, TierPipeline,
};
pub use storage::{SummaryArtifact, SummaryManifest, SummaryStore};
pub use summarize::{
    SectionFailure, Summarizer, SummarizerConfig, SummaryOutcome, SummarySection,
};
