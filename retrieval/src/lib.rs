//! # Tier Service
//!
//! Serves one retrieval tier: answers questions from the tier's index,
//! reports health and statistics, and triggers the tier's pipeline.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Tier Service                            │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                                                                 │
//! │  question ─► CachedEmbedder ─► VectorIndex.search(top_k)        │
//! │                                      │                          │
//! │                                      ▼                          │
//! │                           grounding prompt ─► Completion        │
//! │                                      │                          │
//! │                                      ▼                          │
//! │                          { answer, citations[], prompt }        │
//! │                                                                 │
//! │  /ingest | /summarize_l1 | /summarize_l2 ─► TierPipeline        │
//! │                 (rebuilds the same VectorIndex)                 │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,ignore
//! use strata_retrieval::{TierConfig, TierService};
//!
//! let service = TierService::open(TierConfig::for_tier(TierLevel::L2), collaborators, &layout)
//!     .await?;
//! let answer = service.answer("What are the key points?", None, None).await?;
//! ```

pub mod config;
pub mod engine;
pub mod error;
pub mod http;
pub mod protocol;

pub use config::TierConfig;
pub use engine::TierService;
pub use error::{Result, TierError};
pub use protocol::{
    Citation, ErrorBody, QueryAnswer, QueryRequest, RebuildRequest, TierHealth, TierStats,
    rebuild_path,
};
