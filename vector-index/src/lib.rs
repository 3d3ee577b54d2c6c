//! # Vector Index
//!
//! Storage and nearest-neighbor search for the chunk vectors of one
//! retrieval tier.
//!
//! An index is an immutable [`IndexSnapshot`] behind a pointer that is
//! swapped on every mutation. Readers clone the current `Arc` and search it
//! without holding any lock, so a rebuild never blocks a search and a search
//! never observes a half-built index.
//!
//! ```text
//! ┌──────────────┐  add / rebuild_from   ┌──────────────────────┐
//! │  writer      │ ────────────────────► │ new IndexSnapshot    │
//! │ (serialized) │                       └──────────┬───────────┘
//! └──────────────┘                                  │ swap
//!                                                   ▼
//! ┌──────────────┐  snapshot()           ┌──────────────────────┐
//! │  readers     │ ◄──────────────────── │ RwLock<Arc<Snapshot>>│
//! └──────────────┘                       └──────────────────────┘
//! ```

pub mod chunk;
pub mod error;
pub mod index;
pub mod persist;
pub mod tier;

pub use chunk::{Chunk, SOURCE_SEPARATOR, ScoredChunk, source_files};
pub use error::{IndexError, Result};
pub use index::{IndexSnapshot, IndexStats, VectorIndex};
pub use tier::TierLevel;
