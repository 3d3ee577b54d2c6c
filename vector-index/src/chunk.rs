//! Chunk types stored in and returned from the index.

use serde::{Deserialize, Serialize};
use strata_embeddings::Embedding;

/// Joins file names when summary text was derived from several files.
pub const SOURCE_SEPARATOR: &str = "; ";

/// The individual file names in a `source_file` value.
pub fn source_files(source_file: &str) -> impl Iterator<Item = &str> {
    source_file
        .split(SOURCE_SEPARATOR)
        .map(str::trim)
        .filter(|name| !name.is_empty())
}

/// A unit of text with its embedding and citation metadata.
///
/// Chunks are immutable once stored. For tiers 2 and 3 the page range is the
/// range covered by the tier-1 material the summary text was derived from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Unique within one index.
    pub id: String,

    /// File the text originates from. Summary chunks derived from several
    /// files list them joined by [`SOURCE_SEPARATOR`].
    pub source_file: String,

    /// First page (1-based) covered by this chunk.
    pub page_start: u32,

    /// Last page (inclusive).
    pub page_end: u32,

    /// Chunk text.
    pub text: String,

    /// Embedding vector.
    pub embedding: Embedding,
}

impl Chunk {
    /// Create a chunk.
    pub fn new(
        id: impl Into<String>,
        source_file: impl Into<String>,
        pages: (u32, u32),
        text: impl Into<String>,
        embedding: Embedding,
    ) -> Self {
        Self {
            id: id.into(),
            source_file: source_file.into(),
            page_start: pages.0,
            page_end: pages.1,
            text: text.into(),
            embedding,
        }
    }

    pub fn source_files(&self) -> impl Iterator<Item = &str> {
        source_files(&self.source_file)
    }
}

/// A search hit. Carries the chunk's metadata but not its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredChunk {
    pub id: String,
    pub source_file: String,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
    /// Cosine similarity to the query.
    pub score: f32,
}

impl ScoredChunk {
    pub(crate) fn from_chunk(chunk: &Chunk, score: f32) -> Self {
        Self {
            id: chunk.id.clone(),
            source_file: chunk.source_file.clone(),
            page_start: chunk.page_start,
            page_end: chunk.page_end,
            text: chunk.text.clone(),
            score,
        }
    }
}
