//! Snapshot-swapped vector index.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use strata_embeddings::{cosine_with_norms, magnitude};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::chunk::{Chunk, ScoredChunk};
use crate::error::{IndexError, Result};
use crate::tier::TierLevel;

/// Immutable contents of an index at one point in time.
#[derive(Debug, Clone)]
pub struct IndexSnapshot {
    tier: TierLevel,
    chunks: Vec<Chunk>,
    norms: Vec<f32>,
    vector_dim: Option<usize>,
    built_at: Option<DateTime<Utc>>,
    source_generation: Option<u64>,
}

impl IndexSnapshot {
    /// An index with no chunks.
    pub fn empty(tier: TierLevel) -> Self {
        Self {
            tier,
            chunks: Vec::new(),
            norms: Vec::new(),
            vector_dim: None,
            built_at: None,
            source_generation: None,
        }
    }

    /// Validate `chunks` and build a snapshot around them.
    ///
    /// `vector_dim` is the dimension already established by the index, if
    /// any; otherwise the first chunk sets it.
    pub(crate) fn build(
        tier: TierLevel,
        chunks: Vec<Chunk>,
        vector_dim: Option<usize>,
        built_at: Option<DateTime<Utc>>,
        source_generation: Option<u64>,
    ) -> Result<Self> {
        let mut dim = vector_dim;
        let mut seen = HashSet::with_capacity(chunks.len());
        let mut norms = Vec::with_capacity(chunks.len());

        for chunk in &chunks {
            if chunk.embedding.is_empty() {
                return Err(IndexError::EmptyEmbedding(chunk.id.clone()));
            }
            let expected = *dim.get_or_insert(chunk.embedding.len());
            if chunk.embedding.len() != expected {
                return Err(IndexError::DimensionMismatch {
                    expected,
                    actual: chunk.embedding.len(),
                });
            }
            if !seen.insert(chunk.id.as_str()) {
                return Err(IndexError::DuplicateChunkId(chunk.id.clone()));
            }
            norms.push(magnitude(&chunk.embedding));
        }

        Ok(Self {
            tier,
            chunks,
            norms,
            vector_dim: dim,
            built_at,
            source_generation,
        })
    }

    pub fn tier(&self) -> TierLevel {
        self.tier
    }

    /// Chunks in insertion order.
    pub fn chunks(&self) -> &[Chunk] {
        &self.chunks
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn vector_dim(&self) -> Option<usize> {
        self.vector_dim
    }

    pub fn built_at(&self) -> Option<DateTime<Utc>> {
        self.built_at
    }

    /// Generation of the summary this index was built from (tiers 2 and 3),
    /// or of the summary it produced (tier 1).
    pub fn source_generation(&self) -> Option<u64> {
        self.source_generation
    }

    /// Number of distinct source files.
    pub fn file_count(&self) -> usize {
        self.chunks
            .iter()
            .flat_map(Chunk::source_files)
            .collect::<HashSet<_>>()
            .len()
    }

    /// Top `k` chunks by cosine similarity, best first. Equal scores keep
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        let dim = match self.vector_dim {
            Some(dim) if !self.chunks.is_empty() => dim,
            _ => return Err(IndexError::EmptyIndex),
        };
        if query.len() != dim {
            return Err(IndexError::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let query_norm = magnitude(query);
        let mut scored: Vec<(usize, f32)> = self
            .chunks
            .iter()
            .zip(&self.norms)
            .enumerate()
            .map(|(i, (chunk, norm))| {
                (i, cosine_with_norms(query, query_norm, &chunk.embedding, *norm))
            })
            .collect();

        // sort_by is stable, so ties stay in insertion order.
        scored.sort_by(|a, b| OrderedFloat(b.1).cmp(&OrderedFloat(a.1)));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .map(|(i, score)| ScoredChunk::from_chunk(&self.chunks[i], score))
            .collect())
    }

    /// Summary statistics.
    pub fn stats(&self) -> IndexStats {
        IndexStats {
            tier: self.tier,
            vector_count: self.len(),
            files_indexed: self.file_count(),
            vector_dim: self.vector_dim,
            built_at: self.built_at,
            source_generation: self.source_generation,
        }
    }
}

/// Statistics about an index snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexStats {
    pub tier: TierLevel,
    pub vector_count: usize,
    pub files_indexed: usize,
    pub vector_dim: Option<usize>,
    pub built_at: Option<DateTime<Utc>>,
    pub source_generation: Option<u64>,
}

/// Vector index for one tier.
///
/// Searches run against the snapshot current at call time. Mutations build a
/// replacement snapshot off to the side and publish it with one pointer swap.
pub struct VectorIndex {
    tier: TierLevel,
    current: RwLock<Arc<IndexSnapshot>>,
    /// Serializes writers so concurrent adds never lose each other's chunks.
    writer: Mutex<()>,
}

impl VectorIndex {
    /// Create an empty index.
    pub fn new(tier: TierLevel) -> Self {
        Self::from_snapshot(IndexSnapshot::empty(tier))
    }

    pub(crate) fn from_snapshot(snapshot: IndexSnapshot) -> Self {
        Self {
            tier: snapshot.tier,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        }
    }

    pub fn tier(&self) -> TierLevel {
        self.tier
    }

    /// The current snapshot. Holding it keeps that version alive even if the
    /// index is rebuilt meanwhile.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        let current = self.current.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&*current)
    }

    fn publish(&self, snapshot: IndexSnapshot) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(snapshot);
    }

    /// Append chunks. Either every chunk is added or none is.
    pub async fn add(&self, chunks: Vec<Chunk>) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let _guard = self.writer.lock().await;
        let old = self.snapshot();

        let existing: HashSet<&str> = old.chunks.iter().map(|c| c.id.as_str()).collect();
        if let Some(dup) = chunks.iter().find(|c| existing.contains(c.id.as_str())) {
            return Err(IndexError::DuplicateChunkId(dup.id.clone()));
        }

        let added = chunks.len();
        let mut combined = Vec::with_capacity(old.chunks.len() + added);
        combined.extend(old.chunks.iter().cloned());
        combined.extend(chunks);

        let next = IndexSnapshot::build(
            self.tier,
            combined,
            old.vector_dim,
            Some(Utc::now()),
            old.source_generation,
        )?;
        debug!(tier = %self.tier, added, total = next.len(), "appended chunks");
        self.publish(next);
        Ok(())
    }

    /// Replace all contents with `chunks`.
    ///
    /// In-flight searches finish against the old snapshot; the new one becomes
    /// visible only once fully built. On error the old contents stay.
    pub async fn rebuild_from(
        &self,
        chunks: Vec<Chunk>,
        source_generation: Option<u64>,
    ) -> Result<()> {
        let _guard = self.writer.lock().await;
        let next = IndexSnapshot::build(
            self.tier,
            chunks,
            None,
            Some(Utc::now()),
            source_generation,
        )?;
        info!(
            tier = %self.tier,
            vectors = next.len(),
            files = next.file_count(),
            source_generation,
            "rebuilt index"
        );
        self.publish(next);
        Ok(())
    }

    /// Replace the current snapshot wholesale (used after loading from disk).
    pub async fn replace(&self, snapshot: IndexSnapshot) -> Result<()> {
        if snapshot.tier != self.tier {
            return Err(IndexError::Corrupt {
                path: String::new(),
                reason: format!("snapshot is for tier {}, index is {}", snapshot.tier, self.tier),
            });
        }
        let _guard = self.writer.lock().await;
        self.publish(snapshot);
        Ok(())
    }

    /// Search the current snapshot.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<ScoredChunk>> {
        self.snapshot().search(query, k)
    }

    pub fn len(&self) -> usize {
        self.snapshot().len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshot().is_empty()
    }

    pub fn stats(&self) -> IndexStats {
        self.snapshot().stats()
    }
}
