//! On-disk index format.
//!
//! An index directory holds two files:
//!
//! - `vectors.bin`: `b"STRV"`, `u32` format version, `u32` dimension, `u64`
//!   vector count, then `count * dim` little-endian `f32` values.
//! - `meta.json`: tier, dimension, build time, source generation, the
//!   SHA-256 of `vectors.bin` (hex) and the chunk metadata in insertion order.
//!
//! Vectors are stored bit-exact so reloading never re-embeds. Each file is
//! written to a temp path and renamed; `meta.json` goes last and its digest
//! ties it to the matching `vectors.bin`.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::{debug, info};

use crate::chunk::Chunk;
use crate::error::{IndexError, Result};
use crate::index::{IndexSnapshot, VectorIndex};
use crate::tier::TierLevel;

const MAGIC: &[u8; 4] = b"STRV";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// File name of the vector payload.
pub const VECTORS_FILE: &str = "vectors.bin";
/// File name of the chunk metadata manifest.
pub const META_FILE: &str = "meta.json";

#[derive(Debug, Serialize, Deserialize)]
struct IndexMeta {
    tier: TierLevel,
    vector_dim: Option<usize>,
    built_at: Option<DateTime<Utc>>,
    source_generation: Option<u64>,
    vectors_sha256: String,
    chunks: Vec<ChunkMeta>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChunkMeta {
    id: String,
    source_file: String,
    page_start: u32,
    page_end: u32,
    text: String,
}

/// Whether `dir` contains a saved index.
pub fn index_exists(dir: &Path) -> bool {
    dir.join(META_FILE).is_file() && dir.join(VECTORS_FILE).is_file()
}

impl IndexSnapshot {
    /// Write this snapshot into `dir`, creating it if needed.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        fs::create_dir_all(dir).await?;

        let vectors = encode_vectors(self);
        let meta = IndexMeta {
            tier: self.tier(),
            vector_dim: self.vector_dim(),
            built_at: self.built_at(),
            source_generation: self.source_generation(),
            vectors_sha256: sha256_hex(&vectors),
            chunks: self
                .chunks()
                .iter()
                .map(|c| ChunkMeta {
                    id: c.id.clone(),
                    source_file: c.source_file.clone(),
                    page_start: c.page_start,
                    page_end: c.page_end,
                    text: c.text.clone(),
                })
                .collect(),
        };
        let meta_json = serde_json::to_vec_pretty(&meta)?;

        write_atomic(&dir.join(VECTORS_FILE), &vectors).await?;
        write_atomic(&dir.join(META_FILE), &meta_json).await?;

        info!(
            tier = %self.tier(),
            vectors = self.len(),
            path = %dir.display(),
            "saved index"
        );
        Ok(())
    }

    /// Read a snapshot previously written by [`IndexSnapshot::save`].
    pub async fn load(dir: &Path) -> Result<Self> {
        let meta_path = dir.join(META_FILE);
        let vectors_path = dir.join(VECTORS_FILE);

        let meta: IndexMeta = serde_json::from_slice(&fs::read(&meta_path).await?)?;
        let bytes = fs::read(&vectors_path).await?;

        let corrupt = |reason: String| IndexError::Corrupt {
            path: dir.display().to_string(),
            reason,
        };

        if sha256_hex(&bytes) != meta.vectors_sha256 {
            return Err(corrupt("vectors.bin does not match meta.json".to_string()));
        }
        let (dim, vectors) = decode_vectors(&bytes).map_err(corrupt)?;
        if vectors.len() != meta.chunks.len() {
            return Err(corrupt(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                meta.chunks.len()
            )));
        }
        if !meta.chunks.is_empty() && meta.vector_dim != Some(dim) {
            return Err(corrupt(format!(
                "meta dimension {:?} differs from stored {dim}",
                meta.vector_dim
            )));
        }

        let chunks = meta
            .chunks
            .into_iter()
            .zip(vectors)
            .map(|(m, embedding)| Chunk {
                id: m.id,
                source_file: m.source_file,
                page_start: m.page_start,
                page_end: m.page_end,
                text: m.text,
                embedding,
            })
            .collect();

        let snapshot = IndexSnapshot::build(
            meta.tier,
            chunks,
            meta.vector_dim,
            meta.built_at,
            meta.source_generation,
        )
        .map_err(|e| corrupt(e.to_string()))?;

        debug!(
            tier = %snapshot.tier(),
            vectors = snapshot.len(),
            path = %dir.display(),
            "loaded index"
        );
        Ok(snapshot)
    }
}

impl VectorIndex {
    /// Persist the current snapshot into `dir`.
    pub async fn save(&self, dir: &Path) -> Result<()> {
        self.snapshot().save(dir).await
    }

    /// Load a saved index.
    pub async fn load(dir: &Path) -> Result<Self> {
        Ok(Self::from_snapshot(IndexSnapshot::load(dir).await?))
    }

    /// Load the index saved in `dir`, or start empty if there is none.
    pub async fn open(tier: TierLevel, dir: &Path) -> Result<Self> {
        if !index_exists(dir) {
            debug!(tier = %tier, path = %dir.display(), "no saved index, starting empty");
            return Ok(Self::new(tier));
        }
        let snapshot = IndexSnapshot::load(dir).await?;
        if snapshot.tier() != tier {
            return Err(IndexError::Corrupt {
                path: dir.display().to_string(),
                reason: format!("saved index is for tier {}, expected {tier}", snapshot.tier()),
            });
        }
        Ok(Self::from_snapshot(snapshot))
    }
}

fn encode_vectors(snapshot: &IndexSnapshot) -> Vec<u8> {
    let dim = snapshot.vector_dim().unwrap_or(0);
    let count = snapshot.len();
    let mut buf = Vec::with_capacity(HEADER_LEN + count * dim * 4);
    buf.extend_from_slice(MAGIC);
    buf.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&(dim as u32).to_le_bytes());
    buf.extend_from_slice(&(count as u64).to_le_bytes());
    for chunk in snapshot.chunks() {
        for value in &chunk.embedding {
            buf.extend_from_slice(&value.to_le_bytes());
        }
    }
    buf
}

fn decode_vectors(bytes: &[u8]) -> std::result::Result<(usize, Vec<Vec<f32>>), String> {
    if bytes.len() < HEADER_LEN {
        return Err(format!("vectors.bin too short: {} bytes", bytes.len()));
    }
    let (header, body) = bytes.split_at(HEADER_LEN);
    if &header[0..4] != MAGIC {
        return Err("bad magic in vectors.bin".to_string());
    }
    let version = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    if version != FORMAT_VERSION {
        return Err(format!("unsupported vectors.bin version {version}"));
    }
    let dim = u32::from_le_bytes([header[8], header[9], header[10], header[11]]) as usize;
    let mut count_bytes = [0u8; 8];
    count_bytes.copy_from_slice(&header[12..20]);
    let count = u64::from_le_bytes(count_bytes) as usize;

    let expected = count
        .checked_mul(dim)
        .and_then(|n| n.checked_mul(4))
        .ok_or_else(|| "vector payload size overflows".to_string())?;
    if body.len() != expected {
        return Err(format!(
            "expected {expected} payload bytes for {count}x{dim}, found {}",
            body.len()
        ));
    }
    if dim == 0 {
        return Ok((0, vec![Vec::new(); count]));
    }

    let vectors = body
        .chunks_exact(dim * 4)
        .map(|row| {
            row.chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect()
        })
        .collect();
    Ok((dim, vectors))
}

/// Write `contents` to `path` via a sibling temp file and rename.
pub(crate) async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = temp_path_for(path);
    fs::write(&temp_path, contents).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(std::ffi::OsStr::to_os_string)
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    format!("{digest:x}")
}
