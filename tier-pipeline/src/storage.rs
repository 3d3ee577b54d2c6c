//! Generation-versioned summary artifacts.
//!
//! Each tier's summary lives under `<root>/L{n}/`:
//!
//! ```text
//! current.json          manifest naming the live generation
//! summary_g{N}.json     sections of generation N
//! summary_L{n}.txt      plain-text rendering of the live generation
//! ```
//!
//! A write lands the new generation file first and swaps `current.json`
//! last, so readers that go through the manifest never see a partial summary.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strata_vector_index::TierLevel;
use tokio::fs;
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::summarize::SummarySection;

const MANIFEST_FILE: &str = "current.json";

/// Points at the live generation of a tier's summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryManifest {
    pub tier: TierLevel,
    pub generation: u64,
    /// File name of the generation's sections, relative to the tier dir.
    pub file: String,
    /// Characters across all sections.
    pub total_length: usize,
    pub section_count: usize,
    pub written_at: DateTime<Utc>,
}

/// A tier's summary at one generation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryArtifact {
    pub tier: TierLevel,
    pub generation: u64,
    pub sections: Vec<SummarySection>,
}

impl SummaryArtifact {
    /// Sections joined by blank lines.
    pub fn text(&self) -> String {
        self.sections
            .iter()
            .map(|s| s.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    pub fn total_length(&self) -> usize {
        self.sections.iter().map(SummarySection::char_len).sum()
    }
}

/// On-disk store of summary generations for all tiers.
#[derive(Debug, Clone)]
pub struct SummaryStore {
    root: PathBuf,
    keep_generations: u64,
}

impl SummaryStore {
    /// Create a store rooted at `root`. Directories are created on write.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            keep_generations: 2,
        }
    }

    /// Number of generations kept per tier (at least 1).
    pub fn with_keep_generations(mut self, keep: u64) -> Self {
        self.keep_generations = keep.max(1);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn tier_dir(&self, tier: TierLevel) -> PathBuf {
        self.root.join(tier.to_string())
    }

    /// Path of the plain-text rendering for `tier`.
    pub fn text_path(&self, tier: TierLevel) -> PathBuf {
        self.tier_dir(tier).join(format!("summary_L{}.txt", tier.number()))
    }

    /// The live manifest, if the tier has ever written a summary.
    pub async fn current(&self, tier: TierLevel) -> Result<Option<SummaryManifest>> {
        let path = self.tier_dir(tier).join(MANIFEST_FILE);
        match fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Generation of the live summary, if any.
    pub async fn current_generation(&self, tier: TierLevel) -> Result<Option<u64>> {
        Ok(self.current(tier).await?.map(|m| m.generation))
    }

    /// Read the live summary.
    pub async fn read_current(&self, tier: TierLevel) -> Result<Option<SummaryArtifact>> {
        let Some(manifest) = self.current(tier).await? else {
            return Ok(None);
        };
        let bytes = fs::read(self.tier_dir(tier).join(&manifest.file)).await?;
        let artifact: SummaryArtifact = serde_json::from_slice(&bytes)?;
        debug!(
            tier = %tier,
            generation = artifact.generation,
            sections = artifact.sections.len(),
            "read summary"
        );
        Ok(Some(artifact))
    }

    /// Write `sections` as the next generation and make it live.
    pub async fn write(
        &self,
        tier: TierLevel,
        sections: Vec<SummarySection>,
    ) -> Result<SummaryManifest> {
        let dir = self.tier_dir(tier);
        fs::create_dir_all(&dir).await?;

        let generation = self.current_generation(tier).await?.unwrap_or(0) + 1;
        let file = format!("summary_g{generation}.json");
        let artifact = SummaryArtifact {
            tier,
            generation,
            sections,
        };

        write_atomic(&dir.join(&file), &serde_json::to_vec_pretty(&artifact)?).await?;
        write_atomic(&self.text_path(tier), artifact.text().as_bytes()).await?;

        let manifest = SummaryManifest {
            tier,
            generation,
            file,
            total_length: artifact.total_length(),
            section_count: artifact.sections.len(),
            written_at: Utc::now(),
        };
        write_atomic(
            &dir.join(MANIFEST_FILE),
            &serde_json::to_vec_pretty(&manifest)?,
        )
        .await?;

        info!(
            tier = %tier,
            generation,
            length = manifest.total_length,
            "summary written"
        );
        self.prune(tier, generation).await;
        Ok(manifest)
    }

    /// Remove generations older than the retention window. Best effort.
    async fn prune(&self, tier: TierLevel, live: u64) {
        let Some(oldest_kept) = live.checked_sub(self.keep_generations - 1) else {
            return;
        };
        let dir = self.tier_dir(tier);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(tier = %tier, "failed to list summaries for pruning: {e}");
                return;
            }
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let name = entry.file_name().to_string_lossy().into_owned();
            let generation = name
                .strip_prefix("summary_g")
                .and_then(|rest| rest.strip_suffix(".json"))
                .and_then(|n| n.parse::<u64>().ok());
            if let Some(g) = generation
                && g < oldest_kept
                && let Err(e) = fs::remove_file(entry.path()).await
            {
                warn!(tier = %tier, file = %name, "failed to prune summary: {e}");
            }
        }
    }
}

async fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    fs::write(&temp_path, contents).await?;
    fs::rename(&temp_path, path).await?;
    Ok(())
}
