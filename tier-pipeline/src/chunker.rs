//! Overlapping character-window chunker with page tracking.

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};

/// Configuration for the chunker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerConfig {
    /// Maximum chunk length in characters.
    pub chunk_size: usize,

    /// Characters shared between consecutive chunks.
    pub chunk_overlap: usize,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1200,
            chunk_overlap: 200,
        }
    }
}

impl ChunkerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(PipelineError::InvalidConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(PipelineError::InvalidConfig(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// A piece of text and the pages it spans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextSpan {
    pub text: String,
    pub page_start: u32,
    pub page_end: u32,
}

/// Splits text into overlapping windows, preferring to cut at whitespace.
#[derive(Debug, Clone)]
pub struct TextChunker {
    config: ChunkerConfig,
}

impl TextChunker {
    pub fn new(config: ChunkerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }

    /// Chunk a paged document. Page numbers are 1-based; a chunk crossing a
    /// page break reports both ends.
    pub fn chunk_pages(&self, pages: &[String]) -> Vec<TextSpan> {
        let mut chars = Vec::new();
        let mut page_starts = Vec::with_capacity(pages.len());
        for (i, page) in pages.iter().enumerate() {
            if i > 0 {
                chars.push('\n');
            }
            page_starts.push(chars.len());
            chars.extend(page.chars());
        }

        let page_of = |pos: usize| page_starts.partition_point(|&s| s <= pos).max(1) as u32;

        self.windows(&chars)
            .into_iter()
            .map(|(start, end)| TextSpan {
                text: chars[start..end].iter().collect(),
                page_start: page_of(start),
                page_end: page_of(end - 1),
            })
            .collect()
    }

    /// Chunk text whose page range is already known; every chunk inherits it.
    pub fn chunk_section(&self, text: &str, page_start: u32, page_end: u32) -> Vec<TextSpan> {
        let chars: Vec<char> = text.chars().collect();
        self.windows(&chars)
            .into_iter()
            .map(|(start, end)| TextSpan {
                text: chars[start..end].iter().collect(),
                page_start,
                page_end,
            })
            .collect()
    }

    /// Non-empty, whitespace-trimmed `[start, end)` windows over `chars`.
    fn windows(&self, chars: &[char]) -> Vec<(usize, usize)> {
        let size = self.config.chunk_size;
        let overlap = self.config.chunk_overlap;
        let n = chars.len();
        let mut out = Vec::new();
        let mut start = 0;

        while start < n {
            while start < n && chars[start].is_whitespace() {
                start += 1;
            }
            if start >= n {
                break;
            }

            let mut end = (start + size).min(n);
            if end < n {
                let floor = start + size / 2;
                if let Some(ws) = (floor.max(start + 1)..end)
                    .rev()
                    .find(|&i| chars[i].is_whitespace())
                {
                    end = ws;
                }
            }

            let mut text_end = end;
            while text_end > start && chars[text_end - 1].is_whitespace() {
                text_end -= 1;
            }
            out.push((start, text_end));

            if end >= n {
                break;
            }

            let mut next = end.saturating_sub(overlap);
            if next <= start {
                next = end;
            }
            // Start the overlap on a word boundary.
            while next < end && next > 0 && !chars[next - 1].is_whitespace() {
                next += 1;
            }
            start = next;
        }

        out
    }
}
