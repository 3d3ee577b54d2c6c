//! Document text extraction.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use crate::error::ExtractionError;

/// Page separator recognised by [`PlainTextExtractor`] (ASCII form feed, as
/// emitted by `pdftotext`).
pub const PAGE_BREAK: char = '\u{000C}';

/// Text extracted from one document, page by page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedDocument {
    /// File name used for citations.
    pub source_file: String,

    /// Page texts; index 0 is page 1.
    pub pages: Vec<String>,
}

impl ExtractedDocument {
    pub fn new(source_file: impl Into<String>, pages: Vec<String>) -> Self {
        Self {
            source_file: source_file.into(),
            pages,
        }
    }

    /// Total characters across all pages.
    pub fn char_count(&self) -> usize {
        self.pages.iter().map(|p| p.chars().count()).sum()
    }

    /// Whether no page has any non-whitespace text.
    pub fn is_blank(&self) -> bool {
        self.pages.iter().all(|p| p.trim().is_empty())
    }
}

/// Turns a file into page texts.
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Extract all pages of `path`.
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError>;

    /// File extensions (lowercase, without dot) this extractor handles.
    fn extensions(&self) -> &[String];
}

/// Extractor for pre-converted UTF-8 text. Pages are separated by form feeds.
#[derive(Debug, Clone)]
pub struct PlainTextExtractor {
    extensions: Vec<String>,
}

impl PlainTextExtractor {
    pub fn new() -> Self {
        Self {
            extensions: vec!["txt".to_string(), "md".to_string()],
        }
    }

    pub fn with_extensions(mut self, extensions: Vec<String>) -> Self {
        self.extensions = extensions
            .into_iter()
            .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
            .collect();
        self
    }
}

impl Default for PlainTextExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Extractor for PlainTextExtractor {
    async fn extract(&self, path: &Path) -> Result<ExtractedDocument, ExtractionError> {
        let name = source_name(path);
        let bytes = fs::read(path)
            .await
            .map_err(|e| ExtractionError::new(&name, e.to_string()))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| ExtractionError::new(&name, format!("not valid UTF-8: {e}")))?;

        let pages: Vec<String> = text.split(PAGE_BREAK).map(str::to_string).collect();
        debug!(file = %name, pages = pages.len(), "extracted document");
        Ok(ExtractedDocument::new(name, pages))
    }

    fn extensions(&self) -> &[String] {
        &self.extensions
    }
}

/// File name used as `source_file` for citations.
pub fn source_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

/// List files in `dir` (non-recursive) with one of `extensions`, sorted by
/// name so runs are reproducible.
pub async fn discover_documents(dir: &Path, extensions: &[String]) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut entries = fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let matches = path
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .is_some_and(|ext| extensions.iter().any(|e| *e == ext));
        if matches {
            found.push(path);
        }
    }
    found.sort();
    Ok(found)
}
