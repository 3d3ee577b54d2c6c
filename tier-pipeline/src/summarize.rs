//! Ratio-targeted summarization over provenance-tagged sections.
//!
//! Input sections are concatenated in order into completion-sized units
//! (merged across files up to the input limit, oversized ones split). The
//! length target is set for the whole pass, `ratio * input_length`, and
//! shared out across units by their length. Each output keeps the files and
//! page range of its unit so downstream tiers can still cite them.

use std::sync::Arc;

use futures::StreamExt;
use futures::stream;
use serde::{Deserialize, Serialize};
use strata_vector_index::{SOURCE_SEPARATOR, source_files};
use tracing::{debug, warn};

use crate::chunker::{ChunkerConfig, TextChunker};
use crate::completion::Completion;
use crate::error::{PipelineError, Result, Stage};

/// Text with the file(s) and page range it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummarySection {
    pub source_file: String,
    pub page_start: u32,
    pub page_end: u32,
    pub text: String,
}

impl SummarySection {
    pub fn new(
        source_file: impl Into<String>,
        pages: (u32, u32),
        text: impl Into<String>,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            page_start: pages.0,
            page_end: pages.1,
            text: text.into(),
        }
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    pub fn source_files(&self) -> impl Iterator<Item = &str> {
        source_files(&self.source_file)
    }

    /// Append `other`, widening the provenance to cover it.
    fn absorb(&mut self, other: &SummarySection) {
        self.text.push_str("\n\n");
        self.text.push_str(&other.text);
        self.page_start = self.page_start.min(other.page_start);
        self.page_end = self.page_end.max(other.page_end);
        for file in source_files(&other.source_file) {
            if !source_files(&self.source_file).any(|known| known == file) {
                self.source_file.push_str(SOURCE_SEPARATOR);
                self.source_file.push_str(file);
            }
        }
    }

    fn failed(&self, reason: String) -> SectionFailure {
        SectionFailure {
            source_file: self.source_file.clone(),
            page_start: self.page_start,
            page_end: self.page_end,
            reason,
        }
    }
}

/// Configuration for the summarizer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerConfig {
    /// Accepted relative deviation from the target length.
    pub tolerance: f64,

    /// A pass never aims below this many characters in total.
    pub min_target_chars: usize,

    /// Characters per token used to size `max_output_tokens`.
    pub chars_per_token: usize,

    /// Completion calls in flight at once.
    pub concurrency: usize,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            tolerance: 0.2,
            min_target_chars: 20,
            chars_per_token: 4,
            concurrency: 4,
        }
    }
}

/// A unit of work the completion service could not summarize.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectionFailure {
    pub source_file: String,
    pub page_start: u32,
    pub page_end: u32,
    pub reason: String,
}

/// Result of one summarization pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryOutcome {
    pub sections: Vec<SummarySection>,
    /// Characters of input.
    pub input_length: usize,
    /// Characters of output.
    pub output_length: usize,
    /// `ratio * input_length`, raised to `min_target_chars` when the input
    /// allows it.
    pub target_length: usize,
    /// Whether `output_length` is within tolerance of `target_length`.
    pub within_tolerance: bool,
    pub failures: Vec<SectionFailure>,
}

impl SummaryOutcome {
    pub fn compression_ratio(&self) -> f64 {
        if self.input_length == 0 {
            0.0
        } else {
            self.output_length as f64 / self.input_length as f64
        }
    }
}

/// Compresses sections via the completion collaborator.
pub struct Summarizer {
    completion: Arc<dyn Completion>,
    config: SummarizerConfig,
}

impl Summarizer {
    pub fn new(completion: Arc<dyn Completion>, config: SummarizerConfig) -> Self {
        Self { completion, config }
    }

    /// Summarize `sections` toward `ratio` of their length.
    ///
    /// Units that fail are reported in `failures` and left out; if every unit
    /// fails the error of the first one is returned.
    pub async fn summarize(
        &self,
        sections: &[SummarySection],
        ratio: f64,
    ) -> Result<SummaryOutcome> {
        if !(ratio > 0.0 && ratio <= 1.0) {
            return Err(PipelineError::InvalidConfig(format!(
                "compression ratio {ratio} outside (0, 1]"
            )));
        }

        let limit = self.completion.input_limit_chars();
        let units = plan_units(sections, limit)?;
        let input_length: usize = units.iter().map(SummarySection::char_len).sum();
        let target_length = pass_target(input_length, ratio, self.config.min_target_chars);
        let targets = share_target(&units, input_length, target_length);
        debug!(units = units.len(), input_length, target_length, ratio, "summarizing");

        let concurrency = self.config.concurrency.max(1);
        let completion = Arc::clone(&self.completion);
        let config = self.config.clone();
        let results: Vec<std::result::Result<SummarySection, SectionFailure>> =
            stream::iter(units.into_iter().zip(targets).map(move |(unit, target)| {
                let completion = Arc::clone(&completion);
                let config = config.clone();
                async move { summarize_unit(completion.as_ref(), &config, unit, target).await }
            }))
            .buffered(concurrency)
            .collect()
            .await;

        let mut outcome = SummaryOutcome {
            sections: Vec::new(),
            input_length,
            output_length: 0,
            target_length,
            within_tolerance: true,
            failures: Vec::new(),
        };
        for result in results {
            match result {
                Ok(section) => {
                    outcome.output_length += section.char_len();
                    outcome.sections.push(section);
                }
                Err(failure) => outcome.failures.push(failure),
            }
        }

        if outcome.sections.is_empty()
            && let Some(first) = outcome.failures.first()
        {
            return Err(PipelineError::upstream(Stage::Completion, &first.reason));
        }

        let target = target_length as f64;
        let output = outcome.output_length as f64;
        outcome.within_tolerance = output >= target * (1.0 - self.config.tolerance)
            && output <= target * (1.0 + self.config.tolerance);
        Ok(outcome)
    }
}

/// Characters the whole pass aims for.
fn pass_target(input_length: usize, ratio: f64, floor: usize) -> usize {
    ((input_length as f64 * ratio).round() as usize)
        .max(floor)
        .min(input_length)
}

/// Split `total` across `units` in proportion to their length.
fn share_target(units: &[SummarySection], input_length: usize, total: usize) -> Vec<usize> {
    if input_length == 0 {
        return vec![0; units.len()];
    }
    let scale = total as f64 / input_length as f64;
    units
        .iter()
        .map(|unit| ((unit.char_len() as f64 * scale).round() as usize).max(1))
        .collect()
}

async fn summarize_unit(
    completion: &dyn Completion,
    config: &SummarizerConfig,
    unit: SummarySection,
    target: usize,
) -> std::result::Result<SummarySection, SectionFailure> {
    if target >= unit.char_len() {
        // Already at or below its share; nothing to compress.
        return Ok(unit);
    }

    let upper = (target as f64 * (1.0 + config.tolerance)).floor() as usize;
    let lower = (target as f64 * (1.0 - config.tolerance)).ceil() as usize;
    let max_tokens = (upper / config.chars_per_token.max(1)) as u32 + 32;
    let prompt = summary_prompt(&unit, target);

    let raw = match completion.complete(&prompt, max_tokens).await {
        Ok(text) => text,
        Err(err) => {
            warn!(
                file = %unit.source_file,
                pages = %format!("{}-{}", unit.page_start, unit.page_end),
                "summary unit failed: {err}"
            );
            return Err(unit.failed(err.to_string()));
        }
    };

    let text = raw.trim();
    if text.is_empty() {
        return Err(unit.failed("completion returned empty text".to_string()));
    }
    let text = if text.chars().count() > upper {
        trim_to_band(text, lower.max(1), upper.max(1))
    } else {
        text.to_string()
    };

    Ok(SummarySection { text, ..unit })
}

fn summary_prompt(unit: &SummarySection, target_chars: usize) -> String {
    let words = (target_chars / 6).max(1);
    format!(
        "Summarize the following excerpt of {file} (pages {start}-{end}) in about \
         {words} words ({target_chars} characters). Keep key facts, figures, names, \
         obligations and section numbers. Write plain prose without headings.\n\n\
         ---\n{text}\n---",
        file = unit.source_file,
        start = unit.page_start,
        end = unit.page_end,
        text = unit.text,
    )
}

/// Concatenate sections, in order, into units of at most `limit`
/// characters. Neighbouring sections share a unit whenever it fits, even
/// across files; longer sections are split at whitespace and keep their
/// page range.
pub fn plan_units(sections: &[SummarySection], limit: usize) -> Result<Vec<SummarySection>> {
    let splitter = TextChunker::new(ChunkerConfig {
        chunk_size: limit.max(1),
        chunk_overlap: 0,
    })?;

    let mut pieces: Vec<SummarySection> = Vec::new();
    for section in sections {
        let text = section.text.trim();
        if text.is_empty() {
            continue;
        }
        if text.chars().count() > limit {
            pieces.extend(
                splitter
                    .chunk_section(text, section.page_start, section.page_end)
                    .into_iter()
                    .map(|span| SummarySection {
                        source_file: section.source_file.clone(),
                        page_start: span.page_start,
                        page_end: span.page_end,
                        text: span.text,
                    }),
            );
        } else {
            pieces.push(SummarySection::new(
                section.source_file.clone(),
                (section.page_start, section.page_end),
                text,
            ));
        }
    }

    let mut units: Vec<SummarySection> = Vec::new();
    for piece in pieces {
        match units.last_mut() {
            Some(last) if last.char_len() + 2 + piece.char_len() <= limit => {
                last.absorb(&piece);
            }
            _ => units.push(piece),
        }
    }
    Ok(units)
}

/// Cut `text` to at most `upper` characters, ending at the last sentence
/// boundary at or after `lower` when there is one, else at a word boundary.
pub fn trim_to_band(text: &str, lower: usize, upper: usize) -> String {
    let chars: Vec<char> = text.chars().collect();
    if chars.len() <= upper {
        return text.to_string();
    }
    let prefix = &chars[..upper];

    let sentence_end = (lower.max(1)..=upper).rev().find(|&end| {
        matches!(prefix[end - 1], '.' | '!' | '?')
            && chars.get(end).is_none_or(|c| c.is_whitespace())
    });
    if let Some(end) = sentence_end {
        return prefix[..end].iter().collect();
    }

    let cut = prefix
        .iter()
        .rposition(|c| c.is_whitespace())
        .filter(|&i| i > 0)
        .unwrap_or(upper);
    prefix[..cut].iter().collect::<String>().trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompletionError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    /// Returns the first `n` characters of the excerpt, where `n` is the
    /// requested character count times `stretch`.
    struct LengthCompletion {
        stretch: f64,
        fail_on: Option<&'static str>,
        limit: usize,
    }

    #[async_trait]
    impl Completion for LengthCompletion {
        fn model(&self) -> &str {
            "length"
        }

        fn input_limit_chars(&self) -> usize {
            self.limit
        }

        async fn complete(
            &self,
            prompt: &str,
            _max_output_tokens: u32,
        ) -> std::result::Result<String, CompletionError> {
            if let Some(marker) = self.fail_on
                && prompt.contains(marker)
            {
                return Err(CompletionError::ApiRequest {
                    status: 500,
                    message: "boom".to_string(),
                });
            }
            let target: usize = prompt
                .split(" characters)")
                .next()
                .and_then(|head| head.rsplit('(').next())
                .and_then(|n| n.parse().ok())
                .unwrap_or(10);
            let n = (target as f64 * self.stretch) as usize;
            Ok("Lorem ipsum dolor sit amet. ".repeat(n / 28 + 1).chars().take(n).collect())
        }
    }

    fn summarizer(stretch: f64, fail_on: Option<&'static str>) -> Summarizer {
        Summarizer::new(
            Arc::new(LengthCompletion {
                stretch,
                fail_on,
                limit: 5_000,
            }),
            SummarizerConfig {
                min_target_chars: 20,
                ..SummarizerConfig::default()
            },
        )
    }

    fn section(file: &str, page: u32, len: usize) -> SummarySection {
        SummarySection::new(file, (page, page), "word ".repeat(len / 5))
    }

    #[tokio::test]
    async fn test_output_near_target_ratio() {
        let sections = vec![section("a.txt", 1, 2_000), section("a.txt", 2, 2_000)];
        let outcome = summarizer(1.0, None)
            .summarize(&sections, 0.1)
            .await
            .unwrap();

        assert_eq!(outcome.sections.len(), 1);
        assert_eq!(
            (outcome.sections[0].page_start, outcome.sections[0].page_end),
            (1, 2)
        );
        assert!(outcome.within_tolerance);
        let ratio = outcome.compression_ratio();
        assert!((0.08..=0.12).contains(&ratio), "ratio {ratio}");
    }

    #[tokio::test]
    async fn test_long_output_is_trimmed_into_band() {
        let sections = vec![section("a.txt", 1, 4_000)];
        let outcome = summarizer(3.0, None)
            .summarize(&sections, 0.1)
            .await
            .unwrap();

        let target = outcome.target_length as f64;
        let out = outcome.output_length as f64;
        assert!(out <= target * 1.2, "{out} > {target} * 1.2");
        assert!(out >= target * 0.8, "{out} < {target} * 0.8");
        assert!(outcome.sections[0].text.ends_with('.'));
    }

    #[tokio::test]
    async fn test_short_output_is_flagged() {
        let sections = vec![section("a.txt", 1, 4_000)];
        let outcome = summarizer(0.3, None)
            .summarize(&sections, 0.1)
            .await
            .unwrap();
        assert!(!outcome.within_tolerance);
    }

    #[tokio::test]
    async fn test_failed_unit_is_skipped_and_reported() {
        // Too long to share a 5,000 character unit.
        let mut sections = vec![section("a.txt", 1, 3_000), section("b.txt", 1, 3_000)];
        sections[1].text = format!("POISON {}", sections[1].text);

        let outcome = summarizer(1.0, Some("POISON"))
            .summarize(&sections, 0.1)
            .await
            .unwrap();

        assert_eq!(outcome.sections.len(), 1);
        assert_eq!(outcome.sections[0].source_file, "a.txt");
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].source_file, "b.txt");
    }

    #[tokio::test]
    async fn test_all_units_failing_is_upstream_error() {
        let sections = vec![section("a.txt", 1, 1_000)];
        let err = summarizer(1.0, Some("a.txt"))
            .summarize(&sections, 0.1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::UpstreamService {
                stage: Stage::Completion,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_invalid_ratio_rejected() {
        let sections = vec![section("a.txt", 1, 100)];
        for ratio in [0.0, -0.5, 1.5, f64::NAN] {
            assert!(
                summarizer(1.0, None)
                    .summarize(&sections, ratio)
                    .await
                    .is_err()
            );
        }
    }

    #[tokio::test]
    async fn test_ratio_holds_across_many_small_sections() {
        // Forty short pages over four files; no single page is worth a call
        // of its own, so the pass must still land near the ratio overall.
        let sections: Vec<SummarySection> = (0..40)
            .map(|i| section(&format!("doc{}.txt", i % 4), i / 4 + 1, 100))
            .collect();
        let outcome = summarizer(1.0, None)
            .summarize(&sections, 0.1)
            .await
            .unwrap();

        assert_eq!(outcome.sections.len(), 1);
        assert_eq!(
            outcome.sections[0].source_files().collect::<Vec<_>>(),
            vec!["doc0.txt", "doc1.txt", "doc2.txt", "doc3.txt"]
        );
        let ratio = outcome.compression_ratio();
        assert!((0.08..=0.12).contains(&ratio), "ratio {ratio}");
        assert!(outcome.within_tolerance);
    }

    #[test]
    fn test_pass_target_floor_applies_to_total() {
        assert_eq!(pass_target(10_000, 0.1, 20), 1_000);
        assert_eq!(pass_target(100, 0.1, 20), 20);
        assert_eq!(pass_target(10, 0.1, 20), 10);

        let units = vec![section("a.txt", 1, 3_000), section("b.txt", 1, 1_000)];
        let input: usize = units.iter().map(SummarySection::char_len).sum();
        let shares = share_target(&units, input, 400);
        assert_eq!(shares, vec![300, 100]);
    }

    #[test]
    fn test_plan_units_merges_neighbours_and_splits_large() {
        let sections = vec![
            section("a.txt", 1, 100),
            section("a.txt", 2, 100),
            section("b.txt", 1, 100),
            section("c.txt", 4, 700),
        ];
        let units = plan_units(&sections, 300).unwrap();

        let summary: Vec<(&str, u32, u32)> = units
            .iter()
            .map(|u| (u.source_file.as_str(), u.page_start, u.page_end))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("a.txt", 1, 2),
                ("b.txt", 1, 1),
                ("c.txt", 4, 4),
                ("c.txt", 4, 4),
                ("c.txt", 4, 4),
            ]
        );
        assert!(units.iter().all(|u| u.char_len() <= 300));

        let across = [section("a.txt", 3, 100), section("b.txt", 1, 100)];
        let units = plan_units(&across, 300).unwrap();
        assert_eq!(units.len(), 1);
        assert_eq!(units[0].source_file, "a.txt; b.txt");
        assert_eq!((units[0].page_start, units[0].page_end), (1, 3));
    }

    #[test]
    fn test_trim_to_band_prefers_sentence_end() {
        let text = "One two three. Four five six. Seven eight nine ten eleven.";
        assert_eq!(trim_to_band(text, 10, 32), "One two three. Four five six.");
        // No sentence end inside the band falls back to a word boundary.
        assert_eq!(trim_to_band(text, 30, 40), "One two three. Four five six. Seven");
        assert_eq!(trim_to_band("short", 1, 10), "short");
    }
}
