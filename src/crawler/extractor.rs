//! Multi-stage text extraction with quality grading
//!
//! # Pipeline
//!
//! 1. Boilerplate-aware extraction: drop navigation chrome, prefer the
//!    article/main region, collect block-level text
//! 2. If that yields fewer than [`MIN_EXTRACTED_CHARS`], paragraph density:
//!    the container holding the most direct `<p>` text wins; the longer of the
//!    two results is kept
//! 3. If still short, naive tag stripping; the longest of all three is kept
//!
//! Extraction is deterministic: the same input always produces the same text
//! and metrics.

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

/// Below this many characters the next extraction stage is tried
pub const MIN_EXTRACTED_CHARS: usize = 200;

/// Elements whose text never counts as content
const EXCLUDED_TAGS: &[&str] = &[
    "nav", "header", "footer", "aside", "script", "style", "noscript", "form", "template", "svg",
    "iframe", "button",
];

/// Elements collected as content blocks by the primary extractor
const BLOCK_TAGS: &[&str] = &[
    "p", "h1", "h2", "h3", "h4", "h5", "h6", "li", "blockquote", "pre", "td", "dd", "dt",
    "figcaption",
];

fn boilerplate_line() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)copyright|©|all rights reserved|privacy policy|terms of (use|service)|cookie|subscribe|newsletter|share (this|on)|follow us|advertisement|skip to (main )?content|sign in|log in|related (articles|posts)",
        )
        .expect("static regex compiles")
    })
}

fn invisible_blocks() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b.*?</script>|<style\b.*?</style>|<noscript\b.*?</noscript>|<!--.*?-->")
            .expect("static regex compiles")
    })
}

fn any_tag() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)<[^>]*>").expect("static regex compiles"))
}

/// Which stage produced the extracted text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractorKind {
    Boilerplate,
    ParagraphDensity,
    TagStrip,
}

impl ExtractorKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Boilerplate => "boilerplate",
            Self::ParagraphDensity => "paragraph_density",
            Self::TagStrip => "tag_strip",
        }
    }
}

impl fmt::Display for ExtractorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Quality grade of extracted text
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityGrade {
    Empty,
    Low,
    Medium,
    High,
}

impl QualityGrade {
    /// Grades an effective content length (`extracted_length * (1 - boilerplate_ratio)`)
    pub fn from_effective_length(effective: f64) -> Self {
        if effective >= 3000.0 {
            Self::High
        } else if effective >= 500.0 {
            Self::Medium
        } else if effective > 0.0 {
            Self::Low
        } else {
            Self::Empty
        }
    }

    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for QualityGrade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Extraction quality metrics attached to every fetch result with content
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractionMetrics {
    /// Raw content length in characters
    pub raw_length: usize,
    /// Extracted text length in characters
    pub extracted_length: usize,
    pub extraction_ratio: f64,
    /// Fraction of non-empty output lines matching boilerplate patterns
    pub boilerplate_ratio: f64,
    /// Raw content reached the fetch size cap
    pub was_truncated: bool,
    pub quality_grade: QualityGrade,
    pub extractor_used: Option<ExtractorKind>,
}

/// Text, title and metrics extracted from one page
#[derive(Debug, Clone, Serialize)]
pub struct ExtractedPage {
    pub text: String,
    pub title: Option<String>,
    pub metrics: ExtractionMetrics,
}

/// Content extractor; stateless and cheap to share
#[derive(Debug, Clone, Default)]
pub struct ContentExtractor;

impl ContentExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extracts readable text from raw HTML (or plain text)
    pub fn extract(&self, raw: &str) -> (String, ExtractorKind) {
        let primary = extract_boilerplate_aware(raw);
        if char_len(&primary) >= MIN_EXTRACTED_CHARS {
            return (primary, ExtractorKind::Boilerplate);
        }

        let secondary = extract_paragraph_density(raw);
        let (best, kind) = if char_len(&secondary) > char_len(&primary) {
            (secondary, ExtractorKind::ParagraphDensity)
        } else {
            (primary, ExtractorKind::Boilerplate)
        };
        if char_len(&best) >= MIN_EXTRACTED_CHARS {
            return (best, kind);
        }

        let tertiary = strip_tags(raw);
        if char_len(&tertiary) > char_len(&best) {
            tracing::trace!("Tag stripping produced the longest text");
            (tertiary, ExtractorKind::TagStrip)
        } else {
            (best, kind)
        }
    }

    /// Computes metrics for extracted text
    ///
    /// # Arguments
    ///
    /// * `raw` - Content as fetched
    /// * `text` - Extracted text after any truncation
    /// * `max_chars` - Fetch size cap the raw content was subject to
    pub fn compute_metrics(&self, raw: &str, text: &str, max_chars: usize) -> ExtractionMetrics {
        let raw_length = char_len(raw);
        let extracted_length = char_len(text);
        let extraction_ratio = if raw_length == 0 {
            0.0
        } else {
            extracted_length as f64 / raw_length as f64
        };

        let lines: Vec<&str> = text
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let boilerplate_ratio = if lines.is_empty() {
            0.0
        } else {
            let matching = lines
                .iter()
                .filter(|l| boilerplate_line().is_match(l))
                .count();
            matching as f64 / lines.len() as f64
        };

        let effective = extracted_length as f64 * (1.0 - boilerplate_ratio);

        ExtractionMetrics {
            raw_length,
            extracted_length,
            extraction_ratio,
            boilerplate_ratio,
            was_truncated: max_chars > 0 && raw.len() >= max_chars,
            quality_grade: QualityGrade::from_effective_length(effective),
            extractor_used: None,
        }
    }

    /// Runs extraction and metrics in one pass
    pub fn analyze(&self, raw: &str, max_chars: usize) -> ExtractedPage {
        let (text, kind) = self.extract(raw);
        let mut metrics = self.compute_metrics(raw, &text, max_chars);
        metrics.extractor_used = Some(kind);
        ExtractedPage {
            title: extract_title(raw),
            text,
            metrics,
        }
    }
}

/// Extracts the page title from an HTML document
pub fn extract_title(raw: &str) -> Option<String> {
    let document = Html::parse_document(raw);
    let title_selector = Selector::parse("title").ok()?;

    document
        .select(&title_selector)
        .next()
        .map(|element| collapse_whitespace(&element.text().collect::<String>()))
        .filter(|s| !s.is_empty())
}

/// Length of the text a reader would see, ignoring scripts and markup
pub(crate) fn visible_text_len(raw: &str) -> usize {
    char_len(&strip_tags(raw))
}

/// Number of `<script` tags in the raw content
pub(crate) fn script_count(raw: &str) -> usize {
    raw.to_ascii_lowercase().matches("<script").count()
}

fn extract_boilerplate_aware(raw: &str) -> String {
    let document = Html::parse_document(raw);

    let root = ["article", "main", "[role=main]", "body"]
        .iter()
        .filter_map(|s| Selector::parse(s).ok())
        .find_map(|selector| document.select(&selector).next())
        .unwrap_or_else(|| document.root_element());

    let Ok(block_selector) = Selector::parse(&BLOCK_TAGS.join(", ")) else {
        return String::new();
    };

    let mut blocks = Vec::new();
    for element in root.select(&block_selector) {
        if has_ancestor_in(&element, EXCLUDED_TAGS) || has_ancestor_in(&element, BLOCK_TAGS) {
            continue;
        }
        let text = collapse_whitespace(&element.text().collect::<Vec<_>>().join(" "));
        if !text.is_empty() {
            blocks.push(text);
        }
    }

    blocks.join("\n")
}

fn extract_paragraph_density(raw: &str) -> String {
    let document = Html::parse_document(raw);
    let Ok(p_selector) = Selector::parse("p") else {
        return String::new();
    };

    // Containers in document order with their direct paragraph text
    let mut containers: Vec<(usize, Vec<String>)> = Vec::new();
    let mut index = HashMap::new();

    for paragraph in document.select(&p_selector) {
        if has_ancestor_in(&paragraph, EXCLUDED_TAGS) {
            continue;
        }
        let Some(parent) = paragraph.parent() else {
            continue;
        };
        let text = collapse_whitespace(&paragraph.text().collect::<Vec<_>>().join(" "));
        if text.is_empty() {
            continue;
        }
        let slot = *index.entry(parent.id()).or_insert_with(|| {
            containers.push((0, Vec::new()));
            containers.len() - 1
        });
        containers[slot].0 += char_len(&text);
        containers[slot].1.push(text);
    }

    let mut best: Option<&(usize, Vec<String>)> = None;
    for container in &containers {
        if best.map_or(true, |b| container.0 > b.0) {
            best = Some(container);
        }
    }

    best.map(|(_, texts)| texts.join("\n")).unwrap_or_default()
}

fn strip_tags(raw: &str) -> String {
    let without_blocks = invisible_blocks().replace_all(raw, " ");
    let without_tags = any_tag().replace_all(&without_blocks, "\n");
    let decoded = decode_entities(&without_tags);

    decoded
        .lines()
        .map(collapse_whitespace)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

fn decode_entities(text: &str) -> String {
    text.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

fn has_ancestor_in(element: &ElementRef, tags: &[&str]) -> bool {
    element.ancestors().any(|node| {
        node.value()
            .as_element()
            .is_some_and(|e| tags.contains(&e.name()))
    })
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}
