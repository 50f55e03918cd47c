//! Reasoning and search collaborators
//!
//! Phase handlers never talk to a language model or a search engine
//! directly; they go through the [`Reasoner`] and [`SearchProvider`] traits.
//! The heuristic implementations here back the CLI and the tests.

use crate::config::SourceEntry;
use crate::research::model::{Claim, ClaimStatus, Gap, GapState};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::HashSet;
use std::fmt::Write as _;
use std::sync::OnceLock;

/// Shortest sentence treated as a claim
const MIN_CLAIM_CHARS: usize = 40;

/// Longest sentence treated as a claim
const MAX_CLAIM_CHARS: usize = 300;

/// Share of context terms a sentence must mention to count as relevant
const MIN_RELEVANCE: f64 = 0.5;

const STOPWORDS: &[&str] = &[
    "the", "and", "for", "are", "was", "were", "that", "this", "with", "from", "have", "has",
    "had", "but", "its", "into", "than", "then", "they", "their", "there", "these", "those",
    "which", "what", "when", "where", "who", "why", "how", "about", "also", "been", "being",
    "can", "could", "would", "should", "will", "may", "might", "does", "did", "our", "your",
    "some", "more", "most", "such", "very", "any", "all", "each", "other", "over", "only",
    "is", "it", "of", "to", "in", "on", "at", "by", "as", "an", "or", "be",
];

const NEGATIONS: &[&str] = &[
    "not", "no", "never", "none", "false", "myth", "incorrect", "untrue", "cannot", "isn't",
    "aren't", "doesn't", "don't", "didn't", "wasn't", "weren't", "won't", "debunked",
];

fn word_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z0-9]+(?:'[A-Za-z]+)?").expect("static regex compiles"))
}

/// Lowercased content words of `text`, stopwords removed
pub fn content_terms(text: &str) -> Vec<String> {
    word_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_lowercase())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// Returns true if the text contains a negation word
pub fn is_negated(text: &str) -> bool {
    word_regex()
        .find_iter(text)
        .any(|m| NEGATIONS.contains(&m.as_str().to_lowercase().as_str()))
}

/// Share of `context` terms that appear in `text` (1.0 for an empty context)
fn relevance(text: &str, context: &str) -> f64 {
    let wanted: HashSet<String> = content_terms(context).into_iter().collect();
    if wanted.is_empty() {
        return 1.0;
    }
    let present: HashSet<String> = content_terms(text).into_iter().collect();
    wanted.intersection(&present).count() as f64 / wanted.len() as f64
}

/// Splits text into sentences on `.`, `!` or `?` followed by whitespace
fn sentences(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        current.push(c);
        let boundary = matches!(c, '.' | '!' | '?')
            && chars.peek().map_or(true, |next| next.is_whitespace());
        if boundary || c == '\n' {
            let sentence = current.split_whitespace().collect::<Vec<_>>().join(" ");
            if !sentence.is_empty() {
                out.push(sentence);
            }
            current.clear();
        }
    }
    let rest = current.split_whitespace().collect::<Vec<_>>().join(" ");
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

/// Key used to detect two wordings of the same claim
pub fn claim_key(text: &str) -> String {
    content_terms(text).join(" ")
}

/// A search engine result
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchHit {
    pub url: String,
    pub title: String,
    pub snippet: String,
    pub published_at: Option<DateTime<Utc>>,
}

/// A claim sentence found in fetched text
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedClaim {
    pub text: String,
    /// The sentence contradicts the context it was extracted against
    pub negated: bool,
}

/// Everything the report generator sees
#[derive(Debug, Clone, Serialize)]
pub struct ReportData {
    pub query: String,
    pub claims: Vec<Claim>,
    pub gaps: Vec<Gap>,
    pub sources: Vec<String>,
    pub termination_reason: Option<String>,
    pub rounds: u32,
}

/// The reasoning boundary (normally a language model)
#[async_trait]
pub trait Reasoner: Send + Sync {
    /// Search queries for the initial discovery sweep
    async fn generate_queries(&self, query: &str) -> Result<Vec<String>>;

    /// Claim-like sentences in `text`, judged against `context`
    async fn extract_claims(&self, text: &str, context: &str) -> Result<Vec<ExtractedClaim>>;

    /// Canonical wording of a raw claim
    async fn normalize_claim(&self, raw: &str) -> Result<String>;

    /// Queries that would surface evidence against a claim
    async fn generate_counter_queries(&self, claim_text: &str) -> Result<Vec<String>>;

    async fn generate_report(&self, data: &ReportData) -> Result<String>;
}

/// The web search boundary
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search_web(&self, query: &str) -> Result<Vec<SearchHit>>;
}

/// Sentence-level heuristics standing in for a language model
#[derive(Debug, Clone, Default)]
pub struct HeuristicReasoner;

impl HeuristicReasoner {
    pub fn new() -> Self {
        Self
    }
}

/// First `n` content terms of a claim, for building queries
fn query_stem(text: &str, n: usize) -> String {
    content_terms(text).into_iter().take(n).collect::<Vec<_>>().join(" ")
}

#[async_trait]
impl Reasoner for HeuristicReasoner {
    async fn generate_queries(&self, query: &str) -> Result<Vec<String>> {
        let query = query.trim();
        if query.is_empty() {
            return Ok(Vec::new());
        }
        let stem = query_stem(query, 8);
        let mut queries = vec![query.to_string()];
        for candidate in [format!("{} evidence", stem), format!("{} study", stem)] {
            if !queries.contains(&candidate) {
                queries.push(candidate);
            }
        }
        Ok(queries)
    }

    async fn extract_claims(&self, text: &str, context: &str) -> Result<Vec<ExtractedClaim>> {
        let context_negated = is_negated(context);
        let mut seen = HashSet::new();
        let claims = sentences(text)
            .into_iter()
            .filter(|s| (MIN_CLAIM_CHARS..=MAX_CLAIM_CHARS).contains(&s.chars().count()))
            .filter(|s| !s.ends_with('?'))
            .filter(|s| relevance(s, context) >= MIN_RELEVANCE)
            .filter(|s| seen.insert(claim_key(s)))
            .map(|s| ExtractedClaim {
                negated: is_negated(&s) != context_negated,
                text: s,
            })
            .collect();
        Ok(claims)
    }

    async fn normalize_claim(&self, raw: &str) -> Result<String> {
        let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
        let trimmed = collapsed.trim_end_matches(['.', '!', ';', ',', ':']);
        let mut chars = trimmed.chars();
        let normalized = match chars.next() {
            Some(first) => format!("{}{}.", first.to_uppercase(), chars.as_str()),
            None => String::new(),
        };
        Ok(normalized)
    }

    async fn generate_counter_queries(&self, claim_text: &str) -> Result<Vec<String>> {
        let stem = query_stem(claim_text, 10);
        if stem.is_empty() {
            return Ok(Vec::new());
        }
        Ok(vec![
            format!("{} false", stem),
            format!("{} debunked", stem),
            format!("evidence against {}", stem),
        ])
    }

    async fn generate_report(&self, data: &ReportData) -> Result<String> {
        let mut report = String::new();
        let _ = writeln!(report, "# Research report: {}\n", data.query);
        let _ = writeln!(
            report,
            "{} claims after {} rounds; stop reason: {}\n",
            data.claims.len(),
            data.rounds,
            data.termination_reason.as_deref().unwrap_or("n/a")
        );

        let mut claims: Vec<&Claim> = data.claims.iter().collect();
        claims.sort_by(|a, b| b.status.cmp(&a.status).then_with(|| a.id.cmp(&b.id)));

        for status in [
            ClaimStatus::Verified,
            ClaimStatus::Conditioned,
            ClaimStatus::Contested,
            ClaimStatus::Unsupported,
            ClaimStatus::Refuted,
        ] {
            let group: Vec<&&Claim> = claims.iter().filter(|c| c.status == status).collect();
            if group.is_empty() {
                continue;
            }
            let _ = writeln!(report, "## {}\n", status);
            for claim in group {
                let _ = writeln!(
                    report,
                    "- {} (confidence {:.2}, evidence {:.2}, {} sources)",
                    claim.text,
                    claim.confidence,
                    claim.evidence_mass(),
                    claim.evidence.len()
                );
                for evidence in &claim.evidence {
                    let _ = writeln!(report, "  - {:?}: {}", evidence.stance, evidence.url);
                }
            }
            let _ = writeln!(report);
        }

        let open: Vec<&Gap> = data.gaps.iter().filter(|g| g.state != GapState::Closed).collect();
        if !open.is_empty() {
            let _ = writeln!(report, "## Open questions\n");
            for gap in open {
                let _ = writeln!(report, "- [{}] {}", gap.state, gap.question);
            }
            let _ = writeln!(report);
        }

        if !data.sources.is_empty() {
            let _ = writeln!(report, "## Sources\n");
            for source in &data.sources {
                let _ = writeln!(report, "- {}", source);
            }
        }

        Ok(report)
    }
}

/// Search over a fixed list of configured sources
#[derive(Debug, Clone, Default)]
pub struct StaticSearch {
    hits: Vec<SearchHit>,
}

impl StaticSearch {
    pub fn new(hits: Vec<SearchHit>) -> Self {
        Self { hits }
    }

    /// Builds the index from `[[source]]` config entries
    ///
    /// Unparseable publication dates are dropped rather than rejected.
    pub fn from_sources(sources: &[SourceEntry]) -> Self {
        let hits = sources
            .iter()
            .map(|s| SearchHit {
                url: s.url.clone(),
                title: s.title.clone(),
                snippet: s.snippet.clone(),
                published_at: s
                    .published_at
                    .as_deref()
                    .and_then(|d| DateTime::parse_from_rfc3339(d).ok())
                    .map(|d| d.with_timezone(&Utc)),
            })
            .collect();
        Self { hits }
    }

    pub fn len(&self) -> usize {
        self.hits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }
}

#[async_trait]
impl SearchProvider for StaticSearch {
    /// Sources ranked by how many query terms their title, snippet and URL share
    async fn search_web(&self, query: &str) -> Result<Vec<SearchHit>> {
        let wanted: HashSet<String> = content_terms(query).into_iter().collect();
        if wanted.is_empty() {
            return Ok(self.hits.clone());
        }

        let mut scored: Vec<(usize, &SearchHit)> = self
            .hits
            .iter()
            .filter_map(|hit| {
                let haystack = format!("{} {} {}", hit.title, hit.snippet, hit.url);
                let terms: HashSet<String> = content_terms(&haystack).into_iter().collect();
                let score = wanted.intersection(&terms).count();
                (score > 0).then_some((score, hit))
            })
            .collect();
        scored.sort_by(|a, b| b.0.cmp(&a.0));

        Ok(scored.into_iter().map(|(_, hit)| hit.clone()).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_terms_drop_stopwords() {
        assert_eq!(
            content_terms("The Moon is made of Cheese"),
            vec!["moon", "made", "cheese"]
        );
    }

    #[test]
    fn test_sentences() {
        let parts = sentences("First one. Second one!\nThird v1.2 stays whole? Tail");
        assert_eq!(
            parts,
            vec!["First one.", "Second one!", "Third v1.2 stays whole?", "Tail"]
        );
    }

    #[test]
    fn test_negation() {
        assert!(is_negated("Coffee does not cause dehydration"));
        assert!(is_negated("That is a myth"));
        assert!(!is_negated("Coffee causes mild dehydration"));
    }

    #[tokio::test]
    async fn test_extract_claims_filters_by_relevance_and_length() {
        let reasoner = HeuristicReasoner::new();
        let text = "Short line. Regular coffee consumption is linked to lower risk of liver disease. \
                    Unrelated sentence about football stadiums and their seating capacity.";
        let claims = reasoner
            .extract_claims(text, "coffee liver disease")
            .await
            .unwrap();
        assert_eq!(claims.len(), 1);
        assert!(claims[0].text.starts_with("Regular coffee"));
        assert!(!claims[0].negated);
    }

    #[tokio::test]
    async fn test_extract_claims_stance_is_relative_to_context() {
        let reasoner = HeuristicReasoner::new();
        let text = "Regular coffee consumption does not protect the liver from disease at all.";
        let against = reasoner
            .extract_claims(text, "coffee protects the liver from disease")
            .await
            .unwrap();
        assert!(against[0].negated);

        let along = reasoner
            .extract_claims(text, "coffee does not protect the liver from disease")
            .await
            .unwrap();
        assert!(!along[0].negated);
    }

    #[tokio::test]
    async fn test_normalize_claim() {
        let reasoner = HeuristicReasoner::new();
        assert_eq!(
            reasoner.normalize_claim("  water   boils at 100C!! ").await.unwrap(),
            "Water boils at 100C."
        );
        assert_eq!(reasoner.normalize_claim("   ").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_queries() {
        let reasoner = HeuristicReasoner::new();
        let queries = reasoner.generate_queries("health effects of coffee").await.unwrap();
        assert_eq!(queries[0], "health effects of coffee");
        assert!(queries.contains(&"health effects coffee evidence".to_string()));
        assert!(reasoner.generate_queries("  ").await.unwrap().is_empty());

        let counter = reasoner
            .generate_counter_queries("Coffee causes dehydration.")
            .await
            .unwrap();
        assert_eq!(counter.len(), 3);
        assert_eq!(counter[0], "coffee causes dehydration false");
    }

    #[tokio::test]
    async fn test_report_groups_by_status() {
        let mut verified = Claim::new("c1", "Verified thing.");
        verified.status = ClaimStatus::Verified;
        let open = Claim::new("c2", "Unknown thing.");
        let data = ReportData {
            query: "things".to_string(),
            gaps: vec![Gap::for_claim(&open)],
            claims: vec![open, verified],
            sources: vec!["https://a.org/".to_string()],
            termination_reason: Some("COVERAGE_CONVERGED".to_string()),
            rounds: 2,
        };

        let report = HeuristicReasoner::new().generate_report(&data).await.unwrap();
        let verified_at = report.find("## VERIFIED").unwrap();
        let unsupported_at = report.find("## UNSUPPORTED").unwrap();
        assert!(verified_at < unsupported_at);
        assert!(report.contains("COVERAGE_CONVERGED"));
        assert!(report.contains("## Open questions"));
        assert!(report.contains("https://a.org/"));
    }

    #[tokio::test]
    async fn test_static_search_ranking() {
        let search = StaticSearch::from_sources(&[
            SourceEntry {
                url: "https://a.org/tea".to_string(),
                title: "Tea and sleep".to_string(),
                snippet: String::new(),
                published_at: None,
            },
            SourceEntry {
                url: "https://b.org/coffee-liver".to_string(),
                title: "Coffee and the liver".to_string(),
                snippet: "Coffee drinkers show lower liver enzyme levels".to_string(),
                published_at: Some("2024-03-01T00:00:00Z".to_string()),
            },
            SourceEntry {
                url: "https://c.org/coffee".to_string(),
                title: "Coffee history".to_string(),
                snippet: String::new(),
                published_at: Some("not a date".to_string()),
            },
        ]);

        let hits = search.search_web("coffee liver").await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://b.org/coffee-liver");
        assert!(hits[0].published_at.is_some());
        assert!(hits[1].published_at.is_none());

        assert_eq!(search.search_web("the").await.unwrap().len(), 3);
    }
}
