//! End-to-end research runs against a mock web

use async_trait::async_trait;
use std::sync::Arc;
use sumi_delve::config::{
    BreakerConfig, Config, RetryConfig, RateLimitConfig, SourceEntry, UserAgentConfig,
};
use sumi_delve::crawler::HttpFetcher;
use sumi_delve::research::{
    run_research, ExtractedClaim, HeuristicReasoner, Reasoner, ReportData, StaticSearch,
};
use sumi_delve::{DelveError, Phase};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const QUERY: &str = "coffee liver disease";
const CLAIM: &str = "Regular coffee consumption is linked to lower risk of liver disease.";

fn create_test_config(sources: Vec<SourceEntry>) -> Config {
    let mut config = Config::new(UserAgentConfig {
        crawler_name: "TestDelver".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    });
    config.retry = RetryConfig {
        max_attempts_per_url: 2,
        base_backoff_secs: 0.01,
        max_backoff_secs: 0.05,
        jitter_fraction: 0.0,
        max_wait_secs: 1.0,
    };
    config.rate_limit = RateLimitConfig {
        min_interval_sec: 0.0,
        max_concurrent_per_host: 4,
        max_concurrent_global: 8,
    };
    config.breaker = BreakerConfig {
        url_block_threshold: 1,
        ..BreakerConfig::default()
    };
    config.sources = sources;
    config
}

fn article(lead: &str) -> String {
    let filler = "Researchers gathered measurements over several seasons in many regions. ".repeat(45);
    format!(
        "<html><head><title>Study</title></head><body><article><p>{} {}</p></article></body></html>",
        lead, filler
    )
}

fn source(uri: &str, route: &str, title: &str) -> SourceEntry {
    SourceEntry {
        url: format!("{}{}", uri, route),
        title: title.to_string(),
        snippet: String::new(),
        published_at: None,
    }
}

/// Three pages repeating the claim plus one page that always refuses
async fn start_mock_web() -> (MockServer, Vec<SourceEntry>) {
    let server = MockServer::start().await;
    for route in ["/coffee-1", "/coffee-2", "/coffee-3"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string(article(CLAIM))
                    .insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/paywalled"))
        .respond_with(ResponseTemplate::new(403))
        .mount(&server)
        .await;

    let uri = server.uri();
    let sources = vec![
        source(&uri, "/coffee-1", "Coffee and liver disease cohort"),
        source(&uri, "/coffee-2", "Liver disease risk among coffee drinkers"),
        source(&uri, "/coffee-3", "Coffee consumption review"),
        source(&uri, "/paywalled", "Coffee liver disease journal"),
    ];
    (server, sources)
}

#[tokio::test]
async fn test_full_research_run() {
    let (_server, sources) = start_mock_web().await;
    let config = create_test_config(sources.clone());
    let fetcher = HttpFetcher::new(&config.user_agent, &config.fetch).expect("client builds");

    let outcome = run_research(
        &config,
        QUERY,
        Arc::new(fetcher),
        Arc::new(HeuristicReasoner::new()),
        Arc::new(StaticSearch::from_sources(&sources)),
    )
    .await;

    assert!(outcome.succeeded, "run failed: {:?}", outcome.error);
    assert_eq!(outcome.final_phase, Phase::Complete);
    assert!(outcome.claims.iter().any(|c| c.text == CLAIM));
    assert_eq!(outcome.gaps.len(), outcome.claims.len());
    assert!(outcome.sources.len() >= 3);
    assert!(!outcome.sources.iter().any(|s| s.ends_with("/paywalled")));
    assert!(outcome.breaker.failures_recorded >= 1);

    let report = outcome.report.expect("report written");
    assert!(report.starts_with("# Research report: coffee liver disease"));
    assert!(report.contains("coffee consumption"));
}

/// Delegates to the heuristics but cannot read pages
struct BrokenExtraction(HeuristicReasoner);

#[async_trait]
impl Reasoner for BrokenExtraction {
    async fn generate_queries(&self, query: &str) -> sumi_delve::Result<Vec<String>> {
        self.0.generate_queries(query).await
    }

    async fn extract_claims(
        &self,
        _text: &str,
        _context: &str,
    ) -> sumi_delve::Result<Vec<ExtractedClaim>> {
        Err(DelveError::Reasoner("model unavailable".to_string()))
    }

    async fn normalize_claim(&self, raw: &str) -> sumi_delve::Result<String> {
        self.0.normalize_claim(raw).await
    }

    async fn generate_counter_queries(&self, claim_text: &str) -> sumi_delve::Result<Vec<String>> {
        self.0.generate_counter_queries(claim_text).await
    }

    async fn generate_report(&self, data: &ReportData) -> sumi_delve::Result<String> {
        self.0.generate_report(data).await
    }
}

#[tokio::test]
async fn test_failed_extraction_aborts_with_partial_results() {
    let (_server, sources) = start_mock_web().await;
    let config = create_test_config(sources.clone());
    let fetcher = HttpFetcher::new(&config.user_agent, &config.fetch).expect("client builds");

    let outcome = run_research(
        &config,
        QUERY,
        Arc::new(fetcher),
        Arc::new(BrokenExtraction(HeuristicReasoner::new())),
        Arc::new(StaticSearch::from_sources(&sources)),
    )
    .await;

    assert!(!outcome.succeeded);
    assert_eq!(outcome.reason, "ABORTED");
    assert!(outcome.error.as_deref().unwrap_or("").contains("model unavailable"));
    assert_eq!(outcome.steps, 1);
    assert!(outcome.claims.is_empty());
    assert!(outcome.report.is_none());
    // Pages fetched before the failure are still reported
    assert!(!outcome.sources.is_empty());
    assert!(outcome.budget.fetches >= 1);
}

#[tokio::test]
async fn test_run_with_no_sources_completes_empty() {
    let config = create_test_config(Vec::new());
    let fetcher = HttpFetcher::new(&config.user_agent, &config.fetch).expect("client builds");

    let outcome = run_research(
        &config,
        QUERY,
        Arc::new(fetcher),
        Arc::new(HeuristicReasoner::new()),
        Arc::new(StaticSearch::default()),
    )
    .await;

    assert!(outcome.succeeded);
    assert!(outcome.claims.is_empty());
    assert_eq!(outcome.budget.fetches, 0);
    assert!(outcome.report.is_some());
}
