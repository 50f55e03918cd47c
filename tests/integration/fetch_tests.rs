//! Integration tests for the fetch orchestrator
//!
//! These tests use wiremock to stand up hostile or flaky hosts and run real
//! HTTP fetches through the whole resilience layer. Every mock server binds
//! 127.0.0.1, so each test builds its own orchestrator.

use std::sync::Arc;
use std::time::Duration;
use sumi_delve::config::{
    BreakerConfig, BudgetConfig, Config, FetchConfig, RateLimitConfig, RetryConfig, UserAgentConfig,
};
use sumi_delve::crawler::{
    BudgetKind, ContentFlag, FetchOrchestrator, HttpFetcher, PageFetcher, QualityGrade, SkipReason,
};
use sumi_delve::state::{CircuitState, HostState};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Creates a test configuration with fast retries and no pacing
fn create_test_config() -> Config {
    let mut config = Config::new(UserAgentConfig {
        crawler_name: "TestBot".to_string(),
        crawler_version: "1.0.0".to_string(),
        contact_url: "https://example.com/contact".to_string(),
        contact_email: "test@example.com".to_string(),
    });
    config.fetch = FetchConfig {
        request_timeout_secs: 5,
        connect_timeout_secs: 2,
        ..FetchConfig::default()
    };
    config.retry = RetryConfig {
        max_attempts_per_url: 3,
        base_backoff_secs: 0.01,
        max_backoff_secs: 0.05,
        jitter_fraction: 0.0,
        max_wait_secs: 5.0,
    };
    config.rate_limit = RateLimitConfig {
        min_interval_sec: 0.0,
        max_concurrent_per_host: 2,
        max_concurrent_global: 4,
    };
    config.breaker = BreakerConfig {
        url_block_threshold: 1,
        host_fail_threshold: 3,
        ..BreakerConfig::default()
    };
    config
}

fn create_orchestrator(config: &Config) -> Arc<FetchOrchestrator> {
    let fetcher = HttpFetcher::new(&config.user_agent, &config.fetch).expect("client builds");
    Arc::new(FetchOrchestrator::new(config, Arc::new(fetcher)))
}

fn article_html() -> String {
    let paragraph = "Field measurements collected across several coastal stations show a steady rise in average water temperature over the last decade. ";
    format!(
        "<html><head><title>Coastal report</title></head><body><nav>Home | About</nav><article><p>{}</p><p>{}</p></article><footer>Copyright 2024</footer></body></html>",
        paragraph.repeat(10),
        paragraph.repeat(20)
    )
}

async fn mount(server: &MockServer, route: &str, template: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(route))
        .respond_with(template)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_successful_fetch_is_extracted() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/report",
        ResponseTemplate::new(200)
            .set_body_string(article_html())
            .insert_header("content-type", "text/html"),
    )
    .await;

    let orchestrator = create_orchestrator(&create_test_config());
    let result = orchestrator.fetch(&format!("{}/report", server.uri())).await;

    assert!(result.is_success());
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.attempts, 1);
    assert_eq!(result.title.as_deref(), Some("Coastal report"));

    let text = result.usable_text().expect("text extracted");
    assert!(text.contains("coastal stations"));
    assert!(!text.contains("Copyright"));

    let metrics = result.metrics.expect("metrics attached");
    assert_eq!(metrics.quality_grade, QualityGrade::High);
    assert!(metrics.extraction_ratio > 0.0 && metrics.extraction_ratio < 1.0);
}

#[tokio::test]
async fn test_forbidden_is_not_retried_and_exhausts_url() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/private"))
        .respond_with(ResponseTemplate::new(403))
        .expect(1)
        .mount(&server)
        .await;

    let orchestrator = create_orchestrator(&create_test_config());
    let url = format!("{}/private", server.uri());
    let result = orchestrator.fetch(&url).await;

    assert_eq!(result.status_code, Some(403));
    assert_eq!(result.attempts, 1);
    assert!(!result.retryable_signal);
    assert!(orchestrator.breaker().is_url_exhausted(&url));

    // Never requested again during the run
    let again = orchestrator.fetch(&url).await;
    assert!(again.skipped.is_some());
}

#[tokio::test]
async fn test_host_opens_after_failures_on_distinct_urls() {
    let server = MockServer::start().await;
    for route in ["/a", "/b", "/c"] {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(404))
            .expect(1)
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/d"))
        .respond_with(ResponseTemplate::new(200).set_body_string(article_html()))
        .expect(0)
        .mount(&server)
        .await;

    let orchestrator = create_orchestrator(&create_test_config());
    for route in ["/a", "/b", "/c"] {
        let result = orchestrator.fetch(&format!("{}{}", server.uri(), route)).await;
        assert_eq!(result.status_code, Some(404));
    }
    assert_eq!(orchestrator.breaker().host_state("127.0.0.1"), CircuitState::Open);

    let denied = orchestrator.fetch(&format!("{}/d", server.uri())).await;
    assert_eq!(denied.skipped, Some(SkipReason::HostBlocked));
    assert!(denied.skipped.unwrap().to_string().contains("host_blocked"));
    assert_eq!(denied.attempts, 0);
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/flaky"))
        .respond_with(ResponseTemplate::new(503))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount(
        &server,
        "/flaky",
        ResponseTemplate::new(200).set_body_string(article_html()),
    )
    .await;

    let orchestrator = create_orchestrator(&create_test_config());
    let result = orchestrator.fetch(&format!("{}/flaky", server.uri())).await;

    assert!(result.is_success());
    assert_eq!(result.attempts, 2);
    assert_eq!(orchestrator.budget().fetches(), 2);
    assert_eq!(orchestrator.breaker().get_stats().failures_recorded, 0);
}

#[tokio::test]
async fn test_retries_stop_at_max_attempts() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/down"))
        .respond_with(ResponseTemplate::new(502))
        .expect(3)
        .mount(&server)
        .await;

    let orchestrator = create_orchestrator(&create_test_config());
    let result = orchestrator.fetch(&format!("{}/down", server.uri())).await;

    assert_eq!(result.status_code, Some(502));
    assert_eq!(result.attempts, 3);
    assert!(result.retryable_signal);
    assert!(!result.is_success());
}

#[tokio::test]
async fn test_retry_after_is_respected() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/busy"))
        .respond_with(ResponseTemplate::new(429).insert_header("retry-after", "1"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    mount(
        &server,
        "/busy",
        ResponseTemplate::new(200).set_body_string(article_html()),
    )
    .await;

    let orchestrator = create_orchestrator(&create_test_config());
    let result = orchestrator.fetch(&format!("{}/busy", server.uri())).await;

    assert!(result.is_success());
    assert_eq!(result.attempts, 2);
    assert!(result.duration >= Duration::from_secs(1));
}

#[tokio::test]
async fn test_js_only_page_flags_host() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/app",
        ResponseTemplate::new(200).set_body_string(
            "<html><body><noscript>You need to enable JavaScript to run this app.</noscript><div id=\"root\"></div><script src=\"/main.js\"></script></body></html>",
        ),
    )
    .await;

    let orchestrator = create_orchestrator(&create_test_config());
    let result = orchestrator.fetch(&format!("{}/app", server.uri())).await;

    assert_eq!(result.content_flag, Some(ContentFlag::JsRequired));
    assert!(!result.is_success());
    assert_eq!(orchestrator.policy().state_of("127.0.0.1"), HostState::JsRequired);

    let next = orchestrator.fetch(&format!("{}/other", server.uri())).await;
    assert_eq!(next.skipped, Some(SkipReason::JsRequired));
}

#[tokio::test]
async fn test_bot_wall_blocks_host() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/guarded",
        ResponseTemplate::new(403)
            .set_body_string("<html><head><title>Just a moment...</title></head><body>Checking your browser</body></html>"),
    )
    .await;

    let orchestrator = create_orchestrator(&create_test_config());
    let result = orchestrator.fetch(&format!("{}/guarded", server.uri())).await;
    assert_eq!(result.content_flag, Some(ContentFlag::BotWall));

    let next = orchestrator.fetch(&format!("{}/elsewhere", server.uri())).await;
    assert_eq!(next.skipped, Some(SkipReason::Blocked));
}

#[tokio::test]
async fn test_fetch_budget_stops_new_work() {
    let server = MockServer::start().await;
    for route in ["/1", "/2", "/3"] {
        mount(
            &server,
            route,
            ResponseTemplate::new(200).set_body_string(article_html()),
        )
        .await;
    }

    let mut config = create_test_config();
    config.budget = BudgetConfig {
        max_fetches: 2,
        ..BudgetConfig::default()
    };
    let orchestrator = create_orchestrator(&config);

    for route in ["/1", "/2"] {
        assert!(orchestrator.fetch(&format!("{}{}", server.uri(), route)).await.is_success());
    }
    let third = orchestrator.fetch(&format!("{}/3", server.uri())).await;
    assert_eq!(third.skipped, Some(SkipReason::BudgetExhausted(BudgetKind::Fetches)));
    assert_eq!(orchestrator.budget_usage().exhausted, Some(BudgetKind::Fetches));
}

#[tokio::test]
async fn test_fetch_all_keeps_input_order() {
    let server = MockServer::start().await;
    for route in ["/x", "/y"] {
        mount(
            &server,
            route,
            ResponseTemplate::new(200).set_body_string(article_html()),
        )
        .await;
    }
    mount(&server, "/z", ResponseTemplate::new(410)).await;

    let orchestrator = create_orchestrator(&create_test_config());
    let urls: Vec<String> = ["/x", "/z", "/y", "/x"]
        .iter()
        .map(|r| format!("{}{}", server.uri(), r))
        .collect();
    let results = orchestrator.fetch_all(urls.clone()).await;

    assert_eq!(results.len(), 4);
    for (result, url) in results.iter().zip(&urls) {
        assert_eq!(&result.url, url);
    }
    assert_eq!(results[1].status_code, Some(410));
    assert!(results[2].is_success());
    // One of the two /x entries is a duplicate
    let duplicates = [&results[0], &results[3]]
        .iter()
        .filter(|r| r.skipped == Some(SkipReason::Duplicate))
        .count();
    assert_eq!(duplicates, 1);
}

#[tokio::test]
async fn test_http_fetcher_truncates_large_bodies() {
    let server = MockServer::start().await;
    mount(
        &server,
        "/big",
        ResponseTemplate::new(200).set_body_string("x".repeat(10_000)),
    )
    .await;

    let config = create_test_config();
    let fetcher = HttpFetcher::new(
        &config.user_agent,
        &FetchConfig {
            max_bytes_per_fetch: 1_000,
            ..config.fetch.clone()
        },
    )
    .expect("client builds");

    let response = fetcher.fetch(&format!("{}/big", server.uri())).await.expect("fetched");
    assert_eq!(response.status, 200);
    assert!(response.truncated);
    assert_eq!(response.bytes, 1_000);
}
