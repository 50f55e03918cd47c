//! Crawler module: the crawl-resilience layer
//!
//! This module contains everything between a URL and its extracted text:
//! - HTTP-aware retry decisions with backoff
//! - Per-host pacing and concurrency limits
//! - Per-URL and per-host circuit breaking
//! - Host policy (deny/allow lists, throttling, JS-only pages, bot walls)
//! - Multi-stage content extraction with quality grading
//! - Run-wide budgets and the worker pool that ties it all together

mod budget;
mod circuit_breaker;
mod extractor;
mod fetcher;
mod host_policy;
mod orchestrator;
mod rate_limiter;
mod retry;

pub use budget::{BudgetKind, BudgetTracker, BudgetUsage};
pub use circuit_breaker::{
    is_non_retryable_error_text, BreakerAction, BreakerStats, CircuitBreaker, HostCircuitView,
    SkipCheck,
};
pub use extractor::{
    extract_title, ContentExtractor, ExtractedPage, ExtractionMetrics, ExtractorKind,
    QualityGrade, MIN_EXTRACTED_CHARS,
};
pub use fetcher::{build_http_client, classify_error, FetchError, HttpFetcher, PageFetcher, RawResponse};
pub use host_policy::{HostPolicyEngine, PolicyDecision};
pub use orchestrator::{ContentFlag, FetchOrchestrator, FetchResult, OrchestratorStats, SkipReason};
pub use rate_limiter::{RateLimiter, RateLimiterStats, RateSlot};
pub use retry::{
    is_non_retryable_status, is_retryable_status, parse_retry_after, ErrorClass, RetryDecision,
    RetryPolicy, RetryReason, NON_RETRYABLE_STATUSES, RETRYABLE_STATUSES,
};
