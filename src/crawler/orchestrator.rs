//! Fetch orchestration
//!
//! The orchestrator wraps every outbound fetch in the resilience layer and
//! runs batches of URLs on a bounded worker pool.
//!
//! # Per-URL flow
//!
//! 1. Budget gate and dedup (normalized URL)
//! 2. Circuit breaker: skip with `url_blocked` / `host_blocked`
//! 3. Host policy: skip with `blocked` / `throttled` / `js_required`
//! 4. Rate limiter slot for the host
//! 5. Attempt loop: fetch, ask the retry policy, sleep and retry or stop
//! 6. Report the final outcome to the breaker and the host policy
//! 7. Release the slot
//! 8. Extract text and check the content for bot walls and JS-only pages
//!
//! Skipped URLs never touch the network and consume no attempts.

use crate::config::Config;
use crate::crawler::budget::{BudgetKind, BudgetTracker, BudgetUsage};
use crate::crawler::circuit_breaker::{BreakerStats, CircuitBreaker};
use crate::crawler::extractor::{ContentExtractor, ExtractionMetrics};
use crate::crawler::fetcher::{FetchError, PageFetcher, RawResponse};
use crate::crawler::host_policy::HostPolicyEngine;
use crate::crawler::rate_limiter::{RateLimiter, RateLimiterStats};
use crate::crawler::retry::{is_retryable_status, parse_retry_after, ErrorClass, RetryPolicy};
use crate::state::HostState;
use crate::url::{dedup_key, host_of};
use futures::FutureExt;
use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Why a URL was not fetched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    InvalidUrl,
    Duplicate,
    UrlBlocked,
    HostBlocked,
    Blocked,
    Throttled,
    JsRequired,
    BudgetExhausted(BudgetKind),
    LimiterClosed,
}

impl SkipReason {
    fn from_host_state(state: HostState, reason: Option<&str>) -> Self {
        match (state, reason) {
            (_, Some("host_blocked")) => Self::HostBlocked,
            (HostState::Throttled, _) => Self::Throttled,
            (HostState::JsRequired, _) => Self::JsRequired,
            _ => Self::Blocked,
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUrl => write!(f, "invalid_url"),
            Self::Duplicate => write!(f, "duplicate"),
            Self::UrlBlocked => write!(f, "url_blocked"),
            Self::HostBlocked => write!(f, "host_blocked"),
            Self::Blocked => write!(f, "blocked"),
            Self::Throttled => write!(f, "throttled"),
            Self::JsRequired => write!(f, "js_required"),
            Self::BudgetExhausted(kind) => write!(f, "budget_exhausted:{}", kind),
            Self::LimiterClosed => write!(f, "limiter_closed"),
        }
    }
}

/// Content-based signal raised on a fetched page
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentFlag {
    JsRequired,
    BotWall,
}

/// Outcome of one URL fetch
#[derive(Debug, Clone, Serialize)]
pub struct FetchResult {
    /// URL as requested
    pub url: String,

    /// URL after redirects
    pub final_url: Option<String>,

    /// Status of the last attempt
    pub status_code: Option<u16>,

    /// Transport failure class of the last attempt
    pub error_class: Option<ErrorClass>,

    /// Transport failure message of the last attempt
    pub error: Option<String>,

    #[serde(skip)]
    pub raw_content: Option<String>,

    pub extracted_text: Option<String>,

    pub title: Option<String>,

    pub metrics: Option<ExtractionMetrics>,

    /// The final failure was transient (429/5xx/connection) rather than a denial
    pub retryable_signal: bool,

    pub duration: Duration,

    /// Network attempts made
    pub attempts: u32,

    /// Set when the URL was never fetched
    pub skipped: Option<SkipReason>,

    /// Set when the content is a bot wall or needs JavaScript
    pub content_flag: Option<ContentFlag>,
}

impl FetchResult {
    fn empty(url: &str) -> Self {
        Self {
            url: url.to_string(),
            final_url: None,
            status_code: None,
            error_class: None,
            error: None,
            raw_content: None,
            extracted_text: None,
            title: None,
            metrics: None,
            retryable_signal: false,
            duration: Duration::ZERO,
            attempts: 0,
            skipped: None,
            content_flag: None,
        }
    }

    fn skipped(url: &str, reason: SkipReason) -> Self {
        Self {
            skipped: Some(reason),
            ..Self::empty(url)
        }
    }

    fn failed(url: &str, class: ErrorClass, message: &str) -> Self {
        Self {
            error_class: Some(class),
            error: Some(message.to_string()),
            ..Self::empty(url)
        }
    }

    /// Fetched with a 2xx status and no content flag
    pub fn is_success(&self) -> bool {
        self.skipped.is_none()
            && self.content_flag.is_none()
            && self.status_code.is_some_and(|s| (200..300).contains(&s))
    }

    /// Usable extracted text, if any
    pub fn usable_text(&self) -> Option<&str> {
        if !self.is_success() {
            return None;
        }
        self.extracted_text.as_deref().filter(|t| !t.trim().is_empty())
    }
}

/// Orchestrator counters for the run summary
#[derive(Debug, Clone, Serialize)]
pub struct OrchestratorStats {
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub budget: BudgetUsage,
    pub breaker: BreakerStats,
    pub rate_limiter: RateLimiterStats,
}

/// Composes breaker, policy, limiter, retry policy and extractor around fetches
pub struct FetchOrchestrator {
    breaker: Arc<CircuitBreaker>,
    policy: Arc<HostPolicyEngine>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    extractor: ContentExtractor,
    fetcher: Arc<dyn PageFetcher>,
    budget: BudgetTracker,
    seen: Mutex<HashSet<String>>,
    max_bytes_per_fetch: usize,
    workers: usize,
    succeeded: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
}

impl FetchOrchestrator {
    /// Creates an orchestrator with fresh resilience state
    ///
    /// Nothing is shared with other orchestrators; state lives for one run.
    pub fn new(config: &Config, fetcher: Arc<dyn PageFetcher>) -> Self {
        let breaker = Arc::new(CircuitBreaker::new(config.breaker.clone()));
        let policy = Arc::new(
            HostPolicyEngine::new(config.host_policy.clone()).with_breaker(breaker.clone()),
        );

        Self {
            breaker,
            policy,
            limiter: Arc::new(RateLimiter::new(config.rate_limit.clone())),
            retry: RetryPolicy::new(config.retry.clone()),
            extractor: ContentExtractor::new(),
            fetcher,
            budget: BudgetTracker::new(config.budget.clone()),
            seen: Mutex::new(HashSet::new()),
            max_bytes_per_fetch: config.fetch.max_bytes_per_fetch,
            workers: config.rate_limit.max_concurrent_global.max(1),
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn policy(&self) -> &HostPolicyEngine {
        &self.policy
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub fn budget(&self) -> &BudgetTracker {
        &self.budget
    }

    /// Returns true if the normalized URL was already dispatched this run
    pub fn has_seen(&self, url: &str) -> bool {
        dedup_key(url).is_some_and(|key| {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .contains(&key)
        })
    }

    /// Fetches a batch of URLs on the worker pool
    ///
    /// Up to `max_concurrent_global` workers pull from a shared queue. Results
    /// come back in input order, one per input URL. Each result is stored as
    /// soon as its fetch finishes, and a panicking fetch fails only its own
    /// URL.
    pub async fn fetch_all(self: &Arc<Self>, urls: Vec<String>) -> Vec<FetchResult> {
        if urls.is_empty() {
            return Vec::new();
        }

        let total = urls.len();
        let queue: Arc<Mutex<VecDeque<(usize, String)>>> =
            Arc::new(Mutex::new(urls.iter().cloned().enumerate().collect()));
        let slots: Arc<Mutex<Vec<Option<FetchResult>>>> = Arc::new(Mutex::new(vec![None; total]));
        let workers = self.workers.min(total);
        tracing::debug!("Fetching {} URLs on {} workers", total, workers);

        let mut set = JoinSet::new();
        for _ in 0..workers {
            let orchestrator = Arc::clone(self);
            let queue = Arc::clone(&queue);
            let slots = Arc::clone(&slots);
            set.spawn(async move {
                loop {
                    let next = queue
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .pop_front();
                    let Some((index, url)) = next else {
                        break;
                    };
                    let result = match AssertUnwindSafe(orchestrator.fetch(&url))
                        .catch_unwind()
                        .await
                    {
                        Ok(result) => result,
                        Err(_) => {
                            tracing::error!("Fetch of {} panicked", url);
                            orchestrator.breaker.cancel_probe(&url);
                            FetchResult::failed(&url, ErrorClass::Other, "fetch panicked")
                        }
                    };
                    slots.lock().unwrap_or_else(PoisonError::into_inner)[index] = Some(result);
                }
            });
        }

        while let Some(joined) = set.join_next().await {
            if let Err(e) = joined {
                tracing::error!("Fetch worker failed: {}", e);
            }
        }

        let finished = std::mem::take(&mut *slots.lock().unwrap_or_else(PoisonError::into_inner));
        finished
            .into_iter()
            .zip(urls)
            .map(|(slot, url)| {
                slot.unwrap_or_else(|| FetchResult::failed(&url, ErrorClass::Other, "worker failed"))
            })
            .collect()
    }

    /// Fetches one URL through the resilience layer
    ///
    /// In-flight work is cancelled at the budget's hard deadline; the rate
    /// limiter slot is released on that path too.
    pub async fn fetch(&self, url: &str) -> FetchResult {
        let started = Instant::now();
        let outcome = tokio::time::timeout_at(self.budget.hard_deadline(), self.fetch_inner(url)).await;

        let mut result = match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("Hard deadline reached, cancelled fetch of {}", url);
                self.breaker.cancel_probe(url);
                FetchResult::failed(url, ErrorClass::Cancelled, "hard deadline reached")
            }
        };
        result.duration = started.elapsed();

        let counter = if result.skipped.is_some() {
            &self.skipped
        } else if result.is_success() {
            &self.succeeded
        } else {
            &self.failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
        result
    }

    async fn fetch_inner(&self, url: &str) -> FetchResult {
        let (Some(key), Some(host)) = (dedup_key(url), host_of(url)) else {
            return FetchResult::skipped(url, SkipReason::InvalidUrl);
        };

        if let Some(kind) = self.budget.exhausted() {
            tracing::debug!("Budget exhausted ({}), skipping {}", kind, url);
            return FetchResult::skipped(url, SkipReason::BudgetExhausted(kind));
        }

        if self.has_seen(url) {
            return FetchResult::skipped(url, SkipReason::Duplicate);
        }

        let check = self.breaker.should_skip(url);
        if check.skip {
            let reason = match check.reason.as_deref() {
                Some("url_blocked") => SkipReason::UrlBlocked,
                _ => SkipReason::HostBlocked,
            };
            tracing::debug!("Breaker skips {}: {}", url, reason);
            return FetchResult::skipped(url, reason);
        }

        let decision = self.policy.check(url);
        if !decision.allowed {
            self.breaker.cancel_probe(url);
            let reason = SkipReason::from_host_state(decision.state, decision.reason.as_deref());
            tracing::debug!("Policy skips {}: {}", url, reason);
            return FetchResult::skipped(url, reason);
        }

        let newly_seen = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key);
        if !newly_seen {
            self.breaker.cancel_probe(url);
            return FetchResult::skipped(url, SkipReason::Duplicate);
        }

        if let Err(kind) = self.budget.try_start_url() {
            self.breaker.cancel_probe(url);
            return FetchResult::skipped(url, SkipReason::BudgetExhausted(kind));
        }

        let slot = match self.limiter.acquire(&host).await {
            Ok(slot) => slot,
            Err(_) => {
                self.breaker.cancel_probe(url);
                return FetchResult::skipped(url, SkipReason::LimiterClosed);
            }
        };

        let mut attempts = 0;
        let mut last: Option<Result<RawResponse, FetchError>> = None;
        loop {
            if let Err(kind) = self.budget.try_start_fetch() {
                if attempts == 0 {
                    self.breaker.cancel_probe(url);
                    return FetchResult::skipped(url, SkipReason::BudgetExhausted(kind));
                }
                tracing::debug!("Budget exhausted ({}) between attempts for {}", kind, url);
                break;
            }
            attempts += 1;

            let outcome = self.fetcher.fetch(url).await;
            let decision = match &outcome {
                Ok(response) => {
                    self.budget.add_bytes(response.bytes);
                    if let Some(wait) = response
                        .retry_after
                        .as_deref()
                        .and_then(|v| parse_retry_after(v, chrono::Utc::now()))
                    {
                        let wait = wait.min(self.retry.max_wait());
                        self.limiter.set_retry_after(&host, wait.as_secs_f64());
                    }
                    self.retry.decide(
                        Some(response.status),
                        attempts,
                        None,
                        response.retry_after.as_deref(),
                    )
                }
                Err(error) => self.retry.decide(None, attempts, Some(error.class), None),
            };
            last = Some(outcome);

            if !decision.should_retry {
                tracing::trace!("Stopping after attempt {} of {}: {}", attempts, url, decision.reason);
                break;
            }
            tracing::debug!(
                "Retrying {} in {:.2}s (attempt {}, {})",
                url,
                decision.wait_seconds(),
                attempts,
                decision.reason
            );
            tokio::time::sleep(decision.wait).await;
        }

        let mut result = FetchResult {
            attempts,
            ..FetchResult::empty(url)
        };

        match last {
            Some(Ok(response)) => {
                let status = response.status;
                if (200..300).contains(&status) {
                    self.breaker.record_success(url);
                } else {
                    let action = self.breaker.record_failure(url, Some(status), "");
                    tracing::debug!("Breaker {} for {} ({})", action, url, status);
                    result.retryable_signal = is_retryable_status(status);
                }
                self.policy.report_result(url, Some(status));
                self.limiter.release(slot);

                result.status_code = Some(status);
                result.final_url = Some(response.final_url);
                self.inspect_content(url, &response.body, response.truncated, &mut result);
                result.raw_content = Some(response.body);
            }
            Some(Err(error)) => {
                self.breaker.record_failure(url, None, &error.message);
                self.policy.report_result(url, None);
                self.limiter.release(slot);

                tracing::debug!("Fetch of {} failed: {}", url, error);
                result.retryable_signal = error.class.is_retryable();
                result.error_class = Some(error.class);
                result.error = Some(error.message);
            }
            None => {
                self.breaker.cancel_probe(url);
                self.limiter.release(slot);
            }
        }

        result
    }

    fn inspect_content(&self, url: &str, body: &str, truncated: bool, result: &mut FetchResult) {
        if body.trim().is_empty() {
            return;
        }

        if self.policy.detect_bot_wall(url, body) {
            result.content_flag = Some(ContentFlag::BotWall);
            return;
        }

        let success = result.status_code.is_some_and(|s| (200..300).contains(&s));
        if !success {
            return;
        }

        if self.policy.detect_js_required(url, body) {
            result.content_flag = Some(ContentFlag::JsRequired);
        }

        let page = self.extractor.analyze(body, self.max_bytes_per_fetch);
        let mut metrics = page.metrics;
        metrics.was_truncated = metrics.was_truncated || truncated;
        tracing::trace!(
            "Extracted {} chars from {} ({}, {})",
            metrics.extracted_length,
            url,
            metrics.quality_grade,
            page.text.len()
        );
        result.extracted_text = Some(page.text);
        result.title = page.title;
        result.metrics = Some(metrics);
    }

    pub fn budget_usage(&self) -> BudgetUsage {
        self.budget.usage()
    }

    pub fn stats(&self) -> OrchestratorStats {
        OrchestratorStats {
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            skipped: self.skipped.load(Ordering::Relaxed),
            budget: self.budget.usage(),
            breaker: self.breaker.get_stats(),
            rate_limiter: self.limiter.stats(),
        }
    }
}
