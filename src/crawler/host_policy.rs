//! Host-level allow/deny decisions
//!
//! The policy folds several signals into one decision per host:
//! - denylist / allowlist patterns seeded at construction
//! - circuit breaker state (an open host is blocked)
//! - consecutive 403 responses (blocked at a threshold)
//! - 429 responses (throttled for a cooldown)
//! - content signals: client-rendered pages (JS required) and bot walls
//!
//! Denied checks never reach the network and consume no fetch attempts.

use crate::config::HostPolicyConfig;
use crate::crawler::circuit_breaker::CircuitBreaker;
use crate::crawler::extractor::{script_count, visible_text_len};
use crate::state::{CircuitState, HostRecord, HostState};
use crate::url::{host_of, matches_any};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

/// Phrases pages show when they cannot render without JavaScript
const JS_REQUIRED_MARKERS: &[&str] = &[
    "please enable javascript",
    "you need to enable javascript",
    "javascript is required",
    "javascript is disabled",
    "requires javascript",
    "enable javascript to run this app",
    "turn on javascript",
];

/// Empty mount points of client-side frameworks
const APP_SHELL_MARKERS: &[&str] = &[
    "<div id=\"root\"></div>",
    "<div id=\"app\"></div>",
    "<div id=\"__next\"></div>",
    "<app-root></app-root>",
    "ng-app=",
    "data-reactroot",
    "window.__nuxt__",
];

/// Phrases of challenge / anti-bot interstitials
const BOT_WALL_MARKERS: &[&str] = &[
    "captcha",
    "checking your browser",
    "cf-browser-verification",
    "cf-challenge",
    "attention required! | cloudflare",
    "just a moment...",
    "ddos protection by",
    "are you a robot",
    "unusual traffic from your computer",
    "verify you are human",
    "access to this page has been denied",
];

/// Pages with more visible text than this are treated as real content
const MARKER_TEXT_LIMIT: usize = 2000;
const APP_SHELL_TEXT_LIMIT: usize = 200;
const SCRIPT_DENSITY_TEXT_LIMIT: usize = 500;

/// Result of [`HostPolicyEngine::check`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PolicyDecision {
    pub allowed: bool,
    pub state: HostState,
    /// `blocked`, `throttled`, `js_required` or `host_blocked` when denied
    pub reason: Option<String>,
    /// Human-readable detail behind the denial
    pub detail: Option<String>,
}

impl PolicyDecision {
    fn allow() -> Self {
        Self {
            allowed: true,
            state: HostState::Ok,
            reason: None,
            detail: None,
        }
    }

    fn deny(state: HostState, reason: &str, detail: Option<String>) -> Self {
        Self {
            allowed: false,
            state,
            reason: Some(reason.to_string()),
            detail,
        }
    }
}

/// Host policy shared by all fetch workers of a session
pub struct HostPolicyEngine {
    config: HostPolicyConfig,
    breaker: Option<Arc<CircuitBreaker>>,
    records: Mutex<HashMap<String, HostRecord>>,
}

impl HostPolicyEngine {
    /// Creates an engine and seeds exact-host denylist entries as blocked
    pub fn new(config: HostPolicyConfig) -> Self {
        let mut records = HashMap::new();
        for pattern in &config.deny {
            if !pattern.contains('*') {
                records.insert(pattern.to_lowercase(), HostRecord::blocked("denylisted"));
            }
        }

        Self {
            config,
            breaker: None,
            records: Mutex::new(records),
        }
    }

    /// Consults `breaker` on every check; open hosts are reported blocked
    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HostRecord>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn new_record(&self, host: &str) -> HostRecord {
        if matches_any(&self.config.deny, host) {
            HostRecord::blocked("denylisted")
        } else if matches_any(&self.config.allow, host) {
            HostRecord::exempt()
        } else {
            HostRecord::new()
        }
    }

    /// Decides whether `url` may be fetched now
    pub fn check(&self, url: &str) -> PolicyDecision {
        self.check_at(url, Instant::now())
    }

    pub fn check_at(&self, url: &str, now: Instant) -> PolicyDecision {
        let Some(host) = host_of(url) else {
            return PolicyDecision::deny(HostState::Blocked, "blocked", Some("invalid url".into()));
        };

        if let Some(breaker) = &self.breaker {
            if breaker.host_state(&host) == CircuitState::Open {
                return PolicyDecision::deny(
                    HostState::Blocked,
                    "host_blocked",
                    Some("circuit open".into()),
                );
            }
        }

        let mut records = self.lock();
        if !records.contains_key(&host) {
            let record = self.new_record(&host);
            records.insert(host.clone(), record);
        }
        let Some(record) = records.get_mut(&host) else {
            return PolicyDecision::allow();
        };

        let state = record.refresh(now);
        if state.denies() {
            tracing::debug!("Policy denies {} ({})", url, state);
            return PolicyDecision::deny(state, state.as_code(), record.reason.clone());
        }

        PolicyDecision::allow()
    }

    /// Applies the final outcome of a fetch to the host's record
    ///
    /// `status` is `None` for transport failures.
    pub fn report_result(&self, url: &str, status: Option<u16>) {
        self.report_result_at(url, status, Instant::now())
    }

    pub fn report_result_at(&self, url: &str, status: Option<u16>, now: Instant) {
        let Some(host) = host_of(url) else {
            return;
        };
        let mut records = self.lock();
        if !records.contains_key(&host) {
            let record = self.new_record(&host);
            records.insert(host.clone(), record);
        }
        if let Some(record) = records.get_mut(&host) {
            let before = record.state;
            record.record_status(status, &self.config, now);
            if record.state != before {
                tracing::info!(
                    "Host {} moved from {} to {}: {}",
                    host,
                    before,
                    record.state,
                    record.reason.as_deref().unwrap_or("-")
                );
            }
        }
    }

    /// Flags the host JS_REQUIRED if `content` cannot be read without a browser
    ///
    /// # Detection
    ///
    /// * a "please enable JavaScript" style marker with little visible text
    /// * an empty framework mount point with almost no visible text
    /// * three or more scripts and visible text short relative to script count
    ///
    /// # Returns
    ///
    /// `true` if the content looks client-rendered. Allowlisted hosts are
    /// never marked, but detection is still reported.
    pub fn detect_js_required(&self, url: &str, content: &str) -> bool {
        let lowered = content.to_lowercase();
        let visible = visible_text_len(content);
        let scripts = script_count(content);

        let reason = if visible < MARKER_TEXT_LIMIT
            && JS_REQUIRED_MARKERS.iter().any(|m| lowered.contains(m))
        {
            Some("javascript required marker".to_string())
        } else if visible < APP_SHELL_TEXT_LIMIT
            && APP_SHELL_MARKERS.iter().any(|m| lowered.contains(m))
        {
            Some("empty client-side app shell".to_string())
        } else if scripts >= 3 && visible < SCRIPT_DENSITY_TEXT_LIMIT && visible < scripts * 50 {
            Some(format!("{} scripts, {} chars of text", scripts, visible))
        } else {
            None
        };

        let Some(reason) = reason else {
            return false;
        };
        self.mark(url, |record| record.mark_js_required(&reason));
        tracing::info!("JS-required content detected for {}: {}", url, reason);
        true
    }

    /// Flags the host BLOCKED (reason `bot_wall`) on challenge pages
    pub fn detect_bot_wall(&self, url: &str, content: &str) -> bool {
        let lowered = content.to_lowercase();
        if visible_text_len(content) >= MARKER_TEXT_LIMIT
            || !BOT_WALL_MARKERS.iter().any(|m| lowered.contains(m))
        {
            return false;
        }
        self.mark(url, |record| record.mark_blocked("bot_wall"));
        tracing::warn!("Bot wall detected for {}", url);
        true
    }

    fn mark(&self, url: &str, apply: impl FnOnce(&mut HostRecord)) {
        let Some(host) = host_of(url) else {
            return;
        };
        let mut records = self.lock();
        if !records.contains_key(&host) {
            let record = self.new_record(&host);
            records.insert(host.clone(), record);
        }
        if let Some(record) = records.get_mut(&host) {
            apply(record);
        }
    }

    /// Clears any sticky state for `host`
    pub fn clear(&self, host: &str) {
        if let Some(record) = self.lock().get_mut(host) {
            record.clear();
        }
    }

    pub fn state_of(&self, host: &str) -> HostState {
        self.lock()
            .get(host)
            .map(|r| r.state)
            .unwrap_or(HostState::Ok)
    }

    /// Snapshot of every host record, sorted by host
    pub fn records(&self) -> Vec<(String, HostRecord)> {
        let mut records: Vec<(String, HostRecord)> = self
            .lock()
            .iter()
            .map(|(host, record)| (host.clone(), record.clone()))
            .collect();
        records.sort_by(|a, b| a.0.cmp(&b.0));
        records
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use std::time::Duration;

    fn create_test_config() -> HostPolicyConfig {
        HostPolicyConfig {
            host_block_threshold: 2,
            throttle_cooldown_seconds: 30,
            deny: vec!["*.pinterest.com".to_string(), "spam.example".to_string()],
            allow: vec!["docs.rs".to_string()],
        }
    }

    #[test]
    fn test_denylist() {
        let engine = HostPolicyEngine::new(create_test_config());
        let decision = engine.check("https://www.pinterest.com/pin/1");
        assert!(!decision.allowed);
        assert_eq!(decision.state, HostState::Blocked);
        assert_eq!(decision.reason.as_deref(), Some("blocked"));
        assert_eq!(decision.detail.as_deref(), Some("denylisted"));

        assert_eq!(engine.state_of("spam.example"), HostState::Blocked);
        assert!(engine.check("https://example.org/").allowed);
    }

    #[test]
    fn test_consecutive_forbidden_blocks() {
        let engine = HostPolicyEngine::new(create_test_config());
        let url = "https://example.org/a";
        engine.report_result(url, Some(403));
        assert!(engine.check(url).allowed);
        engine.report_result(url, Some(403));

        let decision = engine.check("https://example.org/other");
        assert!(!decision.allowed);
        assert_eq!(decision.state, HostState::Blocked);
    }

    #[test]
    fn test_allowlisted_host_is_exempt() {
        let engine = HostPolicyEngine::new(create_test_config());
        for _ in 0..5 {
            engine.report_result("https://docs.rs/x", Some(403));
        }
        assert!(engine.check("https://docs.rs/y").allowed);
        assert!(engine.detect_bot_wall("https://docs.rs/y", "<p>captcha</p>"));
        assert!(engine.check("https://docs.rs/y").allowed);
    }

    #[test]
    fn test_throttle_and_recovery() {
        let engine = HostPolicyEngine::new(create_test_config());
        let now = Instant::now();
        engine.report_result_at("https://example.org/a", Some(429), now);

        let decision = engine.check_at("https://example.org/b", now + Duration::from_secs(10));
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("throttled"));

        let decision = engine.check_at("https://example.org/b", now + Duration::from_secs(31));
        assert!(decision.allowed);
    }

    #[test]
    fn test_js_required_markers_and_stickiness() {
        let engine = HostPolicyEngine::new(create_test_config());
        let shell = r#"<html><body><noscript>Please enable JavaScript to view this site.</noscript>
            <div id="root"></div><script src="/bundle.js"></script></body></html>"#;
        assert!(engine.detect_js_required("https://app.example/page", shell));

        let decision = engine.check("https://app.example/other");
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("js_required"));

        // A later success does not clear it
        engine.report_result("https://app.example/page", Some(200));
        assert_eq!(engine.state_of("app.example"), HostState::JsRequired);

        engine.clear("app.example");
        assert!(engine.check("https://app.example/other").allowed);
    }

    #[test]
    fn test_script_density_detection() {
        let engine = HostPolicyEngine::new(create_test_config());
        let page = format!(
            "<html><body><p>Loading</p>{}</body></html>",
            "<script src=\"/chunk.js\"></script>".repeat(4)
        );
        assert!(engine.detect_js_required("https://spa.example/", &page));
    }

    #[test]
    fn test_real_article_not_flagged() {
        let engine = HostPolicyEngine::new(create_test_config());
        let article = format!(
            "<html><body><article><p>{}</p></article><script>track()</script></body></html>",
            "A long article that discusses captcha design and why sites ask you to enable javascript. "
                .repeat(40)
        );
        assert!(!engine.detect_js_required("https://news.example/a", &article));
        assert!(!engine.detect_bot_wall("https://news.example/a", &article));
        assert!(engine.check("https://news.example/b").allowed);
    }

    #[test]
    fn test_bot_wall_blocks_host() {
        let engine = HostPolicyEngine::new(create_test_config());
        let page = "<html><head><title>Just a moment...</title></head><body>Checking your browser before accessing the site.</body></html>";
        assert!(engine.detect_bot_wall("https://guarded.example/a", page));

        let decision = engine.check("https://guarded.example/b");
        assert!(!decision.allowed);
        assert_eq!(decision.detail.as_deref(), Some("bot_wall"));
    }

    #[test]
    fn test_open_breaker_blocks_host() {
        let breaker = Arc::new(CircuitBreaker::new(BreakerConfig {
            url_block_threshold: 1,
            host_fail_threshold: 2,
            ..BreakerConfig::default()
        }));
        let engine = HostPolicyEngine::new(create_test_config()).with_breaker(breaker.clone());

        breaker.record_failure("https://example.org/1", Some(404), "");
        breaker.record_failure("https://example.org/2", Some(404), "");

        let decision = engine.check("https://example.org/3");
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("host_blocked"));
    }

    #[test]
    fn test_records_snapshot() {
        let engine = HostPolicyEngine::new(create_test_config());
        engine.report_result("https://b.example/", Some(200));
        engine.report_result("https://a.example/", Some(500));

        let records = engine.records();
        let hosts: Vec<&str> = records.iter().map(|(h, _)| h.as_str()).collect();
        assert_eq!(hosts, vec!["a.example", "b.example", "spam.example"]);
        assert_eq!(records[0].1.consecutive_failure_count, 1);
    }
}
