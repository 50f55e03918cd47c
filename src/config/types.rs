use serde::Deserialize;
use std::time::Duration;

/// Main configuration structure for Sumi-Delve
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(rename = "user-agent")]
    pub user_agent: UserAgentConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default, rename = "rate-limit")]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default, rename = "host-policy")]
    pub host_policy: HostPolicyConfig,
    #[serde(default)]
    pub budget: BudgetConfig,
    #[serde(default)]
    pub termination: TerminationConfig,
    #[serde(default)]
    pub phases: PhaseConfig,
    /// Static sources offered to the built-in search collaborator
    #[serde(default, rename = "source")]
    pub sources: Vec<SourceEntry>,
}

impl Config {
    /// Builds a configuration with every optional section at its default
    pub fn new(user_agent: UserAgentConfig) -> Self {
        Self {
            user_agent,
            fetch: FetchConfig::default(),
            retry: RetryConfig::default(),
            rate_limit: RateLimitConfig::default(),
            breaker: BreakerConfig::default(),
            host_policy: HostPolicyConfig::default(),
            budget: BudgetConfig::default(),
            termination: TerminationConfig::default(),
            phases: PhaseConfig::default(),
            sources: Vec::new(),
        }
    }
}

/// User agent identification configuration
#[derive(Debug, Clone, Deserialize)]
pub struct UserAgentConfig {
    /// Name of the crawler
    #[serde(rename = "crawler-name")]
    pub crawler_name: String,

    /// Version of the crawler
    #[serde(rename = "crawler-version")]
    pub crawler_version: String,

    /// URL with information about the crawler
    #[serde(rename = "contact-url")]
    pub contact_url: String,

    /// Email address for crawler-related contact
    #[serde(rename = "contact-email")]
    pub contact_email: String,
}

impl UserAgentConfig {
    /// Format: CrawlerName/Version (+ContactURL; ContactEmail)
    pub fn header_value(&self) -> String {
        format!(
            "{}/{} (+{}; {})",
            self.crawler_name, self.crawler_version, self.contact_url, self.contact_email
        )
    }
}

/// Per-request HTTP settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetchConfig {
    /// Whole-request timeout per attempt (seconds)
    pub request_timeout_secs: u64,

    /// TCP/TLS connect timeout (seconds)
    pub connect_timeout_secs: u64,

    /// Fetch size cap; bodies are cut off once this many bytes arrive
    pub max_bytes_per_fetch: usize,

    /// Maximum redirect hops followed per request
    pub max_redirects: usize,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 20,
            connect_timeout_secs: 10,
            max_bytes_per_fetch: 2_000_000,
            max_redirects: 10,
        }
    }
}

/// Retry policy knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RetryConfig {
    /// Attempts per URL before giving up, whatever the status
    pub max_attempts_per_url: u32,

    /// Backoff base in seconds; attempt n waits `base * 2^(n-1)`
    pub base_backoff_secs: f64,

    /// Cap on the exponential part of the backoff
    pub max_backoff_secs: f64,

    /// Symmetric jitter as a fraction of the computed backoff (0.0..=1.0)
    pub jitter_fraction: f64,

    /// Absolute ceiling on any wait, Retry-After included
    pub max_wait_secs: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts_per_url: 3,
            base_backoff_secs: 1.0,
            max_backoff_secs: 30.0,
            jitter_fraction: 0.25,
            max_wait_secs: 60.0,
        }
    }
}

/// Per-host pacing and concurrency caps
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct RateLimitConfig {
    /// Minimum time between two requests to the same host (seconds)
    pub min_interval_sec: f64,

    /// Concurrent in-flight requests allowed per host
    pub max_concurrent_per_host: usize,

    /// Concurrent in-flight requests allowed overall (also the worker pool size)
    pub max_concurrent_global: usize,
}

impl RateLimitConfig {
    pub fn min_interval(&self) -> Duration {
        Duration::from_secs_f64(self.min_interval_sec.max(0.0))
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            min_interval_sec: 1.0,
            max_concurrent_per_host: 2,
            max_concurrent_global: 8,
        }
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BreakerConfig {
    /// Non-retryable failures after which a URL is exhausted for the run
    pub url_block_threshold: u32,

    /// Non-retryable failures within the window that open a host
    pub host_fail_threshold: u32,

    /// Rolling window for host failure counting (seconds)
    pub window_seconds: u64,

    /// How long an open host stays open before a probe is allowed (seconds)
    pub cooldown_seconds: u64,

    /// Never probe an open host again during the run
    pub permanent_host_block: bool,
}

impl BreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }

    /// `None` means an open host never recovers
    pub fn cooldown(&self) -> Option<Duration> {
        if self.permanent_host_block {
            None
        } else {
            Some(Duration::from_secs(self.cooldown_seconds))
        }
    }
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            url_block_threshold: 2,
            host_fail_threshold: 3,
            window_seconds: 300,
            cooldown_seconds: 600,
            permanent_host_block: false,
        }
    }
}

/// Host policy configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HostPolicyConfig {
    /// Consecutive 403 responses that promote a host to Blocked
    pub host_block_threshold: u32,

    /// How long a host stays Throttled after a 429 (seconds)
    pub throttle_cooldown_seconds: u64,

    /// Host patterns denied from the start (e.g. "*.pinterest.com")
    pub deny: Vec<String>,

    /// Host patterns never blocked automatically
    pub allow: Vec<String>,
}

impl Default for HostPolicyConfig {
    fn default() -> Self {
        Self {
            host_block_threshold: 3,
            throttle_cooldown_seconds: 60,
            deny: Vec::new(),
            allow: Vec::new(),
        }
    }
}

/// Run-wide fetch budgets
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct BudgetConfig {
    /// Distinct URLs dispatched to the network
    pub max_urls: usize,

    /// Network attempts, retries included
    pub max_fetches: usize,

    /// Wall-clock budget for all fetching (seconds)
    pub max_time_sec: u64,

    /// Total body bytes downloaded
    pub max_bytes: u64,

    /// Extra time in-flight fetches get after the time budget before cancellation
    pub hard_deadline_grace_sec: u64,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            max_urls: 200,
            max_fetches: 400,
            max_time_sec: 600,
            max_bytes: 200_000_000,
            hard_deadline_grace_sec: 15,
        }
    }
}

/// Utility weights for the termination evaluator
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UtilityWeights {
    pub coverage: f64,
    pub evidence: f64,
    pub telephone: f64,
    pub status: f64,
}

impl Default for UtilityWeights {
    fn default() -> Self {
        Self {
            coverage: 1.0,
            evidence: 0.5,
            telephone: 0.25,
            status: 0.5,
        }
    }
}

/// Termination / convergence knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct TerminationConfig {
    /// Coverage needed before convergence or low utility may stop the run
    pub target_coverage: f64,

    /// Coverage needed for a budget-exceeded stop
    pub min_coverage: f64,

    /// Average absolute confidence change below which the watched set has converged
    pub eps: f64,

    /// Number of trailing round transitions inspected for convergence
    pub tau: usize,

    /// Size of the watched claim set (top claims by evidence mass)
    pub top_k: usize,

    /// Marginal utility below which a round counts as low-yield
    pub mu_threshold: f64,

    /// Consecutive low-yield rounds that confirm diminishing returns (N)
    pub low_mu_streak: u32,

    /// Minimum telephone-risk drop that counts as an improvement
    pub telephone_drop_threshold: f64,

    /// Floor for round cost when computing marginal utility
    pub cost_floor: f64,

    /// Cumulative budget at which the run stops unconditionally
    pub hard_cap_budget: f64,

    /// Round index at which the run stops unconditionally
    pub hard_cap_rounds: u32,

    pub weights: UtilityWeights,
}

impl Default for TerminationConfig {
    fn default() -> Self {
        Self {
            target_coverage: 0.8,
            min_coverage: 0.5,
            eps: 0.05,
            tau: 2,
            top_k: 5,
            mu_threshold: 0.05,
            low_mu_streak: 2,
            telephone_drop_threshold: 0.1,
            cost_floor: 1e-6,
            hard_cap_budget: 400.0,
            hard_cap_rounds: 8,
            weights: UtilityWeights::default(),
        }
    }
}

/// Phase runner and handler knobs
#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PhaseConfig {
    /// Rollbacks allowed per session (VERIFY -> DEEP)
    pub max_rollbacks: u32,

    /// Phase invocations allowed per run before the runner gives up
    pub max_steps: u32,

    /// URLs fetched during WIDE discovery
    pub wide_fetch_limit: usize,

    /// New URLs fetched per DEEP round
    pub deep_urls_per_round: usize,

    /// Claims kept after normalization
    pub max_claims: usize,

    /// Evidence mass below which VERIFY treats a claim as insufficiently supported
    pub min_evidence_mass: f64,

    /// Supporting evidence mass needed (from two or more hosts) to mark a claim verified
    pub verify_evidence_mass: f64,

    /// Fraction of insufficient claims that triggers a rollback
    pub rollback_insufficient_fraction: f64,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            max_rollbacks: 2,
            max_steps: 64,
            wide_fetch_limit: 8,
            deep_urls_per_round: 12,
            max_claims: 40,
            min_evidence_mass: 1.0,
            verify_evidence_mass: 2.0,
            rollback_insufficient_fraction: 0.5,
        }
    }
}

/// A source offered to the built-in static search collaborator
#[derive(Debug, Clone, Deserialize)]
pub struct SourceEntry {
    pub url: String,

    #[serde(default)]
    pub title: String,

    #[serde(default)]
    pub snippet: String,

    /// RFC 3339 publication timestamp
    #[serde(default, rename = "published-at")]
    pub published_at: Option<String>,
}
