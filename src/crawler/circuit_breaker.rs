//! Per-URL and per-host circuit breaking
//!
//! Only access-denial and not-found signals (401/403/404/410, or error text
//! that says as much) count here. Rate limits and server errors belong to the
//! retry policy and rate limiter and are ignored by the breaker.
//!
//! # URL circuits
//!
//! Each counted failure increments a permanent per-URL counter. At
//! `url_block_threshold` the URL is exhausted for the rest of the run. Host
//! recovery never resets URL exhaustion.
//!
//! # Host circuits
//!
//! | From | Event | To |
//! |------|-------|----|
//! | Closed | failures in window reach `host_fail_threshold` | Open |
//! | Open | cooldown elapsed, next `should_skip` | HalfOpen (one trial request) |
//! | HalfOpen | trial request succeeds | Closed (counters cleared) |
//! | HalfOpen / Open | counted failure | Open (fresh `opened_at`) |
//! | HalfOpen | trial request hits a transient failure | Open (fresh cooldown, not counted) |
//! | HalfOpen | trial request cancelled before reaching the host | HalfOpen (slot freed) |
//!
//! At most one trial request reaches a host per cooldown expiry. A cooldown of `None`
//! keeps open hosts open for the whole run.

use crate::config::BreakerConfig;
use crate::crawler::retry::is_non_retryable_status;
use crate::state::CircuitState;
use crate::url::{dedup_key, host_of};
use regex::Regex;
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Mutex, OnceLock, PoisonError};
use std::time::{Duration, Instant};

fn non_retryable_text() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)\b(401|403|404|410)\b|forbidden|unauthori[sz]ed|not found|access denied|\bgone\b",
        )
        .expect("static regex compiles")
    })
}

/// Returns true if an error message describes an access denial or missing resource
pub fn is_non_retryable_error_text(text: &str) -> bool {
    non_retryable_text().is_match(text)
}

/// Result of [`CircuitBreaker::should_skip`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SkipCheck {
    pub skip: bool,
    /// `url_blocked` or `host_blocked` when skipping
    pub reason: Option<String>,
}

impl SkipCheck {
    fn allow() -> Self {
        Self {
            skip: false,
            reason: None,
        }
    }

    fn deny(reason: &str) -> Self {
        Self {
            skip: true,
            reason: Some(reason.to_string()),
        }
    }
}

/// What a recorded failure did to the breaker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerAction {
    /// Not an access-denial signal; nothing counted
    Ignored,
    /// Counted, no state change
    Recorded,
    /// The URL reached its threshold and is now exhausted
    UrlExhausted,
    /// The host circuit opened
    HostOpened,
    /// A half-open or open host circuit re-opened
    HostReopened,
}

impl fmt::Display for BreakerAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let code = match self {
            Self::Ignored => "ignored",
            Self::Recorded => "recorded",
            Self::UrlExhausted => "url_exhausted",
            Self::HostOpened => "host_opened",
            Self::HostReopened => "host_reopened",
        };
        write!(f, "{}", code)
    }
}

#[derive(Debug, Default)]
struct UrlCircuit {
    failure_count: u32,
    exhausted: bool,
}

#[derive(Debug, Default)]
struct HostCircuit {
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    next_probe_at: Option<Instant>,
    probe_in_flight: bool,
    times_opened: u32,
}

impl HostCircuit {
    fn open(&mut self, now: Instant, cooldown: Option<Duration>) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.next_probe_at = cooldown.and_then(|c| now.checked_add(c));
        self.probe_in_flight = false;
        self.times_opened += 1;
    }

    /// Sends a half-open host back to OPEN for another cooldown without counting a failure
    fn rest(&mut self, now: Instant, cooldown: Option<Duration>) {
        self.state = CircuitState::Open;
        self.next_probe_at = cooldown.and_then(|c| now.checked_add(c));
        self.probe_in_flight = false;
    }

    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(&oldest) = self.failures.front() {
            if now.saturating_duration_since(oldest) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }
}

#[derive(Debug, Default)]
struct BreakerInner {
    urls: HashMap<String, UrlCircuit>,
    hosts: HashMap<String, HostCircuit>,
    failures_recorded: u64,
    failures_ignored: u64,
    url_skips: u64,
    host_skips: u64,
}

/// One host's breaker state as reported in stats
#[derive(Debug, Clone, Serialize)]
pub struct HostCircuitView {
    pub host: String,
    pub state: CircuitState,
    pub recent_failures: usize,
    pub times_opened: u32,
}

/// Snapshot of the breaker for the run summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct BreakerStats {
    pub urls_tracked: usize,
    pub urls_exhausted: usize,
    pub hosts_tracked: usize,
    pub hosts_open: usize,
    pub hosts_half_open: usize,
    pub failures_recorded: u64,
    pub failures_ignored: u64,
    pub url_skips: u64,
    pub host_skips: u64,
    pub hosts: Vec<HostCircuitView>,
}

/// Circuit breaker shared by all fetch workers of a session
///
/// All state sits behind one mutex so concurrent workers touching the same
/// host serialize their updates.
pub struct CircuitBreaker {
    config: BreakerConfig,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(BreakerInner::default()),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BreakerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks whether a fetch of `url` should be skipped
    pub fn should_skip(&self, url: &str) -> SkipCheck {
        self.should_skip_at(url, Instant::now())
    }

    /// [`should_skip`](Self::should_skip) at an explicit instant
    ///
    /// An open host whose cooldown has elapsed moves to HalfOpen here and this
    /// call becomes its single probe.
    pub fn should_skip_at(&self, url: &str, now: Instant) -> SkipCheck {
        let key = url_key(url);
        let mut inner = self.lock();

        if inner.urls.get(&key).is_some_and(|u| u.exhausted) {
            inner.url_skips += 1;
            return SkipCheck::deny("url_blocked");
        }

        let Some(host) = host_of(url) else {
            return SkipCheck::allow();
        };
        let Some(circuit) = inner.hosts.get_mut(&host) else {
            return SkipCheck::allow();
        };

        let check = match circuit.state {
            CircuitState::Closed => SkipCheck::allow(),
            CircuitState::Open => match circuit.next_probe_at {
                Some(probe_at) if now >= probe_at => {
                    circuit.state = CircuitState::HalfOpen;
                    circuit.probe_in_flight = true;
                    tracing::info!("Host {} half-open, allowing probe {}", host, url);
                    SkipCheck::allow()
                }
                _ => SkipCheck::deny("host_blocked"),
            },
            CircuitState::HalfOpen => {
                if circuit.probe_in_flight {
                    SkipCheck::deny("host_blocked")
                } else {
                    circuit.probe_in_flight = true;
                    SkipCheck::allow()
                }
            }
        };

        if check.skip {
            inner.host_skips += 1;
        }
        check
    }

    /// Records a failed fetch
    ///
    /// # Arguments
    ///
    /// * `url` - The URL that failed
    /// * `status` - HTTP status, if one was received
    /// * `error_text` - Error description; consulted only when `status` is `None`
    pub fn record_failure(&self, url: &str, status: Option<u16>, error_text: &str) -> BreakerAction {
        self.record_failure_at(url, status, error_text, Instant::now())
    }

    pub fn record_failure_at(
        &self,
        url: &str,
        status: Option<u16>,
        error_text: &str,
        now: Instant,
    ) -> BreakerAction {
        let counts = match status {
            Some(code) => is_non_retryable_status(code),
            None => is_non_retryable_error_text(error_text),
        };
        let host = host_of(url);
        let mut inner = self.lock();

        if !counts {
            inner.failures_ignored += 1;
            let cooldown = self.config.cooldown();
            if let Some(circuit) = host.as_ref().and_then(|h| inner.hosts.get_mut(h)) {
                if circuit.state == CircuitState::HalfOpen {
                    circuit.rest(now, cooldown);
                    tracing::debug!("Probe of {} was inconclusive, waiting another cooldown", url);
                }
            }
            return BreakerAction::Ignored;
        }

        inner.failures_recorded += 1;

        let mut action = BreakerAction::Recorded;
        let url_circuit = inner.urls.entry(url_key(url)).or_default();
        url_circuit.failure_count += 1;
        if !url_circuit.exhausted && url_circuit.failure_count >= self.config.url_block_threshold {
            url_circuit.exhausted = true;
            action = BreakerAction::UrlExhausted;
            tracing::info!("URL exhausted after {} failures: {}", url_circuit.failure_count, url);
        }

        let Some(host) = host else {
            return action;
        };
        let cooldown = self.config.cooldown();
        let circuit = inner.hosts.entry(host.clone()).or_default();
        circuit.failures.push_back(now);
        circuit.prune(now, self.config.window());

        match circuit.state {
            CircuitState::Closed => {
                if circuit.failures.len() as u32 >= self.config.host_fail_threshold {
                    circuit.open(now, cooldown);
                    tracing::warn!(
                        "Circuit opened for host {} after {} failures",
                        host,
                        circuit.failures.len()
                    );
                    action = BreakerAction::HostOpened;
                }
            }
            CircuitState::HalfOpen | CircuitState::Open => {
                circuit.open(now, cooldown);
                tracing::warn!("Circuit re-opened for host {}", host);
                action = BreakerAction::HostReopened;
            }
        }

        action
    }

    /// Records a successful fetch; closes a half-open host
    ///
    /// Successes never clear per-URL counters and are ignored while a host is
    /// fully open.
    pub fn record_success(&self, url: &str) {
        let Some(host) = host_of(url) else {
            return;
        };
        let mut inner = self.lock();
        if let Some(circuit) = inner.hosts.get_mut(&host) {
            if circuit.state == CircuitState::HalfOpen {
                circuit.state = CircuitState::Closed;
                circuit.failures.clear();
                circuit.opened_at = None;
                circuit.next_probe_at = None;
                circuit.probe_in_flight = false;
                tracing::info!("Circuit closed for host {} after successful probe", host);
            }
        }
    }

    /// Gives back a probe slot that was granted but never used
    pub fn cancel_probe(&self, url: &str) {
        let Some(host) = host_of(url) else {
            return;
        };
        let mut inner = self.lock();
        if let Some(circuit) = inner.hosts.get_mut(&host) {
            if circuit.state == CircuitState::HalfOpen {
                circuit.probe_in_flight = false;
            }
        }
    }

    /// Read-only view of a host's circuit state (no time-based transitions)
    pub fn host_state(&self, host: &str) -> CircuitState {
        self.lock()
            .hosts
            .get(host)
            .map(|c| c.state)
            .unwrap_or_default()
    }

    pub fn is_url_exhausted(&self, url: &str) -> bool {
        self.lock()
            .urls
            .get(&url_key(url))
            .is_some_and(|u| u.exhausted)
    }

    pub fn get_stats(&self) -> BreakerStats {
        let inner = self.lock();
        let mut hosts: Vec<HostCircuitView> = inner
            .hosts
            .iter()
            .map(|(host, circuit)| HostCircuitView {
                host: host.clone(),
                state: circuit.state,
                recent_failures: circuit.failures.len(),
                times_opened: circuit.times_opened,
            })
            .collect();
        hosts.sort_by(|a, b| a.host.cmp(&b.host));

        BreakerStats {
            urls_tracked: inner.urls.len(),
            urls_exhausted: inner.urls.values().filter(|u| u.exhausted).count(),
            hosts_tracked: inner.hosts.len(),
            hosts_open: hosts.iter().filter(|h| h.state == CircuitState::Open).count(),
            hosts_half_open: hosts
                .iter()
                .filter(|h| h.state == CircuitState::HalfOpen)
                .count(),
            failures_recorded: inner.failures_recorded,
            failures_ignored: inner.failures_ignored,
            url_skips: inner.url_skips,
            host_skips: inner.host_skips,
            hosts,
        }
    }
}

fn url_key(url: &str) -> String {
    dedup_key(url).unwrap_or_else(|| url.to_string())
}
