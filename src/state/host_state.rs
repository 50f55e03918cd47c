use crate::config::HostPolicyConfig;
use serde::Serialize;
use std::fmt;
use std::time::{Duration, Instant};

/// Access state of a host as seen by the host policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    /// Requests allowed
    Ok,
    /// Host answered 429; denied until its throttle cooldown expires
    Throttled,
    /// Denylisted, repeatedly forbidden, behind a bot wall, or breaker-open
    Blocked,
    /// Content needs a JavaScript runtime; sticky until cleared
    JsRequired,
}

impl HostState {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Throttled => "throttled",
            Self::Blocked => "blocked",
            Self::JsRequired => "js_required",
        }
    }

    /// Returns true if requests to the host are currently refused
    pub fn denies(&self) -> bool {
        !matches!(self, Self::Ok)
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Tracks what the host policy knows about one host during a run
///
/// Records are derived from fetch results and content signals. They live for
/// a single research session and are never written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct HostRecord {
    /// Current access state
    pub state: HostState,

    /// Consecutive non-success results (any status or network error)
    pub consecutive_failure_count: u32,

    /// Consecutive HTTP 403 results; promotes the host to Blocked
    pub consecutive_forbidden: u32,

    /// Last HTTP status observed, if the last attempt produced one
    pub last_status: Option<u16>,

    /// Why the host is in its current non-Ok state
    pub reason: Option<String>,

    /// When the last result was reported
    #[serde(skip)]
    pub last_attempt_time: Option<Instant>,

    /// End of the current throttle window
    #[serde(skip)]
    pub throttled_until: Option<Instant>,

    /// Exempt from automatic blocking (allowlisted)
    pub exempt: bool,
}

impl HostRecord {
    /// Creates a new HostRecord in the Ok state
    pub fn new() -> Self {
        Self {
            state: HostState::Ok,
            consecutive_failure_count: 0,
            consecutive_forbidden: 0,
            last_status: None,
            reason: None,
            last_attempt_time: None,
            throttled_until: None,
            exempt: false,
        }
    }

    /// Creates a record that starts out blocked (denylisted host)
    pub fn blocked(reason: &str) -> Self {
        Self {
            state: HostState::Blocked,
            reason: Some(reason.to_string()),
            ..Self::new()
        }
    }

    /// Creates a record exempt from automatic blocking (allowlisted host)
    pub fn exempt() -> Self {
        Self {
            exempt: true,
            ..Self::new()
        }
    }

    /// Resolves time-based transitions and returns the effective state
    ///
    /// A Throttled host whose cooldown has expired drops back to Ok.
    pub fn refresh(&mut self, now: Instant) -> HostState {
        if self.state == HostState::Throttled {
            if let Some(until) = self.throttled_until {
                if now >= until {
                    self.state = HostState::Ok;
                    self.throttled_until = None;
                    self.reason = None;
                }
            }
        }
        self.state
    }

    /// Applies a fetch result to the record
    ///
    /// * 2xx clears both failure streaks
    /// * 403 extends the forbidden streak; at the block threshold the host is Blocked
    /// * 429 throttles the host for `throttle_cooldown_seconds`
    /// * anything else (including `None` for network errors) extends the failure streak
    ///
    /// Blocked and JsRequired are sticky and are not changed by results.
    pub fn record_status(&mut self, status: Option<u16>, config: &HostPolicyConfig, now: Instant) {
        self.last_status = status;
        self.last_attempt_time = Some(now);

        match status {
            Some(code) if (200..300).contains(&code) => {
                self.consecutive_failure_count = 0;
                self.consecutive_forbidden = 0;
            }
            Some(403) => {
                self.consecutive_failure_count += 1;
                self.consecutive_forbidden += 1;
                if !self.exempt
                    && self.consecutive_forbidden >= config.host_block_threshold
                    && !self.is_sticky()
                {
                    self.state = HostState::Blocked;
                    self.reason = Some(format!(
                        "{} consecutive 403 responses",
                        self.consecutive_forbidden
                    ));
                }
            }
            Some(429) => {
                self.consecutive_failure_count += 1;
                self.consecutive_forbidden = 0;
                if !self.is_sticky() {
                    self.state = HostState::Throttled;
                    self.throttled_until =
                        Some(now + Duration::from_secs(config.throttle_cooldown_seconds));
                    self.reason = Some("http 429".to_string());
                }
            }
            _ => {
                self.consecutive_failure_count += 1;
                self.consecutive_forbidden = 0;
            }
        }
    }

    /// Marks the host as needing a JavaScript runtime (sticky)
    pub fn mark_js_required(&mut self, reason: &str) {
        if self.exempt || self.state == HostState::Blocked {
            return;
        }
        self.state = HostState::JsRequired;
        self.reason = Some(reason.to_string());
    }

    /// Marks the host as blocked (sticky)
    pub fn mark_blocked(&mut self, reason: &str) {
        if self.exempt {
            return;
        }
        self.state = HostState::Blocked;
        self.reason = Some(reason.to_string());
    }

    /// Clears any non-Ok state and both failure streaks
    pub fn clear(&mut self) {
        self.state = HostState::Ok;
        self.reason = None;
        self.throttled_until = None;
        self.consecutive_failure_count = 0;
        self.consecutive_forbidden = 0;
    }

    /// Time left on the throttle window, if throttled
    pub fn throttle_remaining(&self, now: Instant) -> Option<Duration> {
        match (self.state, self.throttled_until) {
            (HostState::Throttled, Some(until)) if until > now => Some(until - now),
            _ => None,
        }
    }

    fn is_sticky(&self) -> bool {
        matches!(self.state, HostState::Blocked | HostState::JsRequired)
    }
}

impl Default for HostRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> HostPolicyConfig {
        HostPolicyConfig {
            host_block_threshold: 3,
            throttle_cooldown_seconds: 60,
            ..HostPolicyConfig::default()
        }
    }

    #[test]
    fn test_new_host_record() {
        let record = HostRecord::new();
        assert_eq!(record.state, HostState::Ok);
        assert_eq!(record.consecutive_failure_count, 0);
        assert!(record.last_status.is_none());
        assert!(record.last_attempt_time.is_none());
    }

    #[test]
    fn test_forbidden_streak_blocks_at_threshold() {
        let config = create_test_config();
        let mut record = HostRecord::new();
        let now = Instant::now();

        record.record_status(Some(403), &config, now);
        record.record_status(Some(403), &config, now);
        assert_eq!(record.state, HostState::Ok);

        record.record_status(Some(403), &config, now);
        assert_eq!(record.state, HostState::Blocked);
        assert_eq!(record.consecutive_forbidden, 3);
    }

    #[test]
    fn test_success_breaks_forbidden_streak() {
        let config = create_test_config();
        let mut record = HostRecord::new();
        let now = Instant::now();

        record.record_status(Some(403), &config, now);
        record.record_status(Some(403), &config, now);
        record.record_status(Some(200), &config, now);
        record.record_status(Some(403), &config, now);

        assert_eq!(record.state, HostState::Ok);
        assert_eq!(record.consecutive_forbidden, 1);
    }

    #[test]
    fn test_exempt_host_never_blocked_by_forbidden() {
        let config = create_test_config();
        let mut record = HostRecord::exempt();
        let now = Instant::now();

        for _ in 0..10 {
            record.record_status(Some(403), &config, now);
        }
        assert_eq!(record.state, HostState::Ok);
    }

    #[test]
    fn test_throttle_expires() {
        let config = create_test_config();
        let mut record = HostRecord::new();
        let now = Instant::now();

        record.record_status(Some(429), &config, now);
        assert_eq!(record.refresh(now), HostState::Throttled);
        assert_eq!(
            record.throttle_remaining(now),
            Some(Duration::from_secs(60))
        );

        let later = now + Duration::from_secs(30);
        assert_eq!(record.refresh(later), HostState::Throttled);

        let after = now + Duration::from_secs(61);
        assert_eq!(record.refresh(after), HostState::Ok);
        assert!(record.throttle_remaining(after).is_none());
    }

    #[test]
    fn test_js_required_is_sticky() {
        let config = create_test_config();
        let mut record = HostRecord::new();
        let now = Instant::now();

        record.mark_js_required("client-rendered");
        record.record_status(Some(200), &config, now);
        record.record_status(Some(429), &config, now);
        assert_eq!(record.refresh(now + Duration::from_secs(3600)), HostState::JsRequired);

        record.clear();
        assert_eq!(record.state, HostState::Ok);
    }

    #[test]
    fn test_network_error_counts_as_failure() {
        let config = create_test_config();
        let mut record = HostRecord::new();
        let now = Instant::now();

        record.record_status(None, &config, now);
        record.record_status(Some(503), &config, now);
        assert_eq!(record.consecutive_failure_count, 2);
        assert_eq!(record.state, HostState::Ok);
        assert_eq!(record.last_status, Some(503));
    }

    #[test]
    fn test_blocked_constructor() {
        let record = HostRecord::blocked("denylisted");
        assert_eq!(record.state, HostState::Blocked);
        assert_eq!(record.reason.as_deref(), Some("denylisted"));
        assert!(HostState::Blocked.denies());
        assert!(!HostState::Ok.denies());
    }
}
