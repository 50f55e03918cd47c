//! Run-wide fetch budgets
//!
//! Counters are atomic so every worker can claim budget without a lock. Once
//! any budget is exhausted no new URL or attempt is started; work already in
//! flight runs on until the hard deadline.

use crate::config::BudgetConfig;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

/// Which budget ran out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BudgetKind {
    Urls,
    Fetches,
    Time,
    Bytes,
}

impl BudgetKind {
    pub fn as_code(&self) -> &'static str {
        match self {
            Self::Urls => "urls",
            Self::Fetches => "fetches",
            Self::Time => "time",
            Self::Bytes => "bytes",
        }
    }
}

impl fmt::Display for BudgetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_code())
    }
}

/// Budget consumption snapshot
#[derive(Debug, Clone, Serialize)]
pub struct BudgetUsage {
    pub urls: usize,
    pub max_urls: usize,
    pub fetches: usize,
    pub max_fetches: usize,
    pub bytes: u64,
    pub max_bytes: u64,
    pub elapsed_secs: f64,
    pub max_time_secs: u64,
    pub exhausted: Option<BudgetKind>,
}

/// Tracks budget consumption for one research session
#[derive(Debug)]
pub struct BudgetTracker {
    config: BudgetConfig,
    started: Instant,
    urls: AtomicUsize,
    fetches: AtomicUsize,
    bytes: AtomicU64,
}

impl BudgetTracker {
    pub fn new(config: BudgetConfig) -> Self {
        Self {
            config,
            started: Instant::now(),
            urls: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            bytes: AtomicU64::new(0),
        }
    }

    /// End of the time budget
    pub fn deadline(&self) -> Instant {
        self.started + Duration::from_secs(self.config.max_time_sec)
    }

    /// Point at which in-flight work is cancelled
    pub fn hard_deadline(&self) -> Instant {
        self.deadline() + Duration::from_secs(self.config.hard_deadline_grace_sec)
    }

    /// Returns the first exhausted budget, if any
    ///
    /// A counter at its maximum counts as exhausted: nothing more may start.
    pub fn exhausted(&self) -> Option<BudgetKind> {
        if Instant::now() >= self.deadline() {
            Some(BudgetKind::Time)
        } else if self.bytes.load(Ordering::SeqCst) >= self.config.max_bytes {
            Some(BudgetKind::Bytes)
        } else if self.fetches.load(Ordering::SeqCst) >= self.config.max_fetches {
            Some(BudgetKind::Fetches)
        } else if self.urls.load(Ordering::SeqCst) >= self.config.max_urls {
            Some(BudgetKind::Urls)
        } else {
            None
        }
    }

    /// Claims one distinct URL
    pub fn try_start_url(&self) -> Result<(), BudgetKind> {
        self.check_time_and_bytes()?;
        if !claim(&self.urls, self.config.max_urls) {
            return Err(BudgetKind::Urls);
        }
        Ok(())
    }

    /// Claims one network attempt
    pub fn try_start_fetch(&self) -> Result<(), BudgetKind> {
        self.check_time_and_bytes()?;
        if !claim(&self.fetches, self.config.max_fetches) {
            return Err(BudgetKind::Fetches);
        }
        Ok(())
    }

    pub fn add_bytes(&self, bytes: u64) {
        self.bytes.fetch_add(bytes, Ordering::SeqCst);
    }

    /// Network attempts made so far
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn max_fetches(&self) -> usize {
        self.config.max_fetches
    }

    pub fn usage(&self) -> BudgetUsage {
        BudgetUsage {
            urls: self.urls.load(Ordering::SeqCst),
            max_urls: self.config.max_urls,
            fetches: self.fetches.load(Ordering::SeqCst),
            max_fetches: self.config.max_fetches,
            bytes: self.bytes.load(Ordering::SeqCst),
            max_bytes: self.config.max_bytes,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            max_time_secs: self.config.max_time_sec,
            exhausted: self.exhausted(),
        }
    }

    fn check_time_and_bytes(&self) -> Result<(), BudgetKind> {
        if Instant::now() >= self.deadline() {
            return Err(BudgetKind::Time);
        }
        if self.bytes.load(Ordering::SeqCst) >= self.config.max_bytes {
            return Err(BudgetKind::Bytes);
        }
        Ok(())
    }
}

/// Increments `counter` unless it already reached `max`; false when full
fn claim(counter: &AtomicUsize, max: usize) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
            if n < max {
                Some(n + 1)
            } else {
                None
            }
        })
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_config() -> BudgetConfig {
        BudgetConfig {
            max_urls: 2,
            max_fetches: 3,
            max_time_sec: 60,
            max_bytes: 1000,
            hard_deadline_grace_sec: 5,
        }
    }

    #[tokio::test]
    async fn test_url_and_fetch_caps() {
        let budget = BudgetTracker::new(create_test_config());
        assert!(budget.try_start_url().is_ok());
        assert!(budget.try_start_url().is_ok());
        assert_eq!(budget.try_start_url(), Err(BudgetKind::Urls));

        for _ in 0..3 {
            assert!(budget.try_start_fetch().is_ok());
        }
        assert_eq!(budget.try_start_fetch(), Err(BudgetKind::Fetches));
        assert_eq!(budget.fetches(), 3);
        assert_eq!(budget.exhausted(), Some(BudgetKind::Fetches));
    }

    #[tokio::test]
    async fn test_bytes_cap_stops_everything() {
        let budget = BudgetTracker::new(create_test_config());
        budget.add_bytes(1000);
        assert_eq!(budget.try_start_url(), Err(BudgetKind::Bytes));
        assert_eq!(budget.try_start_fetch(), Err(BudgetKind::Bytes));
        assert_eq!(budget.usage().exhausted, Some(BudgetKind::Bytes));
    }

    #[tokio::test(start_paused = true)]
    async fn test_time_budget_and_deadlines() {
        let budget = BudgetTracker::new(create_test_config());
        assert_eq!(budget.hard_deadline() - budget.deadline(), Duration::from_secs(5));
        assert!(budget.exhausted().is_none());

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(budget.exhausted(), Some(BudgetKind::Time));
        assert_eq!(budget.try_start_fetch(), Err(BudgetKind::Time));
    }

    #[test]
    fn test_claim_stops_at_max() {
        let counter = AtomicUsize::new(0);
        assert!(claim(&counter, 2));
        assert!(claim(&counter, 2));
        assert!(!claim(&counter, 2));
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_usage_snapshot() {
        let budget = BudgetTracker::new(create_test_config());
        budget.try_start_url().unwrap();
        budget.try_start_fetch().unwrap();
        budget.add_bytes(10);

        let usage = budget.usage();
        assert_eq!(usage.urls, 1);
        assert_eq!(usage.fetches, 1);
        assert_eq!(usage.bytes, 10);
        assert_eq!(usage.max_urls, 2);
        assert!(usage.exhausted.is_none());
    }
}
