//! Per-host pacing and concurrency limiting
//!
//! This module handles:
//! - A global cap on in-flight requests
//! - A per-host cap on in-flight requests
//! - A minimum interval between request starts to the same host
//! - Honoring Retry-After deadlines recorded for a host

use crate::config::RateLimitConfig;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// A granted request slot
///
/// Holding a slot keeps one global and one per-host permit checked out.
/// Dropping it (or passing it to [`RateLimiter::release`]) frees both, so the
/// slot is returned on every exit path including errors and cancellation.
#[derive(Debug)]
pub struct RateSlot {
    /// Host this slot was granted for
    pub host: String,

    /// Time spent waiting for pacing and permits
    pub waited: Duration,

    /// Whether a recorded Retry-After deadline delayed this slot
    pub retry_after_respected: bool,

    _host_permit: OwnedSemaphorePermit,
    _global_permit: OwnedSemaphorePermit,
}

impl RateSlot {
    pub fn waited_seconds(&self) -> f64 {
        self.waited.as_secs_f64()
    }
}

/// Counters reported in the run summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct RateLimiterStats {
    pub acquisitions: u64,
    pub total_wait_secs: f64,
    pub max_wait_secs: f64,
    pub retry_after_waits: u64,
    pub hosts_seen: usize,
}

#[derive(Debug)]
struct HostSlots {
    semaphore: Arc<Semaphore>,
    /// Earliest start time for the next request to this host
    next_slot: Option<Instant>,
    /// Deadline requested by the host via Retry-After
    retry_after_until: Option<Instant>,
}

/// Rate limiter shared by every fetch worker of a session
pub struct RateLimiter {
    config: RateLimitConfig,
    global: Arc<Semaphore>,
    hosts: Mutex<HashMap<String, HostSlots>>,
    stats: Mutex<RateLimiterStats>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let global = Arc::new(Semaphore::new(config.max_concurrent_global.max(1)));
        Self {
            config,
            global,
            hosts: Mutex::new(HashMap::new()),
            stats: Mutex::new(RateLimiterStats::default()),
        }
    }

    /// Waits until a request to `host` may start and returns the slot
    ///
    /// # Order of waits
    ///
    /// 1. A per-host permit (bounded concurrent requests per host)
    /// 2. Any recorded Retry-After deadline, then the minimum interval since
    ///    the previous start; the resulting start time is reserved under the
    ///    lock so concurrent workers on one host queue up behind each other
    /// 3. A global permit
    ///
    /// # Returns
    ///
    /// * `Ok(RateSlot)` - The caller may issue the request now
    /// * `Err(AcquireError)` - A semaphore was closed
    pub async fn acquire(&self, host: &str) -> Result<RateSlot, AcquireError> {
        let begin = Instant::now();
        let host_semaphore = {
            let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
            hosts
                .entry(host.to_string())
                .or_insert_with(|| HostSlots {
                    semaphore: Arc::new(Semaphore::new(self.config.max_concurrent_per_host.max(1))),
                    next_slot: None,
                    retry_after_until: None,
                })
                .semaphore
                .clone()
        };

        let host_permit = host_semaphore.acquire_owned().await?;

        let (start_at, retry_after_respected) = self.reserve_start(host);
        if start_at > Instant::now() {
            tracing::trace!(
                "Pacing {} for {:?}",
                host,
                start_at.saturating_duration_since(Instant::now())
            );
            tokio::time::sleep_until(start_at).await;
        }

        let global_permit = self.global.clone().acquire_owned().await?;
        let waited = begin.elapsed();

        {
            let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
            stats.acquisitions += 1;
            stats.total_wait_secs += waited.as_secs_f64();
            stats.max_wait_secs = stats.max_wait_secs.max(waited.as_secs_f64());
            if retry_after_respected {
                stats.retry_after_waits += 1;
            }
        }

        Ok(RateSlot {
            host: host.to_string(),
            waited,
            retry_after_respected,
            _host_permit: host_permit,
            _global_permit: global_permit,
        })
    }

    /// Returns a slot early; equivalent to dropping it
    pub fn release(&self, slot: RateSlot) {
        tracing::trace!("Released slot for {}", slot.host);
        drop(slot);
    }

    /// Records a Retry-After request from `host`
    ///
    /// The next acquire for the host waits at least until the deadline. A
    /// shorter request never shortens an existing deadline. Values that are
    /// not a representable point in the future are ignored.
    pub fn set_retry_after(&self, host: &str, seconds: f64) {
        let Ok(wait) = Duration::try_from_secs_f64(seconds) else {
            return;
        };
        if wait.is_zero() {
            return;
        }
        let Some(until) = Instant::now().checked_add(wait) else {
            tracing::debug!("Ignoring out-of-range Retry-After of {}s from {}", seconds, host);
            return;
        };
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        let entry = hosts.entry(host.to_string()).or_insert_with(|| HostSlots {
            semaphore: Arc::new(Semaphore::new(self.config.max_concurrent_per_host.max(1))),
            next_slot: None,
            retry_after_until: None,
        });
        if entry.retry_after_until.map_or(true, |existing| until > existing) {
            tracing::debug!("Host {} asked us to wait {:.1}s", host, seconds);
            entry.retry_after_until = Some(until);
        }
    }

    /// Requests currently holding a global permit
    pub fn in_flight(&self) -> usize {
        self.config
            .max_concurrent_global
            .max(1)
            .saturating_sub(self.global.available_permits())
    }

    pub fn stats(&self) -> RateLimiterStats {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        stats.hosts_seen = self
            .hosts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len();
        stats
    }

    /// Computes and reserves the start time for the next request to `host`
    fn reserve_start(&self, host: &str) -> (Instant, bool) {
        let now = Instant::now();
        let mut hosts = self.hosts.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(entry) = hosts.get_mut(host) else {
            return (now, false);
        };

        let mut start = now;
        let mut respected = false;

        if let Some(until) = entry.retry_after_until {
            if until > start {
                start = until;
                respected = true;
            } else {
                entry.retry_after_until = None;
            }
        }

        if let Some(next) = entry.next_slot {
            if next > start {
                start = next;
            }
        }

        entry.next_slot = Some(start + self.config.min_interval());
        (start, respected)
    }
}
