//! Core rate limiter implementation.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

use super::client::ClientKey;
use super::clock::{Clock, SystemClock};
use super::counter::RequestCounter;

/// Default requests allowed per client per window.
const DEFAULT_LIMIT: u64 = 100;
/// Default window length.
const DEFAULT_WINDOW: Duration = Duration::from_secs(60);
/// Default idle time before a counter becomes eligible for sweeping.
const DEFAULT_IDLE_RETENTION: Duration = Duration::from_secs(300);

/// Limits applied to every client counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LimitConfig {
    /// Maximum requests allowed in the window
    pub limit: u64,
    /// Length of the counting window
    pub window: Duration,
    /// Idle time after which a counter is swept
    pub idle_retention: Duration,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            window: DEFAULT_WINDOW,
            idle_retention: DEFAULT_IDLE_RETENTION,
        }
    }
}

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// Forward the request.
    Allow,
    /// Reject the request with 429.
    Deny,
}

/// The admission decision together with the counter state it was made on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdmissionStatus {
    /// Whether the request may proceed
    pub admission: Admission,
    /// Requests counted in the window, including this one
    pub count: u64,
    /// Requests allowed per window
    pub limit: u64,
    /// Requests left in the window after this one
    pub remaining: u64,
    /// Time until the current window ends
    pub duration_until_reset: Duration,
}

impl AdmissionStatus {
    /// Returns true if the request was admitted.
    pub fn is_allowed(&self) -> bool {
        self.admission == Admission::Allow
    }
}

/// Per-client fixed-window rate limiter.
///
/// This struct is thread-safe and can be shared across multiple tasks. Each
/// client's check-and-increment runs under the registry's entry guard, so
/// concurrent requests from one client never read a stale count.
#[derive(Debug)]
pub struct RateLimiter {
    /// Request counters indexed by client key
    counters: DashMap<ClientKey, RequestCounter>,
    config: LimitConfig,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a new rate limiter reading the system clock.
    pub fn new(config: LimitConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a new rate limiter with an explicit time source.
    pub fn with_clock(config: LimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            counters: DashMap::new(),
            config,
            clock,
        }
    }

    /// Count a request from `key` and decide whether to admit it.
    pub fn admit(&self, key: &ClientKey) -> AdmissionStatus {
        let now = self.clock.now();
        let LimitConfig { limit, window, .. } = self.config;

        trace!(client = %key, "Checking rate limit");

        let status = {
            let mut counter = self.counters.entry(key.clone()).or_insert_with(|| {
                debug!(client = %key, limit, "Creating new request counter");
                RequestCounter::new(now)
            });

            let within_limit = counter.record(now, limit, window);

            AdmissionStatus {
                admission: if within_limit {
                    Admission::Allow
                } else {
                    Admission::Deny
                },
                count: counter.count(),
                limit,
                remaining: counter.remaining(limit),
                duration_until_reset: counter.duration_until_reset(now, window),
            }
        };

        if !status.is_allowed() {
            debug!(
                client = %key,
                count = status.count,
                limit,
                reset_in_ms = status.duration_until_reset.as_millis() as u64,
                "Rate limit exceeded"
            );
        }

        status
    }

    /// Remove counters idle for longer than the retention window.
    ///
    /// Returns the number of evicted counters.
    pub fn sweep(&self) -> usize {
        let now = self.clock.now();
        let retention = self.config.idle_retention;
        let mut evicted = 0;

        self.counters.retain(|_, counter| {
            let idle = counter.is_idle(now, retention);
            if idle {
                evicted += 1;
            }
            !idle
        });

        if evicted > 0 {
            info!(evicted, remaining = self.counters.len(), "Swept idle request counters");
        } else {
            debug!(remaining = self.counters.len(), "Sweep found no idle request counters");
        }

        evicted
    }

    /// Get the current count for a client.
    ///
    /// Returns `None` if no counter exists for the key.
    pub fn counter_value(&self, key: &ClientKey) -> Option<u64> {
        self.counters.get(key).map(|c| c.count())
    }

    /// Clear all counters.
    pub fn clear(&self) {
        self.counters.clear();
    }

    /// Get the number of tracked clients.
    pub fn counter_count(&self) -> usize {
        self.counters.len()
    }

    pub fn config(&self) -> &LimitConfig {
        &self.config
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(LimitConfig::default())
    }
}
