//! Per-client fixed-window request counter.

use std::time::{Duration, Instant};

/// Request accounting for a single client.
///
/// The counter carries no synchronization of its own. Callers hold exclusive
/// access (the registry's entry guard) across [`RequestCounter::record`] so the
/// window check and the increment happen as one step.
#[derive(Debug, Clone)]
pub struct RequestCounter {
    /// Requests counted in the current window
    count: u64,
    /// When the current window started
    window_start: Instant,
    /// Most recent request from this client
    last_seen: Instant,
}

impl RequestCounter {
    /// Create an empty counter whose window opens at `now`.
    pub fn new(now: Instant) -> Self {
        Self {
            count: 0,
            window_start: now,
            last_seen: now,
        }
    }

    /// Count one request and report whether it is within `limit`.
    ///
    /// The window restarts at `now` once more than `window` has elapsed since
    /// it opened.
    pub fn record(&mut self, now: Instant, limit: u64, window: Duration) -> bool {
        self.last_seen = now;

        if now.saturating_duration_since(self.window_start) > window {
            self.count = 0;
            self.window_start = now;
        }

        self.count += 1;
        self.count <= limit
    }

    /// Requests counted in the current window.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Remaining quota in the current window.
    pub fn remaining(&self, limit: u64) -> u64 {
        limit.saturating_sub(self.count)
    }

    /// When the current window started.
    pub fn window_start(&self) -> Instant {
        self.window_start
    }

    /// Most recent request from this client.
    pub fn last_seen(&self) -> Instant {
        self.last_seen
    }

    /// Time left before the window resets.
    pub fn duration_until_reset(&self, now: Instant, window: Duration) -> Duration {
        window.saturating_sub(now.saturating_duration_since(self.window_start))
    }

    /// Whether the client has been quiet for longer than `retention`.
    pub fn is_idle(&self, now: Instant, retention: Duration) -> bool {
        now.saturating_duration_since(self.last_seen) > retention
    }
}
