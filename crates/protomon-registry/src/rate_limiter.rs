//! Per-source connection-attempt limiter.
//!
//! Each source gets its own counting window: at most `max_attempts`
//! connection attempts are allowed until `window` has elapsed since the
//! window started. Throttling one source never affects another.
//!
//! The limiter is advisory to new attempts only; it never touches an
//! established connection. All time values are passed in by the caller.

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use protomon_core::config::RateLimitConfig;

// ─── Types ───────────────────────────────────────────────────────────

/// Outcome of a connection-attempt check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ConnectDecision {
    /// Caller may attempt a connection. `remaining` attempts are left in
    /// the current window after this one.
    Allowed { remaining: u32 },
    /// Caller must not attempt a connection before the window rolls over.
    RateLimited {
        #[serde(with = "millis")]
        retry_after: TimeDelta,
        /// Rejections in this window, including this one.
        rejected_in_window: u32,
    },
}

impl ConnectDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }
}

/// Counting window for one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitState {
    pub window_start: DateTime<Utc>,
    pub attempts_in_window: u32,
    pub rejected_in_window: u32,
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub window_duration: TimeDelta,
}

impl RateLimitState {
    fn new(now: DateTime<Utc>, max_attempts: u32, window_duration: TimeDelta) -> Self {
        Self {
            window_start: now,
            attempts_in_window: 0,
            rejected_in_window: 0,
            max_attempts,
            window_duration,
        }
    }

    fn roll_if_elapsed(&mut self, now: DateTime<Utc>) {
        if now.signed_duration_since(self.window_start) > self.window_duration {
            self.window_start = now;
            self.attempts_in_window = 0;
            self.rejected_in_window = 0;
        }
    }

    /// Time until the current window rolls over, never negative. A window
    /// that ends past the representable calendar never rolls over.
    fn retry_after(&self, now: DateTime<Utc>) -> TimeDelta {
        match self.window_start.checked_add_signed(self.window_duration) {
            Some(rolls_at) => rolls_at.signed_duration_since(now).max(TimeDelta::zero()),
            None => TimeDelta::MAX,
        }
    }
}

// ─── Limiter ─────────────────────────────────────────────────────────

/// Per-source connection-attempt limiter.
#[derive(Debug)]
pub struct ConnectionRateLimiter {
    windows: DashMap<String, RateLimitState>,
    max_attempts: u32,
    window: TimeDelta,
}

impl ConnectionRateLimiter {
    /// `max_attempts` is raised to 1.
    pub fn new(max_attempts: u32, window: TimeDelta) -> Self {
        Self {
            windows: DashMap::new(),
            max_attempts: max_attempts.max(1),
            window,
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self::new(config.max_attempts, config.window())
    }

    /// Check and count a connection attempt for `source_id` at `now`.
    pub fn try_connect(&self, source_id: &str, now: DateTime<Utc>) -> ConnectDecision {
        let mut state = self
            .windows
            .entry(source_id.to_owned())
            .or_insert_with(|| RateLimitState::new(now, self.max_attempts, self.window));

        state.roll_if_elapsed(now);

        if state.attempts_in_window >= state.max_attempts {
            state.rejected_in_window = state.rejected_in_window.saturating_add(1);
            return ConnectDecision::RateLimited {
                retry_after: state.retry_after(now),
                rejected_in_window: state.rejected_in_window,
            };
        }

        state.attempts_in_window += 1;
        ConnectDecision::Allowed {
            remaining: state.max_attempts - state.attempts_in_window,
        }
    }

    /// Drop the window for `source_id`. Returns `true` if one existed.
    pub fn reset(&self, source_id: &str) -> bool {
        self.windows.remove(source_id).is_some()
    }

    /// Copy of the current window, if the source has made any attempt.
    pub fn state(&self, source_id: &str) -> Option<RateLimitState> {
        self.windows.get(source_id).map(|s| *s)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn window(&self) -> TimeDelta {
        self.window
    }
}

impl Default for ConnectionRateLimiter {
    fn default() -> Self {
        Self::from_config(&RateLimitConfig::default())
    }
}

/// Durations on the wire are whole milliseconds.
mod millis {
    use chrono::TimeDelta;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &TimeDelta, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(value.num_milliseconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<TimeDelta, D::Error> {
        i64::deserialize(deserializer).map(TimeDelta::milliseconds)
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
