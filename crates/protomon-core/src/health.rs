//! Health scoring policy.
//!
//! Pure, side-effect-free functions that turn connection inputs into a
//! health score, an availability level and a recovery flag. [`evaluate`] is
//! the single entry point used when refreshing a record.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::types::AvailabilityLevel;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound of every health score.
pub const MAX_HEALTH_SCORE: u8 = 100;

/// Default minimum score for [`AvailabilityLevel::Full`].
pub const DEFAULT_FULL_MIN_SCORE: u8 = 80;

/// Default minimum score for [`AvailabilityLevel::Degraded`].
pub const DEFAULT_DEGRADED_MIN_SCORE: u8 = 30;

/// Default base score for a connected source whose heartbeat is stale.
pub const DEFAULT_STALE_BASE_SCORE: u8 = 50;

/// Default points subtracted per consecutive failure.
pub const DEFAULT_FAILURE_PENALTY: u8 = 5;

/// Default cap on the number of failures that are penalized.
pub const DEFAULT_MAX_PENALIZED_FAILURES: u32 = 10;

/// Default number of confirming evaluations at `Full` that end recovery.
pub const DEFAULT_RECOVERY_CONFIRMATIONS: u32 = 2;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Weights and thresholds of the scoring policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HealthPolicy {
    /// `score >= full_min_score` is `Full`.
    pub full_min_score: u8,
    /// `degraded_min_score <= score < full_min_score` is `Degraded`.
    pub degraded_min_score: u8,
    /// Base score when connected but the heartbeat is stale.
    pub stale_base_score: u8,
    /// Points subtracted per consecutive failure.
    pub failure_penalty: u8,
    /// Failures beyond this count add no further penalty.
    pub max_penalized_failures: u32,
    /// Evaluations at `Full` after entering it before `recovering` clears.
    pub recovery_confirmations: u32,
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            full_min_score: DEFAULT_FULL_MIN_SCORE,
            degraded_min_score: DEFAULT_DEGRADED_MIN_SCORE,
            stale_base_score: DEFAULT_STALE_BASE_SCORE,
            failure_penalty: DEFAULT_FAILURE_PENALTY,
            max_penalized_failures: DEFAULT_MAX_PENALIZED_FAILURES,
            recovery_confirmations: DEFAULT_RECOVERY_CONFIRMATIONS,
        }
    }
}

/// Inputs the score is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthInputs {
    pub connected: bool,
    pub consecutive_failures: u32,
    pub stale: bool,
}

/// Derived health view of a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedHealth {
    pub health_score: u8,
    pub availability_level: AvailabilityLevel,
    /// Level held before the current one was entered.
    pub previous_availability_level: AvailabilityLevel,
    pub recovering: bool,
    /// Evaluations that confirmed `Full` since it was entered.
    pub full_confirmations: u32,
    /// `false` until the first evaluation.
    pub evaluated: bool,
}

impl DerivedHealth {
    /// View of a record that has not been evaluated yet.
    #[must_use]
    pub fn pending() -> Self {
        Self {
            health_score: 0,
            availability_level: AvailabilityLevel::Unavailable,
            previous_availability_level: AvailabilityLevel::Unavailable,
            recovering: false,
            full_confirmations: 0,
            evaluated: false,
        }
    }
}

// ---------------------------------------------------------------------------
// Policy functions
// ---------------------------------------------------------------------------

/// `true` if no heartbeat was ever seen or the last one is older than
/// `threshold`. A heartbeat stamped in the future is treated as fresh.
#[must_use]
pub fn is_heartbeat_stale(
    last_heartbeat_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    threshold: TimeDelta,
) -> bool {
    match last_heartbeat_at {
        None => true,
        Some(at) => now.signed_duration_since(at) > threshold,
    }
}

/// Score in `[0, 100]` from connection state, failure streak and staleness.
///
/// Base 100 when connected and fresh, `stale_base_score` when connected but
/// stale, 0 when disconnected; minus `failure_penalty` per failure up to
/// `max_penalized_failures`, floored at 0.
#[must_use]
pub fn compute_health_score(
    connected: bool,
    consecutive_failures: u32,
    stale: bool,
    policy: &HealthPolicy,
) -> u8 {
    let base: i64 = match (connected, stale) {
        (false, _) => 0,
        (true, true) => i64::from(policy.stale_base_score),
        (true, false) => i64::from(MAX_HEALTH_SCORE),
    };
    let penalized = i64::from(consecutive_failures.min(policy.max_penalized_failures));
    let raw = base - penalized * i64::from(policy.failure_penalty);

    debug_assert!(
        raw <= i64::from(MAX_HEALTH_SCORE),
        "health score {raw} above {MAX_HEALTH_SCORE}"
    );

    #[expect(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let score = raw.clamp(0, i64::from(MAX_HEALTH_SCORE)) as u8;
    score
}

/// Map a score to its availability level.
#[must_use]
pub fn compute_availability_level(score: u8, policy: &HealthPolicy) -> AvailabilityLevel {
    if score >= policy.full_min_score {
        AvailabilityLevel::Full
    } else if score >= policy.degraded_min_score {
        AvailabilityLevel::Degraded
    } else {
        AvailabilityLevel::Unavailable
    }
}

/// Lowest score that still maps to `level`.
#[must_use]
pub fn level_lower_bound(level: AvailabilityLevel, policy: &HealthPolicy) -> u8 {
    match level {
        AvailabilityLevel::Unavailable => 0,
        AvailabilityLevel::Degraded => policy.degraded_min_score,
        AvailabilityLevel::Full => policy.full_min_score,
    }
}

/// `true` when a source has improved at least one level out of
/// `Degraded`/`Unavailable` and its score is strictly above the lower bound
/// of the level it left.
#[must_use]
pub fn is_recovering(
    previous_level: AvailabilityLevel,
    current_level: AvailabilityLevel,
    current_score: u8,
    policy: &HealthPolicy,
) -> bool {
    previous_level != AvailabilityLevel::Full
        && current_level > previous_level
        && current_score > level_lower_bound(previous_level, policy)
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Recompute the derived view from `inputs`, carrying recovery state over
/// from `prior`.
///
/// - The first evaluation of a record never starts a recovery.
/// - A level change records the left level as `previous_availability_level`
///   and starts a recovery if [`is_recovering`] holds.
/// - While the level holds, an ongoing recovery ends once `Full` has been
///   confirmed `recovery_confirmations` times, or as soon as the score drops.
#[must_use]
pub fn evaluate(prior: &DerivedHealth, inputs: HealthInputs, policy: &HealthPolicy) -> DerivedHealth {
    let health_score = compute_health_score(
        inputs.connected,
        inputs.consecutive_failures,
        inputs.stale,
        policy,
    );
    let availability_level = compute_availability_level(health_score, policy);

    if !prior.evaluated {
        return DerivedHealth {
            health_score,
            availability_level,
            previous_availability_level: availability_level,
            recovering: false,
            full_confirmations: 0,
            evaluated: true,
        };
    }

    if availability_level != prior.availability_level {
        return DerivedHealth {
            health_score,
            availability_level,
            previous_availability_level: prior.availability_level,
            recovering: is_recovering(
                prior.availability_level,
                availability_level,
                health_score,
                policy,
            ),
            full_confirmations: 0,
            evaluated: true,
        };
    }

    let full_confirmations = if availability_level == AvailabilityLevel::Full {
        prior.full_confirmations.saturating_add(1)
    } else {
        0
    };
    let confirmed = availability_level == AvailabilityLevel::Full
        && full_confirmations >= policy.recovery_confirmations.max(1);
    let recovering = prior.recovering && !confirmed && health_score >= prior.health_score;

    DerivedHealth {
        health_score,
        availability_level,
        previous_availability_level: prior.previous_availability_level,
        recovering,
        full_confirmations,
        evaluated: true,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
