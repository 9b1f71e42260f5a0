//! Normalized status data model shared by every protocol adapter.
//!
//! A [`ProtocolStatus`] holds the raw inputs reported by an adapter plus the
//! derived health view. The derived view is private and only changes through
//! [`ProtocolStatus::refresh`], so it can never drift from its inputs.

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::classify::ErrorHistory;
use crate::health::{DerivedHealth, HealthInputs, HealthPolicy, evaluate, is_heartbeat_stale};

// ─── Protocol Kind ───────────────────────────────────────────────────

/// Field protocol family a source speaks.
///
/// Only used to pick per-protocol configuration (heartbeat cadence); the
/// engine itself treats every protocol identically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProtocolKind {
    Mqtt,
    OpcUa,
    Modbus,
    Dnp3,
    Other,
}

impl ProtocolKind {
    /// Infer the protocol from a conventional source-id prefix
    /// (`"mqtt"`, `"opcua-line3"`, `"modbus-1"`, `"dnp3-substation"`).
    pub fn infer(source_id: &str) -> Self {
        let id = source_id.to_ascii_lowercase();
        if id.starts_with("mqtt") {
            Self::Mqtt
        } else if id.starts_with("opcua") || id.starts_with("opc-ua") || id.starts_with("opc_ua") {
            Self::OpcUa
        } else if id.starts_with("modbus") {
            Self::Modbus
        } else if id.starts_with("dnp3") {
            Self::Dnp3
        } else {
            Self::Other
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mqtt => "mqtt",
            Self::OpcUa => "opcua",
            Self::Modbus => "modbus",
            Self::Dnp3 => "dnp3",
            Self::Other => "other",
        }
    }
}

// ─── Availability Level ──────────────────────────────────────────────

/// Coarse availability derived from the health score.
///
/// Ordered: `Unavailable` < `Degraded` < `Full`.
#[derive(
    Debug, Default, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityLevel {
    #[default]
    Unavailable,
    Degraded,
    Full,
}

impl AvailabilityLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unavailable => "unavailable",
            Self::Degraded => "degraded",
            Self::Full => "full",
        }
    }
}

// ─── Error Taxonomy ──────────────────────────────────────────────────

/// Fixed taxonomy every adapter error is normalized into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    /// Transport-level failure to establish or keep a session.
    Connection,
    /// No response within the protocol-expected window.
    Timeout,
    /// Credential or certificate rejection.
    Auth,
    /// Malformed or unexpected response from the remote peer.
    Protocol,
    Unknown,
}

impl ErrorCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Auth => "auth",
            Self::Protocol => "protocol",
            Self::Unknown => "unknown",
        }
    }
}

/// Adapter error after boundary normalization: an optional category hint
/// plus a free-form message. Protocol-library error types never cross into
/// the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawError {
    #[serde(default)]
    pub category_hint: Option<String>,
    pub message: String,
}

impl RawError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            category_hint: None,
            message: message.into(),
        }
    }

    pub fn with_hint(hint: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            category_hint: Some(hint.into()),
            message: message.into(),
        }
    }
}

/// One retained error. The message is stored only as a digest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub at: DateTime<Utc>,
    pub category: ErrorCategory,
    pub message_digest: String,
}

// ─── Level Change ────────────────────────────────────────────────────

/// Emitted by [`ProtocolStatus::refresh`] when the availability level moves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelChange {
    pub source_id: String,
    pub from: AvailabilityLevel,
    pub to: AvailabilityLevel,
    pub health_score: u8,
    pub recovering: bool,
    pub at: DateTime<Utc>,
}

impl LevelChange {
    pub fn is_downgrade(&self) -> bool {
        self.to < self.from
    }
}

// ─── Protocol Status ─────────────────────────────────────────────────

/// Health record for one named source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolStatus {
    source_id: String,
    pub protocol: ProtocolKind,
    pub connected: bool,
    /// Last connect or heartbeat event.
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    /// Last time `connected` flipped.
    pub last_transition_at: DateTime<Utc>,
    /// Start of the current session, set only by an explicit connect.
    pub connected_since: Option<DateTime<Utc>>,
    /// Number of sessions established through explicit connects.
    pub sessions: u64,
    pub consecutive_failures: u32,
    pub error_history: ErrorHistory,
    health: DerivedHealth,
    last_change: Option<LevelChange>,
}

impl ProtocolStatus {
    /// Create a record that has seen no event yet.
    pub fn new(
        source_id: impl Into<String>,
        protocol: ProtocolKind,
        history_capacity: usize,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_id: source_id.into(),
            protocol,
            connected: false,
            last_heartbeat_at: None,
            last_transition_at: now,
            connected_since: None,
            sessions: 0,
            consecutive_failures: 0,
            error_history: ErrorHistory::new(history_capacity),
            health: DerivedHealth::pending(),
            last_change: None,
        }
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    /// Derived view as of the last refresh.
    pub fn health(&self) -> &DerivedHealth {
        &self.health
    }

    pub fn health_score(&self) -> u8 {
        self.health.health_score
    }

    pub fn availability_level(&self) -> AvailabilityLevel {
        self.health.availability_level
    }

    pub fn previous_availability_level(&self) -> AvailabilityLevel {
        self.health.previous_availability_level
    }

    pub fn recovering(&self) -> bool {
        self.health.recovering
    }

    /// Most recent availability-level change, if any.
    pub fn last_change(&self) -> Option<&LevelChange> {
        self.last_change.as_ref()
    }

    /// Set `connected`, stamping `last_transition_at` only on a flip.
    pub fn set_connected(&mut self, connected: bool, now: DateTime<Utc>) {
        if self.connected != connected {
            self.connected = connected;
            self.last_transition_at = now;
        }
    }

    /// Recompute the derived view from the current inputs at `now`.
    ///
    /// Returns the level change if this evaluation moved the availability
    /// level. The very first evaluation of a record never reports a change.
    pub fn refresh(
        &mut self,
        now: DateTime<Utc>,
        staleness_threshold: TimeDelta,
        policy: &HealthPolicy,
    ) -> Option<LevelChange> {
        let inputs = HealthInputs {
            connected: self.connected,
            consecutive_failures: self.consecutive_failures,
            stale: is_heartbeat_stale(self.last_heartbeat_at, now, staleness_threshold),
        };
        let next = evaluate(&self.health, inputs, policy);

        let change = (self.health.evaluated
            && next.availability_level != self.health.availability_level)
            .then(|| LevelChange {
                source_id: self.source_id.clone(),
                from: self.health.availability_level,
                to: next.availability_level,
                health_score: next.health_score,
                recovering: next.recovering,
                at: now,
            });

        self.health = next;
        if let Some(change) = &change {
            self.last_change = Some(change.clone());
        }
        change
    }

    /// Read-only view handed to the presentation layer.
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            source_id: self.source_id.clone(),
            protocol: self.protocol,
            connected: self.connected,
            health_score: self.health.health_score,
            availability_level: self.health.availability_level,
            previous_availability_level: self.health.previous_availability_level,
            recovering: self.health.recovering,
            consecutive_failures: self.consecutive_failures,
            last_heartbeat_at: self.last_heartbeat_at,
            last_transition_at: self.last_transition_at,
            connected_since: self.connected_since,
            sessions: self.sessions,
            recent_errors: self.error_history.iter().cloned().collect(),
            last_change: self.last_change.clone(),
        }
    }
}

// ─── Snapshot ────────────────────────────────────────────────────────

/// Point-in-time status of one source, as exposed to readers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub source_id: String,
    pub protocol: ProtocolKind,
    pub connected: bool,
    pub health_score: u8,
    pub availability_level: AvailabilityLevel,
    pub previous_availability_level: AvailabilityLevel,
    pub recovering: bool,
    pub consecutive_failures: u32,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
    pub last_transition_at: DateTime<Utc>,
    pub connected_since: Option<DateTime<Utc>>,
    pub sessions: u64,
    /// Oldest first.
    pub recent_errors: Vec<ErrorRecord>,
    pub last_change: Option<LevelChange>,
}

/// Fleet-wide rollup of every known source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemSummary {
    pub total: usize,
    pub full: usize,
    pub degraded: usize,
    pub unavailable: usize,
    pub recovering: usize,
    /// Worst level across all sources; `Unavailable` when there are none.
    pub overall: AvailabilityLevel,
}

impl SystemSummary {
    /// Roll up a set of snapshots.
    pub fn from_snapshots<'a>(snapshots: impl IntoIterator<Item = &'a StatusSnapshot>) -> Self {
        let mut summary = Self::default();
        let mut worst: Option<AvailabilityLevel> = None;
        for snap in snapshots {
            summary.total += 1;
            match snap.availability_level {
                AvailabilityLevel::Full => summary.full += 1,
                AvailabilityLevel::Degraded => summary.degraded += 1,
                AvailabilityLevel::Unavailable => summary.unavailable += 1,
            }
            if snap.recovering {
                summary.recovering += 1;
            }
            worst = Some(match worst {
                Some(level) => level.min(snap.availability_level),
                None => snap.availability_level,
            });
        }
        summary.overall = worst.unwrap_or(AvailabilityLevel::Unavailable);
        summary
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
