//! Engine configuration, loaded from TOML.
//!
//! Every section is optional; missing values fall back to the defaults of
//! the health policy, the error history and the rate limiter.
//!
//! ```toml
//! [health]
//! full_min_score = 80
//! degraded_min_score = 30
//!
//! [staleness]
//! default_secs = 60
//!
//! [staleness.protocols]
//! mqtt = 30
//! opcua = 10
//!
//! [history]
//! capacity = 50
//!
//! [rate_limit]
//! max_attempts = 3
//! window_secs = 60
//!
//! [sources.line3-press]
//! protocol = "opcua"
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use crate::classify::DEFAULT_HISTORY_CAPACITY;
use crate::error::ConfigError;
use crate::health::{HealthPolicy, MAX_HEALTH_SCORE};
use crate::types::ProtocolKind;

/// Default heartbeat staleness threshold (seconds).
pub const DEFAULT_STALENESS_SECS: u64 = 60;

/// Default connection attempts allowed per window.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default rate-limit window (seconds).
pub const DEFAULT_RATE_WINDOW_SECS: u64 = 60;

/// Longest staleness threshold or rate-limit window accepted (ten years).
pub const MAX_DURATION_SECS: u64 = 10 * 365 * 24 * 60 * 60;

// ─── Sections ────────────────────────────────────────────────────────

/// Heartbeat staleness thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StalenessConfig {
    pub default_secs: u64,
    /// Per-protocol overrides keyed by protocol name (`mqtt`, `opcua`, ...).
    pub protocols: BTreeMap<String, u64>,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            default_secs: DEFAULT_STALENESS_SECS,
            protocols: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HistoryConfig {
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

/// Connection-attempt limiter settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RateLimitConfig {
    pub max_attempts: u32,
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> TimeDelta {
        secs(self.window_secs)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            window_secs: DEFAULT_RATE_WINDOW_SECS,
        }
    }
}

/// Per-source overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub protocol: ProtocolKind,
}

// ─── Engine Config ───────────────────────────────────────────────────

/// Complete engine configuration, fixed at registry construction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    pub health: HealthPolicy,
    pub staleness: StalenessConfig,
    pub history: HistoryConfig,
    pub rate_limit: RateLimitConfig,
    pub sources: BTreeMap<String, SourceConfig>,
}

impl EngineConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let h = &self.health;
        if h.full_min_score > MAX_HEALTH_SCORE {
            return Err(ConfigError::invalid(
                "health.full_min_score",
                format!("must be at most {MAX_HEALTH_SCORE}"),
            ));
        }
        if h.degraded_min_score >= h.full_min_score {
            return Err(ConfigError::invalid(
                "health.degraded_min_score",
                "must be below health.full_min_score",
            ));
        }
        if h.stale_base_score > MAX_HEALTH_SCORE {
            return Err(ConfigError::invalid(
                "health.stale_base_score",
                format!("must be at most {MAX_HEALTH_SCORE}"),
            ));
        }
        if h.recovery_confirmations == 0 {
            return Err(ConfigError::invalid(
                "health.recovery_confirmations",
                "must be at least 1",
            ));
        }
        check_duration("staleness.default_secs", self.staleness.default_secs)?;
        for (name, secs) in &self.staleness.protocols {
            let field = format!("staleness.protocols.{name}");
            if protocol_from_name(name).is_none() {
                return Err(ConfigError::invalid(field, "unknown protocol"));
            }
            check_duration(field, *secs)?;
        }
        if self.history.capacity == 0 {
            return Err(ConfigError::invalid("history.capacity", "must be at least 1"));
        }
        if self.rate_limit.max_attempts == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.max_attempts",
                "must be at least 1",
            ));
        }
        check_duration("rate_limit.window_secs", self.rate_limit.window_secs)?;
        Ok(())
    }

    /// Protocol of a source: explicit `[sources]` entry, else id prefix.
    pub fn protocol_for(&self, source_id: &str) -> ProtocolKind {
        self.sources
            .get(source_id)
            .map_or_else(|| ProtocolKind::infer(source_id), |s| s.protocol)
    }

    /// Heartbeat staleness threshold for a protocol.
    pub fn staleness_for(&self, protocol: ProtocolKind) -> TimeDelta {
        let secs_for = self
            .staleness
            .protocols
            .get(protocol.as_str())
            .copied()
            .unwrap_or(self.staleness.default_secs);
        secs(secs_for)
    }
}

fn protocol_from_name(name: &str) -> Option<ProtocolKind> {
    [
        ProtocolKind::Mqtt,
        ProtocolKind::OpcUa,
        ProtocolKind::Modbus,
        ProtocolKind::Dnp3,
        ProtocolKind::Other,
    ]
    .into_iter()
    .find(|p| p.as_str() == name)
}

fn check_duration(field: impl Into<String>, secs: u64) -> Result<(), ConfigError> {
    if secs == 0 {
        return Err(ConfigError::invalid(field, "must be at least 1"));
    }
    if secs > MAX_DURATION_SECS {
        return Err(ConfigError::invalid(
            field,
            format!("must be at most {MAX_DURATION_SECS}"),
        ));
    }
    Ok(())
}

/// Saturates at `TimeDelta::MAX` for values a duration cannot hold.
fn secs(value: u64) -> TimeDelta {
    i64::try_from(value)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

// ─── Tests ───────────────────────────────────────────────────────────
