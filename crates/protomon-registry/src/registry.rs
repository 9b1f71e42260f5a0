//! Authoritative, concurrency-safe owner of every [`ProtocolStatus`].
//!
//! Records live in a sharded map: an update takes the write lock of one
//! shard for the duration of a single read-modify-write, so events for the
//! same source are linearized while unrelated sources proceed in parallel.
//! Derived fields are refreshed on every write and every read.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use protomon_core::classify::{classify, record_error, record_success};
use protomon_core::config::EngineConfig;
use protomon_core::types::{
    AvailabilityLevel, ErrorCategory, LevelChange, ProtocolStatus, RawError, StatusSnapshot,
    SystemSummary,
};

use crate::clock::{Clock, SystemClock};
use crate::rate_limiter::{ConnectDecision, ConnectionRateLimiter};

/// Something worth logging that came out of a refresh.
enum Notice {
    Changed(LevelChange),
    /// Recovery confirmed without a level change.
    Recovered { source_id: String, score: u8 },
}

/// Registry of per-source protocol status.
pub struct ProtocolStatusRegistry {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    statuses: DashMap<String, ProtocolStatus>,
    limiter: ConnectionRateLimiter,
}

impl ProtocolStatusRegistry {
    /// Registry on wall-clock time.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: EngineConfig, clock: Arc<dyn Clock>) -> Self {
        let limiter = ConnectionRateLimiter::from_config(&config.rate_limit);
        Self {
            config,
            clock,
            statuses: DashMap::new(),
            limiter,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn limiter(&self) -> &ConnectionRateLimiter {
        &self.limiter
    }

    // ── Inbound events ───────────────────────────────────────────────

    /// A session to the source was just established.
    pub fn report_connected(&self, source_id: &str) {
        self.update(source_id, |status, now| {
            let was_connected = status.connected;
            record_success(status, now);
            if !was_connected {
                status.connected_since = Some(now);
                status.sessions = status.sessions.saturating_add(1);
            }
        });
    }

    /// The source is still alive. Same effect on liveness and failure
    /// streak as a connect, without starting a new session.
    pub fn report_heartbeat(&self, source_id: &str) {
        self.update(source_id, |status, now| record_success(status, now));
    }

    /// Clean disconnect. The failure streak is left as is.
    pub fn report_disconnected(&self, source_id: &str) {
        self.update(source_id, |status, now| {
            status.set_connected(false, now);
            status.connected_since = None;
        });
    }

    /// A failure reported by the adapter. Returns the category it was
    /// classified into.
    pub fn report_error(&self, source_id: &str, raw: &RawError) -> ErrorCategory {
        let category = classify(raw);
        tracing::debug!("source {source_id} error ({}): classified", category.as_str());
        self.update(source_id, |status, now| {
            record_error(status, category, &raw.message, now);
            status.connected_since = None;
        });
        category
    }

    /// Ask whether a new connection attempt may proceed. Starts tracking
    /// the source if it is unknown.
    pub fn try_connect(&self, source_id: &str) -> ConnectDecision {
        self.update(source_id, |_, _| {});
        let decision = self.limiter.try_connect(source_id, self.clock.now());
        if let ConnectDecision::RateLimited {
            retry_after,
            rejected_in_window,
        } = decision
        {
            let retry_ms = retry_after.num_milliseconds();
            if rejected_in_window == 1 {
                tracing::warn!("source {source_id} connect attempts rate limited, retry in {retry_ms}ms");
            } else {
                tracing::debug!(
                    "source {source_id} connect attempt rejected ({rejected_in_window} in window)"
                );
            }
        }
        decision
    }

    /// Administrative reset: clear the failure streak, the error history
    /// and the rate-limit window, and hold the source at `Unavailable`
    /// until it reports again.
    pub fn reset(&self, source_id: &str) {
        self.update(source_id, |status, now| {
            status.consecutive_failures = 0;
            status.error_history.clear();
            status.set_connected(false, now);
            status.last_heartbeat_at = None;
            status.connected_since = None;
        });
        self.limiter.reset(source_id);
        tracing::info!("source {source_id} reset");
    }

    // ── Queries ──────────────────────────────────────────────────────

    /// Current view of one source, or `None` if it never reported.
    ///
    /// Staleness is re-evaluated against the current time and the refreshed
    /// derived fields are stored back.
    pub fn snapshot(&self, source_id: &str) -> Option<StatusSnapshot> {
        let (snapshot, notice) = {
            let mut status = self.statuses.get_mut(source_id)?;
            let now = self.clock.now();
            let notice = self.refresh(&mut status, now);
            (status.snapshot(), notice)
        };
        if let Some(notice) = notice {
            log_notice(&notice);
        }
        Some(snapshot)
    }

    /// Views of every known source, ordered by source id.
    ///
    /// Each source is refreshed under its own lock in turn; no lock is held
    /// across sources.
    pub fn snapshot_all(&self) -> Vec<StatusSnapshot> {
        self.source_ids()
            .iter()
            .filter_map(|id| self.snapshot(id))
            .collect()
    }

    /// Fleet-wide rollup built from fresh snapshots.
    pub fn summary(&self) -> SystemSummary {
        SystemSummary::from_snapshots(&self.snapshot_all())
    }

    /// Known source ids, sorted.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.statuses.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.statuses.contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.statuses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statuses.is_empty()
    }

    // ── Internals ────────────────────────────────────────────────────

    /// Apply `mutate` to the source's record (creating it if needed) and
    /// refresh derived fields, all under the record's lock. Logging happens
    /// after the lock is released.
    fn update<F>(&self, source_id: &str, mutate: F)
    where
        F: FnOnce(&mut ProtocolStatus, DateTime<Utc>),
    {
        let notice = {
            let mut status = self
                .statuses
                .entry(source_id.to_owned())
                .or_insert_with(|| self.new_status(source_id));
            let now = self.clock.now();
            mutate(&mut status, now);
            self.refresh(&mut status, now)
        };
        if let Some(notice) = notice {
            log_notice(&notice);
        }
    }

    fn new_status(&self, source_id: &str) -> ProtocolStatus {
        let protocol = self.config.protocol_for(source_id);
        tracing::debug!("tracking new source {source_id} ({})", protocol.as_str());
        ProtocolStatus::new(
            source_id,
            protocol,
            self.config.history.capacity,
            self.clock.now(),
        )
    }

    fn refresh(&self, status: &mut ProtocolStatus, now: DateTime<Utc>) -> Option<Notice> {
        let was_recovering = status.recovering();
        let threshold = self.config.staleness_for(status.protocol);
        match status.refresh(now, threshold, &self.config.health) {
            Some(change) => Some(Notice::Changed(change)),
            None if was_recovering
                && !status.recovering()
                && status.availability_level() == AvailabilityLevel::Full =>
            {
                Some(Notice::Recovered {
                    source_id: status.source_id().to_owned(),
                    score: status.health_score(),
                })
            }
            None => None,
        }
    }
}

fn log_notice(notice: &Notice) {
    match notice {
        Notice::Changed(change) if change.is_downgrade() => tracing::warn!(
            "source {} availability {} -> {} (score {})",
            change.source_id,
            change.from.as_str(),
            change.to.as_str(),
            change.health_score
        ),
        Notice::Changed(change) if change.recovering => tracing::info!(
            "source {} recovering: {} -> {} (score {})",
            change.source_id,
            change.from.as_str(),
            change.to.as_str(),
            change.health_score
        ),
        Notice::Changed(change) => tracing::info!(
            "source {} availability {} -> {} (score {})",
            change.source_id,
            change.from.as_str(),
            change.to.as_str(),
            change.health_score
        ),
        Notice::Recovered { source_id, score } => {
            tracing::info!("source {source_id} recovered (score {score})");
        }
    }
}

impl std::fmt::Debug for ProtocolStatusRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolStatusRegistry")
            .field("sources", &self.statuses.len())
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

// ─── Tests ───────────────────────────────────────────────────────────
