//! `protomon replay`: feed a recorded event log through a registry offline.
//!
//! One JSON object per line:
//!
//! ```text
//! {"at":"2026-03-01T08:00:00Z","source_id":"modbus-1","event":"error","category_hint":"TIMEOUT","message":"read timeout"}
//! {"at":"2026-03-01T08:00:05Z","source_id":"modbus-1","event":"connected"}
//! ```
//!
//! Time is taken from `at` only, so a replay is deterministic. Blank lines and
//! lines starting with `#` are skipped.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use protomon_core::config::EngineConfig;
use protomon_core::types::{RawError, StatusSnapshot};
use protomon_registry::ProtocolStatusRegistry;
use protomon_registry::clock::ManualClock;

#[derive(Debug, Deserialize)]
struct ReplayEvent {
    at: DateTime<Utc>,
    source_id: String,
    #[serde(flatten)]
    kind: EventKind,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum EventKind {
    Connected,
    Heartbeat,
    Disconnected,
    Error {
        #[serde(default)]
        category_hint: Option<String>,
        message: String,
    },
    TryConnect,
    Reset,
    Snapshot,
}

pub fn replay_file(config: EngineConfig, path: &Path) -> anyhow::Result<Vec<StatusSnapshot>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read event log {}", path.display()))?;
    replay_str(config, &text)
}

/// Replay every event in `text` and return the final statuses, ordered by
/// source id. Snapshots are taken at the time of the last event.
pub fn replay_str(config: EngineConfig, text: &str) -> anyhow::Result<Vec<StatusSnapshot>> {
    let events = parse_events(text)?;
    let Some(first) = events.first() else {
        return Ok(Vec::new());
    };

    let clock = Arc::new(ManualClock::new(first.at));
    let registry = ProtocolStatusRegistry::with_clock(config, clock.clone());

    for event in &events {
        clock.set(event.at);
        apply(&registry, event);
    }

    tracing::info!("replayed {} events", events.len());
    Ok(registry.snapshot_all())
}

fn parse_events(text: &str) -> anyhow::Result<Vec<ReplayEvent>> {
    let mut events: Vec<ReplayEvent> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let lineno = idx + 1;
        let event: ReplayEvent =
            serde_json::from_str(line).with_context(|| format!("line {lineno}: invalid event"))?;
        if let Some(prev) = events.last() {
            if event.at < prev.at {
                anyhow::bail!(
                    "line {lineno}: event at {} is earlier than the previous event at {}",
                    event.at,
                    prev.at
                );
            }
        }
        events.push(event);
    }
    Ok(events)
}

fn apply(registry: &ProtocolStatusRegistry, event: &ReplayEvent) {
    let id = event.source_id.as_str();
    match &event.kind {
        EventKind::Connected => registry.report_connected(id),
        EventKind::Heartbeat => registry.report_heartbeat(id),
        EventKind::Disconnected => registry.report_disconnected(id),
        EventKind::Error {
            category_hint,
            message,
        } => {
            let raw = RawError {
                category_hint: category_hint.clone(),
                message: message.clone(),
            };
            registry.report_error(id, &raw);
        }
        EventKind::TryConnect => {
            let decision = registry.try_connect(id);
            tracing::debug!("{} try_connect {id}: {decision:?}", event.at);
        }
        EventKind::Reset => registry.reset(id),
        EventKind::Snapshot => {
            if registry.snapshot(id).is_none() {
                tracing::debug!("{} snapshot {id}: not found", event.at);
            }
        }
    }
}
