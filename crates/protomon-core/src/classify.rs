//! Error classification and bounded error history.
//!
//! Adapter errors arrive already normalized into a [`RawError`]; this module
//! maps them onto the fixed [`ErrorCategory`] taxonomy, keeps a ring buffer
//! of recent errors per source and maintains the failure streak.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{ErrorCategory, ErrorRecord, ProtocolStatus, RawError};

/// Default ring buffer capacity.
pub const DEFAULT_HISTORY_CAPACITY: usize = 50;

/// Hex characters kept from the message digest.
const DIGEST_HEX_LEN: usize = 16;

// ─── Classification ──────────────────────────────────────────────────

/// Keyword table consulted in order when no usable hint is given.
///
/// Timeout and auth come before connection so that e.g.
/// "connection timed out" is a timeout.
const MESSAGE_KEYWORDS: &[(ErrorCategory, &[&str])] = &[
    (
        ErrorCategory::Timeout,
        &["timed out", "timeout", "deadline exceeded", "no response"],
    ),
    (
        ErrorCategory::Auth,
        &[
            "unauthorized",
            "not authorized",
            "authentication",
            "auth failed",
            "bad user name or password",
            "access denied",
            "permission denied",
            "certificate",
            "credential",
            "badidentitytoken",
            "baduseraccessdenied",
        ],
    ),
    (
        ErrorCategory::Connection,
        &[
            "connection refused",
            "connection reset",
            "connection closed",
            "connection lost",
            "broken pipe",
            "unreachable",
            "not connected",
            "eof",
            "socket",
        ],
    ),
    (
        ErrorCategory::Protocol,
        &[
            "malformed",
            "unexpected",
            "invalid response",
            "illegal function",
            "illegal data",
            "exception code",
            "crc",
            "checksum",
            "decode",
            "protocol",
        ],
    ),
];

/// Map a normalized adapter error onto the taxonomy.
///
/// A recognised `category_hint` wins; otherwise the message is matched
/// against known phrasing. Anything else is [`ErrorCategory::Unknown`].
pub fn classify(raw: &RawError) -> ErrorCategory {
    if let Some(category) = raw.category_hint.as_deref().and_then(category_from_hint) {
        return category;
    }

    let message = raw.message.to_ascii_lowercase();
    MESSAGE_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| message.contains(k)))
        .map_or(ErrorCategory::Unknown, |(category, _)| *category)
}

/// Parse an adapter-supplied hint, case-insensitively.
pub fn category_from_hint(hint: &str) -> Option<ErrorCategory> {
    match hint.trim().to_ascii_lowercase().as_str() {
        "connection" | "connect" | "transport" | "network" => Some(ErrorCategory::Connection),
        "timeout" | "timed_out" | "deadline" => Some(ErrorCategory::Timeout),
        "auth" | "authentication" | "authorization" | "certificate" | "tls" => {
            Some(ErrorCategory::Auth)
        }
        "protocol" | "decode" | "malformed" => Some(ErrorCategory::Protocol),
        "unknown" => Some(ErrorCategory::Unknown),
        _ => None,
    }
}

/// Short stable digest of an error message.
///
/// Only the digest is retained, so payload content that adapters put in
/// error messages never lands in the in-memory history.
pub fn digest_message(message: &str) -> String {
    let hash = blake3::hash(message.as_bytes());
    let mut digest = hex::encode(hash.as_bytes());
    digest.truncate(DIGEST_HEX_LEN);
    digest
}

// ─── Error History ───────────────────────────────────────────────────

/// Fixed-capacity ring buffer of recent errors, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorHistory {
    entries: VecDeque<ErrorRecord>,
    capacity: usize,
}

impl ErrorHistory {
    /// A capacity of 0 is raised to 1.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, evicting the oldest entry when full. Returns the evicted one.
    pub fn push(&mut self, record: ErrorRecord) -> Option<ErrorRecord> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(record);
        evicted
    }

    pub fn iter(&self) -> impl Iterator<Item = &ErrorRecord> {
        self.entries.iter()
    }

    /// Most recent entry.
    pub fn latest(&self) -> Option<&ErrorRecord> {
        self.entries.back()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for ErrorHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

// ─── Status Updates ──────────────────────────────────────────────────

/// Record a failure: append to history, extend the failure streak and mark
/// the source disconnected. Derived fields are left for the caller to
/// refresh.
pub fn record_error(
    status: &mut ProtocolStatus,
    category: ErrorCategory,
    message: &str,
    now: DateTime<Utc>,
) {
    status.error_history.push(ErrorRecord {
        at: now,
        category,
        message_digest: digest_message(message),
    });
    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
    status.set_connected(false, now);
}

/// Record a liveness confirmation: clear the failure streak, mark the source
/// connected and stamp the heartbeat. History is kept for diagnosis.
pub fn record_success(status: &mut ProtocolStatus, now: DateTime<Utc>) {
    status.consecutive_failures = 0;
    status.set_connected(true, now);
    status.last_heartbeat_at = Some(now);
}

// ─── Tests ───────────────────────────────────────────────────────────
