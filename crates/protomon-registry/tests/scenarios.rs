use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use protomon_registry::clock::{Clock, ManualClock};
use protomon_registry::config::EngineConfig;
use protomon_registry::types::{AvailabilityLevel, ErrorCategory, RawError};
use protomon_registry::{ConnectDecision, ProtocolStatusRegistry};

fn ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .expect("valid RFC3339 timestamp")
        .with_timezone(&Utc)
}

fn registry() -> (ProtocolStatusRegistry, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(ts("2026-03-01T08:00:00Z")));
    let reg = ProtocolStatusRegistry::with_clock(EngineConfig::default(), clock.clone());
    (reg, clock)
}

fn timeout() -> RawError {
    RawError::with_hint("TIMEOUT", "read timeout")
}

#[test]
fn unknown_source_is_not_found() {
    let (reg, _) = registry();
    assert!(reg.snapshot("mqtt").is_none());
}

#[test]
fn fresh_connect_is_full_and_not_recovering() {
    let (reg, _) = registry();
    reg.report_connected("opcua-1");

    let snap = reg.snapshot("opcua-1").expect("known source");
    assert!(snap.connected);
    assert_eq!(snap.consecutive_failures, 0);
    assert_eq!(snap.health_score, 100);
    assert_eq!(snap.availability_level, AvailabilityLevel::Full);
    assert!(!snap.recovering);
}

#[test]
fn repeated_timeouts_make_source_unavailable() {
    let (reg, _) = registry();
    for _ in 0..3 {
        assert_eq!(reg.report_error("modbus-1", &timeout()), ErrorCategory::Timeout);
    }

    let snap = reg.snapshot("modbus-1").expect("known source");
    assert_eq!(snap.consecutive_failures, 3);
    assert!(!snap.connected);
    assert_eq!(snap.health_score, 0);
    assert_eq!(snap.availability_level, AvailabilityLevel::Unavailable);
    assert_eq!(snap.recent_errors.len(), 3);
    assert!(
        snap.recent_errors
            .iter()
            .all(|e| e.category == ErrorCategory::Timeout)
    );
}

#[test]
fn reconnect_after_failures_recovers_then_settles() {
    let (reg, _) = registry();
    for _ in 0..3 {
        reg.report_error("modbus-1", &timeout());
    }
    reg.report_connected("modbus-1");

    let first = reg.snapshot("modbus-1").expect("known source");
    assert_eq!(first.consecutive_failures, 0);
    assert!(first.connected);
    assert_eq!(first.health_score, 100);
    assert_eq!(first.availability_level, AvailabilityLevel::Full);
    assert_eq!(
        first.previous_availability_level,
        AvailabilityLevel::Unavailable
    );
    assert!(first.recovering);

    let second = reg.snapshot("modbus-1").expect("known source");
    assert_eq!(second.availability_level, AvailabilityLevel::Full);
    assert!(!second.recovering);

    // History survives recovery.
    assert_eq!(second.recent_errors.len(), 3);
}

#[test]
fn recovery_from_degraded_to_full() {
    let (reg, clock) = registry();
    reg.report_connected("mqtt");
    clock.advance(TimeDelta::seconds(61));

    let stale = reg.snapshot("mqtt").expect("known source");
    assert_eq!(stale.availability_level, AvailabilityLevel::Degraded);
    assert!(!stale.recovering);

    reg.report_heartbeat("mqtt");
    let snap = reg.snapshot("mqtt").expect("known source");
    assert_eq!(snap.availability_level, AvailabilityLevel::Full);
    assert_eq!(snap.previous_availability_level, AvailabilityLevel::Degraded);
    assert!(snap.recovering);
}

#[test]
fn stale_read_after_reconnect_is_downgrade_not_recovery() {
    let (reg, clock) = registry();
    reg.report_error("dnp3-sub4", &RawError::new("connection refused"));
    assert_eq!(
        reg.snapshot("dnp3-sub4").expect("known").availability_level,
        AvailabilityLevel::Unavailable
    );

    // Connects, then the heartbeat lapses before the next read.
    reg.report_connected("dnp3-sub4");
    clock.advance(TimeDelta::seconds(61));
    let snap = reg.snapshot("dnp3-sub4").expect("known");
    assert_eq!(snap.availability_level, AvailabilityLevel::Degraded);
    assert_eq!(snap.health_score, 50);
    assert!(!snap.recovering, "a downgrade from full is not a recovery");
}

#[test]
fn downgrade_never_recovering() {
    let (reg, _) = registry();
    reg.report_connected("opcua-1");
    reg.report_error("opcua-1", &RawError::new("session closed by peer"));

    let snap = reg.snapshot("opcua-1").expect("known");
    assert_eq!(snap.availability_level, AvailabilityLevel::Unavailable);
    assert_eq!(snap.previous_availability_level, AvailabilityLevel::Full);
    assert!(!snap.recovering);
    let change = snap.last_change.expect("change recorded");
    assert!(change.is_downgrade());
}

#[test]
fn reads_are_stable_for_steady_source() {
    let (reg, clock) = registry();
    reg.report_connected("opcua-1");
    let first = reg.snapshot("opcua-1").expect("known");

    clock.advance(TimeDelta::seconds(10));
    for _ in 0..5 {
        let again = reg.snapshot("opcua-1").expect("known");
        assert_eq!(again, first);
    }
}

#[test]
fn staleness_follows_clock() {
    let (reg, clock) = registry();
    reg.report_connected("modbus-1");

    clock.advance(TimeDelta::seconds(60));
    assert_eq!(reg.snapshot("modbus-1").expect("known").health_score, 100);

    clock.advance(TimeDelta::seconds(1));
    let snap = reg.snapshot("modbus-1").expect("known");
    assert_eq!(snap.health_score, 50);
    assert_eq!(snap.availability_level, AvailabilityLevel::Degraded);
}

#[test]
fn stale_with_failures_stays_degraded_until_floor() {
    let (reg, clock) = registry();
    reg.report_connected("mqtt");
    clock.advance(TimeDelta::seconds(61));
    assert_eq!(reg.snapshot("mqtt").expect("known").health_score, 50);

    // Errors disconnect; base drops to 0 and the streak penalty floors at 0.
    for _ in 0..20 {
        reg.report_error("mqtt", &timeout());
    }
    let snap = reg.snapshot("mqtt").expect("known");
    assert_eq!(snap.consecutive_failures, 20);
    assert_eq!(snap.health_score, 0);
}

#[test]
fn error_history_is_bounded() {
    let (reg, clock) = registry();
    for n in 0..60 {
        clock.advance(TimeDelta::seconds(1));
        reg.report_error("modbus-1", &RawError::new(format!("read timeout #{n}")));
    }

    let snap = reg.snapshot("modbus-1").expect("known");
    assert_eq!(snap.consecutive_failures, 60);
    assert_eq!(snap.recent_errors.len(), 50);
    // Oldest ten were evicted.
    assert_eq!(
        snap.recent_errors[0].at,
        ts("2026-03-01T08:00:11Z"),
        "oldest retained record is the eleventh"
    );
    assert_eq!(
        snap.recent_errors.last().expect("non-empty").at,
        clock.now()
    );
}

#[test]
fn rate_limiter_three_per_minute() {
    let (reg, clock) = registry();
    for remaining in [2, 1, 0] {
        assert_eq!(
            reg.try_connect("opcua-1"),
            ConnectDecision::Allowed { remaining }
        );
    }
    clock.advance(TimeDelta::seconds(45));
    match reg.try_connect("opcua-1") {
        ConnectDecision::RateLimited { retry_after, .. } => {
            assert_eq!(retry_after, TimeDelta::seconds(15));
        }
        other => panic!("expected RateLimited, got {other:?}"),
    }

    // Other sources are unaffected.
    assert!(reg.try_connect("mqtt").is_allowed());

    clock.advance(TimeDelta::seconds(16));
    assert!(reg.try_connect("opcua-1").is_allowed());
}

#[test]
fn reset_restores_clean_slate() {
    let (reg, _) = registry();
    for _ in 0..3 {
        reg.try_connect("modbus-1");
        reg.report_error("modbus-1", &timeout());
    }
    reg.reset("modbus-1");

    let snap = reg.snapshot("modbus-1").expect("known");
    assert_eq!(snap.consecutive_failures, 0);
    assert!(snap.recent_errors.is_empty());
    assert_eq!(snap.availability_level, AvailabilityLevel::Unavailable);
    assert_eq!(
        reg.try_connect("modbus-1"),
        ConnectDecision::Allowed { remaining: 2 }
    );

    reg.report_connected("modbus-1");
    let snap = reg.snapshot("modbus-1").expect("known");
    assert_eq!(snap.availability_level, AvailabilityLevel::Full);
}

#[test]
fn summary_reflects_fleet() {
    let (reg, _) = registry();
    reg.report_connected("mqtt");
    reg.report_connected("opcua-1");
    for _ in 0..3 {
        reg.report_error("modbus-1", &timeout());
    }
    reg.report_connected("modbus-1");

    let summary = reg.summary();
    assert_eq!(summary.total, 3);
    assert_eq!(summary.full, 3);
    assert_eq!(summary.recovering, 1);
    assert_eq!(summary.overall, AvailabilityLevel::Full);
}
