use std::sync::Arc;
use std::thread;

use protomon_registry::ProtocolStatusRegistry;
use protomon_registry::config::EngineConfig;
use protomon_registry::types::{AvailabilityLevel, RawError};

const SOURCES: [&str; 4] = ["mqtt", "opcua-line3", "modbus-1", "dnp3-substation"];

#[test]
fn writers_on_distinct_sources_do_not_interfere() {
    let reg = Arc::new(ProtocolStatusRegistry::new(EngineConfig::default()));

    let handles: Vec<_> = SOURCES
        .iter()
        .map(|&id| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for _ in 0..200 {
                    reg.report_error(id, &RawError::new("read timeout"));
                }
                reg.report_connected(id);
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    let snaps = reg.snapshot_all();
    assert_eq!(snaps.len(), SOURCES.len());
    for snap in snaps {
        assert!(snap.connected, "{} not connected", snap.source_id);
        assert_eq!(snap.consecutive_failures, 0);
        assert_eq!(snap.availability_level, AvailabilityLevel::Full);
        assert_eq!(snap.recent_errors.len(), 50);
    }
}

#[test]
fn concurrent_errors_on_one_source_are_all_counted() {
    let reg = Arc::new(ProtocolStatusRegistry::new(EngineConfig::default()));
    let threads = 8;
    let per_thread = 250;

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for _ in 0..per_thread {
                    reg.report_error("modbus-1", &RawError::with_hint("TIMEOUT", "read timeout"));
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().expect("writer thread panicked");
    }

    let snap = reg.snapshot("modbus-1").expect("known source");
    assert_eq!(snap.consecutive_failures, threads * per_thread);
    assert_eq!(snap.health_score, 0);
}

#[test]
fn readers_always_see_consistent_derived_fields() {
    let reg = Arc::new(ProtocolStatusRegistry::new(EngineConfig::default()));
    reg.report_connected("opcua-line3");

    let writer = {
        let reg = Arc::clone(&reg);
        thread::spawn(move || {
            for n in 0..500 {
                if n % 3 == 0 {
                    reg.report_error("opcua-line3", &RawError::new("connection reset"));
                } else {
                    reg.report_heartbeat("opcua-line3");
                }
            }
        })
    };

    let readers: Vec<_> = (0..4)
        .map(|_| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || {
                for _ in 0..500 {
                    let snap = reg.snapshot("opcua-line3").expect("known source");
                    // Score and level always agree with the inputs they came from.
                    if snap.connected {
                        assert_eq!(snap.consecutive_failures, 0);
                        assert_eq!(snap.health_score, 100);
                        assert_eq!(snap.availability_level, AvailabilityLevel::Full);
                    } else {
                        assert_eq!(snap.health_score, 0);
                        assert_eq!(snap.availability_level, AvailabilityLevel::Unavailable);
                    }
                }
            })
        })
        .collect();

    writer.join().expect("writer thread panicked");
    for reader in readers {
        reader.join().expect("reader thread panicked");
    }
}

#[test]
fn rate_limiter_admits_exactly_max_attempts_under_contention() {
    let reg = Arc::new(ProtocolStatusRegistry::new(EngineConfig::default()));

    let handles: Vec<_> = (0..16)
        .map(|_| {
            let reg = Arc::clone(&reg);
            thread::spawn(move || reg.try_connect("mqtt").is_allowed())
        })
        .collect();
    let allowed = handles
        .into_iter()
        .map(|h| h.join().expect("thread panicked"))
        .filter(|allowed| *allowed)
        .count();

    assert_eq!(allowed, 3);
}
