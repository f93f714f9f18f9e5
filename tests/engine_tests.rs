//! Integration tests for the statistics engine.
//!
//! Tests verify:
//! - Ingest validation and per-kind counting
//! - Rotation at hour boundaries and eviction of old units
//! - Query window shape for hourly and daily granularity
//! - Clear, close and reopen behaviour
//! - Concurrent ingest across a rotation

use dns_stats::{
    Event, ResultKind, RotationConfig, StatsConfig, StatsEngine, TimeUnit, UnitClock, UnitId,
    UnitStore,
};
use std::net::IpAddr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// Unit clock driven by the test.
struct ManualClock(AtomicI64);

impl ManualClock {
    fn at(id: UnitId) -> Arc<Self> {
        Arc::new(Self(AtomicI64::new(id)))
    }

    fn advance(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl UnitClock for ManualClock {
    fn unit_id(&self) -> UnitId {
        self.0.load(Ordering::SeqCst)
    }
}

fn test_config(dir: &tempfile::TempDir, days: u32) -> StatsConfig {
    StatsConfig {
        db_path: dir.path().join("stats.db"),
        interval_days: days,
        rotation: RotationConfig {
            enabled: false,
            ..Default::default()
        },
    }
}

fn client(addr: &str) -> IpAddr {
    addr.parse().unwrap()
}

fn query_event(domain: &str) -> Event {
    Event::new(ResultKind::NotFiltered, domain, client("192.168.0.10"), 1_000)
}

fn open_at(dir: &tempfile::TempDir, days: u32, id: UnitId) -> Arc<StatsEngine> {
    StatsEngine::open_with_clock(test_config(dir, days), ManualClock::at(id)).unwrap()
}

// ============================================================================
// INGEST
// ============================================================================

#[test]
fn test_ingest_counts_each_kind_once() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_at(&dir, 1, 480_000);

    engine.ingest(&query_event("example.org"));
    engine.ingest(&Event::new(ResultKind::Filtered, "ads.example", client("192.168.0.10"), 2_000));
    engine.ingest(&Event::new(
        ResultKind::SafeBrowsing,
        "phish.example",
        client("10.0.0.1"),
        3_000,
    ));
    engine.ingest(&Event::new(ResultKind::SafeSearch, "search.example", client("10.0.0.1"), 4_000));
    engine.ingest(&Event::new(ResultKind::Parental, "adult.example", client("::1"), 5_000));

    let report = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(report.num_dns_queries, 5);
    assert_eq!(report.num_blocked_filtering, 1);
    assert_eq!(report.num_replaced_safebrowsing, 1);
    assert_eq!(report.num_replaced_safesearch, 1);
    assert_eq!(report.num_replaced_parental, 1);

    assert_eq!(report.top_queried_domains.len(), 1);
    assert_eq!(report.top_queried_domains[0].name, "example.org");
    assert_eq!(report.top_blocked_domains.len(), 4);
    assert_eq!(report.top_clients[0].name, "10.0.0.1");
    assert_eq!(report.top_clients[0].count, 2);
    // 15000 usec over 5 queries
    assert!((report.avg_processing_time - 0.003).abs() < 1e-12);

    engine.close();
}

#[test]
fn test_invalid_events_are_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_at(&dir, 1, 480_000);

    let valid = query_event("example.org");
    engine.ingest(&Event {
        result: None,
        ..valid.clone()
    });
    engine.ingest(&Event {
        domain: String::new(),
        ..valid.clone()
    });
    engine.ingest(&Event {
        client: vec![10, 0, 0],
        ..valid.clone()
    });
    engine.ingest(&Event {
        client: Vec::new(),
        ..valid
    });

    let report = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(report.num_dns_queries, 0);
    assert!(report.top_clients.is_empty());
    assert!(report.top_queried_domains.is_empty());

    engine.close();
}

// ============================================================================
// ROTATION
// ============================================================================

#[test]
fn test_rotation_persists_retired_unit() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(480_000);
    let engine = StatsEngine::open_with_clock(test_config(&dir, 1), clock.clone()).unwrap();

    for _ in 0..10 {
        engine.ingest(&query_event("example.org"));
    }

    clock.advance();
    assert!(engine.rotate_if_needed());
    assert_eq!(engine.current_unit_id(), Some(480_001));

    engine.ingest(&query_event("next.example"));

    let report = engine.query(TimeUnit::Hours).unwrap();
    let n = report.dns_queries.len();
    assert_eq!(report.dns_queries[n - 2], 10);
    assert_eq!(report.dns_queries[n - 1], 1);
    engine.close();

    let store = UnitStore::open(dir.path().join("stats.db")).unwrap();
    let tx = store.begin(false).unwrap();
    assert_eq!(tx.get(480_000).unwrap().unwrap().n_total, 10);
    assert_eq!(tx.get(480_001).unwrap().unwrap().n_total, 1);
}

#[test]
fn test_rotation_evicts_units_outside_window() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(480_000);
    let engine = StatsEngine::open_with_clock(test_config(&dir, 1), clock.clone()).unwrap();

    // 30 hours with one query each
    for _ in 0..30 {
        engine.ingest(&query_event("example.org"));
        clock.advance();
        engine.rotate_if_needed();
    }

    let report = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(report.dns_queries.len(), 24);
    assert_eq!(report.num_dns_queries, 23);
    engine.close();

    let store = UnitStore::open(dir.path().join("stats.db")).unwrap();
    let tx = store.begin(false).unwrap();
    // now = 480_030; window starts at 480_007
    assert!(tx.get(480_006).unwrap().is_none());
    assert!(tx.get(480_007).unwrap().is_some());
}

#[test]
fn test_rotation_evicts_after_shrinking_retention() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(480_000);
    let engine = StatsEngine::open_with_clock(test_config(&dir, 7), clock.clone()).unwrap();

    // 30 hours fit in a 7 day window
    for _ in 0..30 {
        engine.ingest(&query_event("example.org"));
        clock.advance();
        engine.rotate_if_needed();
    }
    assert_eq!(engine.query(TimeUnit::Hours).unwrap().num_dns_queries, 30);

    engine.configure(1);
    clock.advance();
    assert!(engine.rotate_if_needed());

    // now = 480_031; window starts at 480_008
    let report = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(report.dns_queries.len(), 24);
    assert_eq!(report.num_dns_queries, 22);
    engine.close();

    let store = UnitStore::open(dir.path().join("stats.db")).unwrap();
    let tx = store.begin(false).unwrap();
    assert!(tx.get(480_000).unwrap().is_none());
    assert!(tx.get(480_007).unwrap().is_none());
    assert!(tx.get(480_008).unwrap().is_some());
}

#[test]
fn test_missed_rotation_keeps_window_size() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(480_000);
    let engine = StatsEngine::open_with_clock(test_config(&dir, 1), clock.clone()).unwrap();

    for _ in 0..3 {
        engine.ingest(&query_event("example.org"));
    }
    // Hour changed but the rotation task has not run yet
    clock.advance();

    let report = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(report.dns_queries.len(), 24);
    assert_eq!(report.dns_queries[22], 3);
    assert_eq!(report.dns_queries[23], 0);
    engine.close();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_rotation_and_shutdown() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(480_000);
    let config = StatsConfig {
        rotation: RotationConfig {
            poll_interval: Duration::from_millis(10),
            enabled: true,
        },
        ..test_config(&dir, 1)
    };
    let engine = StatsEngine::open_with_clock(config, clock.clone()).unwrap();

    engine.ingest(&query_event("example.org"));
    clock.advance();

    let mut rotated = false;
    for _ in 0..200 {
        if engine.current_unit_id() == Some(480_001) {
            rotated = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(rotated, "rotation task did not pick up the new hour");

    engine.close();
    assert!(engine.is_closed());
}

// ============================================================================
// QUERY
// ============================================================================

#[test]
fn test_window_length_matches_retention() {
    let dir = tempfile::tempdir().unwrap();
    let engine = open_at(&dir, 7, 480_000);

    let hourly = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(hourly.dns_queries.len(), 168);
    assert_eq!(hourly.blocked_filtering.len(), 168);
    assert_eq!(hourly.replaced_safebrowsing.len(), 168);
    assert_eq!(hourly.replaced_parental.len(), 168);

    let daily = engine.query(TimeUnit::Days).unwrap();
    assert_eq!(daily.dns_queries.len(), 7);
    assert_eq!(daily.time_units, TimeUnit::Days);

    engine.configure(1);
    assert_eq!(engine.query(TimeUnit::Hours).unwrap().dns_queries.len(), 24);

    engine.close();
}

#[test]
fn test_daily_point_sums_aligned_hours() {
    let dir = tempfile::tempdir().unwrap();
    // 480_001 % 24 == 1, so after 23 rotations the window 480_001..=480_024 is one day
    let clock = ManualClock::at(480_001);
    let engine = StatsEngine::open_with_clock(test_config(&dir, 1), clock.clone()).unwrap();

    for _ in 0..23 {
        engine.ingest(&query_event("example.org"));
        clock.advance();
        engine.rotate_if_needed();
    }
    engine.ingest(&query_event("example.org"));

    let report = engine.query(TimeUnit::Days).unwrap();
    assert_eq!(report.dns_queries, vec![24]);
    assert_eq!(report.top_queried_domains[0].count, 24);

    engine.close();
}

// ============================================================================
// LIFECYCLE
// ============================================================================

#[test]
fn test_clear_resets_everything() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(480_000);
    let engine = StatsEngine::open_with_clock(test_config(&dir, 1), clock.clone()).unwrap();

    engine.ingest(&query_event("example.org"));
    clock.advance();
    engine.rotate_if_needed();
    engine.ingest(&query_event("example.org"));

    engine.clear();

    let report = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(report.num_dns_queries, 0);
    assert!(report.dns_queries.iter().all(|n| *n == 0));
    assert!(report.top_queried_domains.is_empty());
    assert!(report.top_clients.is_empty());
    assert_eq!(report.avg_processing_time, 0.0);

    engine.close();
}

#[test]
fn test_close_then_reopen_restores_current_unit() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(480_000);

    let engine = StatsEngine::open_with_clock(test_config(&dir, 1), clock.clone()).unwrap();
    for _ in 0..4 {
        engine.ingest(&query_event("example.org"));
    }
    engine.ingest(&Event::new(ResultKind::Filtered, "ads.example", client("10.0.0.1"), 1_000));
    engine.close();

    let engine = StatsEngine::open_with_clock(test_config(&dir, 1), clock.clone()).unwrap();
    assert_eq!(engine.current_unit_id(), Some(480_000));

    engine.ingest(&query_event("example.org"));
    let report = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(report.num_dns_queries, 6);
    assert_eq!(report.num_blocked_filtering, 1);
    assert_eq!(report.top_queried_domains[0].count, 5);

    engine.close();
}

#[test]
fn test_open_fails_for_unusable_path() {
    let dir = tempfile::tempdir().unwrap();
    // Parent of the database path is a regular file
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();
    let config = StatsConfig {
        db_path: blocker.join("stats.db"),
        ..test_config(&dir, 1)
    };
    assert!(StatsEngine::open_with_clock(config, ManualClock::at(1)).is_err());
}

// ============================================================================
// CONCURRENCY
// ============================================================================

#[test]
fn test_concurrent_ingest_across_rotation() {
    let dir = tempfile::tempdir().unwrap();
    let clock = ManualClock::at(480_000);
    let engine = StatsEngine::open_with_clock(test_config(&dir, 1), clock.clone()).unwrap();

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let engine = Arc::clone(&engine);
            thread::spawn(move || {
                for i in 0..500 {
                    let addr = format!("10.0.{}.{}", t, i % 50);
                    let addr = client(&addr);
                    engine.ingest(&Event::new(ResultKind::NotFiltered, "example.org", addr, 100));
                }
            })
        })
        .collect();

    clock.advance();
    engine.rotate_if_needed();

    for writer in writers {
        writer.join().unwrap();
    }

    // Every event landed in exactly one of the two units
    let report = engine.query(TimeUnit::Hours).unwrap();
    assert_eq!(report.num_dns_queries, 2_000);

    engine.close();
}
