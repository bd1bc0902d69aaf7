//! WAL replay tests
//!
//! These tests drive the public API end to end:
//! - Records logged through the writer come back from replay
//! - A checkpoint followed by the WAL tail equals replaying everything
//! - Records duplicated around a checkpoint cut are applied once
//! - Replay of a replayed-and-reopened directory is stable

use std::sync::Arc;
use tempfile::TempDir;
use tidelog_core::{Labels, SeriesIterator, SeriesRef, SeriesSnapshot, Timestamp};
use tidelog_durability::testing::{MemoryIngester, RecordingFlusher};
use tidelog_durability::{
    noop_metrics, Checkpointer, RecoveredState, ReplayStats, Replayer, Wal, WalConfig, WalWriter,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn labels(app: &str) -> Labels {
    Labels::from_pairs([("app", app), ("env", "test")])
}

fn open_writer(config: &WalConfig, ingester: &Arc<MemoryIngester>) -> WalWriter {
    WalWriter::open(config, noop_metrics(), ingester.clone(), None).unwrap()
}

fn replay(config: &WalConfig) -> (RecoveredState, ReplayStats) {
    Replayer::new(config, Arc::new(RecordingFlusher::new()), noop_metrics())
        .replay()
        .unwrap()
}

/// Push `n` lines round-robin over `series` label sets for two tenants.
fn push_lines(wal: &WalWriter, ingester: &MemoryIngester, n: usize, series: usize, tag: &str) {
    for i in 0..n {
        let tenant = if i % 2 == 0 { "tenant-a" } else { "tenant-b" };
        let app = format!("svc-{}", i % series);
        let record = ingester.push(
            tenant,
            labels(&app),
            Timestamp::from_nanos(i as i64),
            format!("{} line {}", tag, i),
        );
        wal.log(&record).unwrap();
    }
}

type SeriesContent = (String, Vec<(String, String)>, i64, Vec<String>);

fn content(series: impl Iterator<Item = SeriesSnapshot>) -> Vec<SeriesContent> {
    let mut out: Vec<_> = series
        .map(|s| {
            (
                s.tenant.to_string(),
                s.labels
                    .iter()
                    .map(|l| (l.name.clone(), l.value.clone()))
                    .collect(),
                s.entry_count,
                s.entries.into_iter().map(|e| e.line).collect(),
            )
        })
        .collect();
    out.sort();
    out
}

#[test]
fn test_logged_records_are_replayed() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = WalConfig::for_testing(dir.path());
    let ingester = Arc::new(MemoryIngester::new());

    let wal = open_writer(&config, &ingester);
    push_lines(&wal, &ingester, 40, 4, "a");
    wal.stop().unwrap();

    let (state, stats) = replay(&config);
    assert!(!stats.repaired());
    assert_eq!(stats.entries_applied, 40);
    assert_eq!(stats.entries_skipped, 0);
    assert_eq!(state.series_count(), ingester.series_count());
    assert_eq!(content(state.series()), content(ingester.series()));
}

#[test]
fn test_checkpoint_plus_tail_equals_full_replay() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = WalConfig::for_testing(dir.path());
    let ingester = Arc::new(MemoryIngester::new());

    let wal = open_writer(&config, &ingester);
    push_lines(&wal, &ingester, 30, 3, "before");
    let info = wal.checkpointer().checkpoint().unwrap();
    assert!(info.series_written > 0);
    push_lines(&wal, &ingester, 30, 3, "after");
    wal.stop().unwrap();

    let (state, stats) = replay(&config);
    assert_eq!(stats.checkpoint, Some(info.boundary));
    assert_eq!(stats.series_loaded, info.series_written);
    assert_eq!(content(state.series()), content(ingester.series()));
}

#[test]
fn test_records_racing_the_cut_applied_once() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = WalConfig::for_testing(dir.path());
    let ingester = Arc::new(MemoryIngester::new());

    let wal = open_writer(&config, &ingester);
    push_lines(&wal, &ingester, 10, 2, "x");
    let checkpointer = Checkpointer::new(
        wal.segmented_log().clone(),
        ingester.clone(),
        noop_metrics(),
        config.checkpoint_interval(),
    );
    checkpointer.checkpoint().unwrap();

    // A record that is in the checkpoint and logged again after the cut,
    // as happens when a push lands between the cut and the snapshot.
    let record = ingester.push("tenant-a", labels("svc-0"), Timestamp::from_nanos(99), "late");
    wal.log(&record).unwrap();
    checkpointer.checkpoint().unwrap();
    wal.log(&record).unwrap();
    wal.stop().unwrap();

    let (state, stats) = replay(&config);
    assert_eq!(stats.entries_applied, 0);
    assert_eq!(stats.entries_skipped, 1);
    assert_eq!(content(state.series()), content(ingester.series()));
}

#[test]
fn test_restart_cycles_are_stable() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = WalConfig::for_testing(dir.path());

    let first = Arc::new(MemoryIngester::new());
    let wal = open_writer(&config, &first);
    push_lines(&wal, &first, 12, 3, "one");
    wal.stop().unwrap();
    drop(wal);

    // Restart: replay, rebuild the ingester, keep writing.
    let (state, _) = replay(&config);
    let second = Arc::new(MemoryIngester::from_state(state));
    let wal = open_writer(&config, &second);
    push_lines(&wal, &second, 12, 4, "two");
    wal.stop().unwrap();

    let (state, stats) = replay(&config);
    assert!(!stats.repaired());
    assert_eq!(content(state.series()), content(second.series()));
    assert_eq!(
        state.get("tenant-a", SeriesRef(1)).map(|s| s.entry_count),
        second.get("tenant-a", SeriesRef(1)).map(|s| s.entry_count)
    );
}

#[test]
fn test_replay_without_wal_dir() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = WalConfig::for_testing(dir.path().join("never-created"));

    let (state, stats) = replay(&config);
    assert!(state.is_empty());
    assert_eq!(stats, ReplayStats { duration: stats.duration, ..Default::default() });
    assert!(!config.dir.exists());
}
