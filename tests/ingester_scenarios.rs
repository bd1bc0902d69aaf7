//! End-to-end ingester scenarios
//!
//! Drives the WAL the way an ingester does: replay, start, log pushes,
//! let the checkpointer run, stop, then recover from disk alone.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::TempDir;
use tidelog::checkpoint::validate_checkpoint;
use tidelog::format::checkpoint::{checkpoint_path, list_checkpoints};
use tidelog::testing::{MemoryIngester, RecordingFlusher};
use tidelog::{
    new_wal, noop_metrics, Entry, Labels, Replayer, SeriesIterator, Timestamp, WalConfig,
    WalMetrics, WalRecord,
};

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn wait_for_checkpoint(dir: &Path, metrics: &WalMetrics) -> u64 {
    let deadline = Instant::now() + Duration::from_secs(30);
    loop {
        if metrics.snapshot().checkpoints_succeeded > 0 {
            if let Some(&latest) = list_checkpoints(dir).unwrap().last() {
                return latest;
            }
        }
        assert!(Instant::now() < deadline, "no checkpoint within 30s");
        std::thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn test_checkpoint_then_crash_replay_recovers_everything() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = WalConfig::for_testing(dir.path()).with_checkpoint_interval(Duration::from_millis(1));
    let metrics = Arc::new(WalMetrics::new());
    let ingester = Arc::new(MemoryIngester::new());

    let wal = new_wal(&config, metrics.clone(), ingester.clone(), None).unwrap();
    wal.start().unwrap();

    // Three series, five entry batches of growing size.
    let apps = ["api", "db", "cache"];
    let mut expected_entries = 0;
    for batch in 0..5 {
        let labels = Labels::from_pairs([("app", apps[batch % 3])]);
        let entries: Vec<Entry> = (0..=batch)
            .map(|i| Entry::new(Timestamp::from_nanos((batch * 10 + i) as i64), format!("b{} e{}", batch, i)))
            .collect();
        expected_entries += entries.len();
        wal.log(&ingester.append("tenant", labels, &entries)).unwrap();
    }

    // Wait for a checkpoint taken after every series existed.
    let first_seen = wait_for_checkpoint(dir.path(), &metrics);
    let before = metrics.snapshot().checkpoints_succeeded;
    let deadline = Instant::now() + Duration::from_secs(30);
    while metrics.snapshot().checkpoints_succeeded <= before && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(1));
    }
    wal.stop().unwrap();

    let latest = *list_checkpoints(dir.path()).unwrap().last().unwrap();
    assert!(latest >= first_seen);
    let (_, series) = validate_checkpoint(&checkpoint_path(dir.path(), latest)).unwrap();
    assert_eq!(series, 3);

    // Crash: nothing survives but the directory.
    let expected: Vec<_> = ingester.series().collect();
    drop(ingester);

    let (state, stats) = Replayer::new(&config, Arc::new(RecordingFlusher::new()), noop_metrics())
        .replay()
        .unwrap();
    assert!(!stats.repaired());
    assert_eq!(stats.checkpoint, Some(latest));
    assert_eq!(state.series_count(), 3);
    assert_eq!(state.buffered_entries(), expected_entries);

    let recovered: Vec<_> = state.series().collect();
    assert_eq!(recovered.len(), expected.len());
    for want in &expected {
        let got = recovered
            .iter()
            .find(|s| s.series_ref == want.series_ref)
            .unwrap();
        assert_eq!(got.labels, want.labels);
        assert_eq!(got.entries, want.entries);
        assert_eq!(got.entry_count, want.entry_count);
    }
}

#[test]
fn test_disabled_wal_accepts_everything_and_touches_nothing() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let wal_dir = dir.path().join("wal");
    let config = WalConfig::disabled().with_dir(&wal_dir);
    let ingester = Arc::new(MemoryIngester::new());

    let wal = new_wal(&config, noop_metrics(), ingester.clone(), None).unwrap();
    wal.start().unwrap();
    for i in 0..100 {
        let labels = Labels::from_pairs([("app", format!("svc-{}", i % 7))]);
        wal.log(&ingester.push("tenant", labels, Timestamp::from_nanos(i), "line")).unwrap();
    }
    let mut arbitrary = WalRecord::new("other");
    arbitrary.add_entries(tidelog::SeriesRef(42), 7, &[Entry::new(Timestamp::now(), "orphan")]);
    wal.log(&arbitrary).unwrap();
    wal.stop().unwrap();

    assert!(!wal_dir.exists());
}

#[test]
fn test_restart_after_checkpoint_keeps_writing() {
    init_tracing();
    let dir = TempDir::new().unwrap();
    let config = WalConfig::for_testing(dir.path()).with_checkpoint_interval(Duration::from_secs(3600));
    let labels = Labels::from_pairs([("app", "api")]);

    let ingester = Arc::new(MemoryIngester::new());
    let wal = new_wal(&config, noop_metrics(), ingester.clone(), None).unwrap();
    wal.start().unwrap();
    for i in 0..5 {
        wal.log(&ingester.push("tenant", labels.clone(), Timestamp::from_nanos(i), format!("first {}", i)))
            .unwrap();
    }
    wal.stop().unwrap();

    let flusher = Arc::new(RecordingFlusher::new());
    let (state, _) = Replayer::new(&config, flusher.clone(), noop_metrics()).replay().unwrap();
    let ingester = Arc::new(MemoryIngester::from_state(state));
    let wal = new_wal(&config, noop_metrics(), ingester.clone(), None).unwrap();
    wal.start().unwrap();
    for i in 0..5 {
        wal.log(&ingester.push("tenant", labels.clone(), Timestamp::from_nanos(10 + i), format!("second {}", i)))
            .unwrap();
    }
    wal.stop().unwrap();

    let (state, _) = Replayer::new(&config, flusher, noop_metrics()).replay().unwrap();
    let lines: Vec<_> = state.series().flat_map(|s| s.entries).map(|e| e.line).collect();
    assert_eq!(lines.len(), 10);
    assert_eq!(lines[0], "first 0");
    assert_eq!(lines[9], "second 4");
}
