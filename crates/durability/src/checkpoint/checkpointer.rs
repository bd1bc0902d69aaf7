//! Periodic checkpointing
//!
//! # Algorithm
//!
//! 1. Cut the active segment; the closed segment number is the boundary
//! 2. Iterate every series through the [`SeriesIterator`] in its order and
//!    stream each snapshot into a temporary checkpoint file
//! 3. fsync, rename into place, fsync the directory
//! 4. Delete segments numbered at or below the boundary and every older
//!    checkpoint
//!
//! The snapshot is fuzzy: `log` keeps running while series are iterated.
//! Entries appended after the cut live in later segments and replay
//! deduplicates any overlap by series entry counter.
//!
//! # Safety
//!
//! - Never removes the active segment
//! - Removes nothing unless the new checkpoint is durable
//! - A failed cycle leaves earlier checkpoints and segments untouched

use parking_lot::Mutex;
use std::fs;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use tidelog_core::{SeriesIterator, SeriesSnapshot, StorageFlusher};

use super::writer::CheckpointWriter;
use super::CheckpointError;
use crate::format::checkpoint::{checkpoint_path, list_checkpoints};
use crate::format::segment::sync_dir;
use crate::metrics::MetricsSink;
use crate::wal::log::SegmentedLog;
use crate::wal::shutdown::ShutdownSignal;

/// Series handed to the flusher per call on shutdown.
const SHUTDOWN_FLUSH_BATCH: usize = 1024;

/// Checkpointer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CheckpointPhase {
    /// Waiting for the next tick
    Idle = 0,
    /// Writing series to a new checkpoint
    Snapshotting = 1,
    /// Deleting dominated segments and older checkpoints
    Truncating = 2,
}

impl CheckpointPhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CheckpointPhase::Snapshotting,
            2 => CheckpointPhase::Truncating,
            _ => CheckpointPhase::Idle,
        }
    }
}

/// Result of one successful checkpoint cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointInfo {
    /// Highest segment number the checkpoint dominates
    pub boundary: u64,
    /// Series written
    pub series_written: u64,
    /// Checkpoint file size
    pub bytes_written: u64,
    /// Wall time of the cycle
    pub duration: Duration,
    /// Segments deleted
    pub segments_removed: usize,
    /// Older checkpoints deleted
    pub checkpoints_removed: usize,
    /// Segments or checkpoints that could not be deleted
    pub deletion_failures: usize,
}

/// Resets the phase to idle on every exit path.
struct PhaseGuard<'a>(&'a AtomicU8);

impl<'a> PhaseGuard<'a> {
    fn enter(phase: &'a AtomicU8, to: CheckpointPhase) -> Self {
        phase.store(to as u8, Ordering::Release);
        PhaseGuard(phase)
    }

    fn set(&self, to: CheckpointPhase) {
        self.0.store(to as u8, Ordering::Release);
    }
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.0.store(CheckpointPhase::Idle as u8, Ordering::Release);
    }
}

/// Writes checkpoints of the ingestion layer's series and truncates the log.
pub struct Checkpointer {
    log: Arc<SegmentedLog>,
    series: Arc<dyn SeriesIterator>,
    flusher: Option<Arc<dyn StorageFlusher>>,
    metrics: Arc<dyn MetricsSink>,
    interval: Duration,
    flush_on_shutdown: bool,
    phase: AtomicU8,
    cycle: Mutex<()>,
}

impl Checkpointer {
    /// Create a checkpointer over `log`.
    pub fn new(
        log: Arc<SegmentedLog>,
        series: Arc<dyn SeriesIterator>,
        metrics: Arc<dyn MetricsSink>,
        interval: Duration,
    ) -> Self {
        Checkpointer {
            log,
            series,
            flusher: None,
            metrics,
            interval,
            flush_on_shutdown: false,
            phase: AtomicU8::new(CheckpointPhase::Idle as u8),
            cycle: Mutex::new(()),
        }
    }

    /// Flusher used for the shutdown flush (builder pattern).
    pub fn with_flusher(mut self, flusher: Option<Arc<dyn StorageFlusher>>) -> Self {
        self.flusher = flusher;
        self
    }

    /// Checkpoint and flush when the loop is told to stop (builder pattern).
    pub fn with_flush_on_shutdown(mut self, flush: bool) -> Self {
        self.flush_on_shutdown = flush;
        self
    }

    /// Current phase
    pub fn phase(&self) -> CheckpointPhase {
        CheckpointPhase::from_u8(self.phase.load(Ordering::Acquire))
    }

    /// Interval between scheduled checkpoints
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Run one checkpoint cycle.
    ///
    /// Cycles are serialized; a concurrent call waits for the running one.
    pub fn checkpoint(&self) -> Result<CheckpointInfo, CheckpointError> {
        let _cycle = self.cycle.lock();
        let start = Instant::now();

        match self.run_cycle(start) {
            Ok(info) => {
                self.metrics.checkpoint_succeeded(info.duration);
                info!(
                    target: "tidelog::checkpoint",
                    boundary = info.boundary,
                    series = info.series_written,
                    bytes = info.bytes_written,
                    segments_removed = info.segments_removed,
                    checkpoints_removed = info.checkpoints_removed,
                    duration_ms = info.duration.as_millis() as u64,
                    "Checkpoint completed"
                );
                Ok(info)
            }
            Err(e) => {
                self.metrics.checkpoint_failed();
                error!(target: "tidelog::checkpoint", error = %e, "Checkpoint failed");
                Err(e)
            }
        }
    }

    fn run_cycle(&self, start: Instant) -> Result<CheckpointInfo, CheckpointError> {
        let phase = PhaseGuard::enter(&self.phase, CheckpointPhase::Snapshotting);

        let boundary = self.log.next_segment()?;
        debug!(target: "tidelog::checkpoint", boundary, "Starting checkpoint");

        let mut writer = CheckpointWriter::create(self.log.dir(), boundary)?;
        for snapshot in self.series.series() {
            writer.write_series(&snapshot)?;
        }
        let written = writer.finish()?;

        phase.set(CheckpointPhase::Truncating);

        let removal = self.log.truncate(boundary)?;
        let mut deletion_failures = removal.failed.len();
        let (checkpoints_removed, checkpoint_failures) = self.remove_older_checkpoints(boundary);
        deletion_failures += checkpoint_failures;
        for _ in 0..deletion_failures {
            self.metrics.checkpoint_deletion_failed();
        }

        Ok(CheckpointInfo {
            boundary,
            series_written: written.series,
            bytes_written: written.bytes,
            duration: start.elapsed(),
            segments_removed: removal.removed.len(),
            checkpoints_removed,
            deletion_failures,
        })
    }

    fn remove_older_checkpoints(&self, boundary: u64) -> (usize, usize) {
        let dir = self.log.dir();
        let older = match list_checkpoints(dir) {
            Ok(all) => all.into_iter().filter(|&b| b < boundary).collect::<Vec<_>>(),
            Err(e) => {
                warn!(target: "tidelog::checkpoint", error = %e, "Failed to list checkpoints");
                return (0, 1);
            }
        };

        let mut removed = 0;
        let mut failed = 0;
        for old in older {
            match fs::remove_file(checkpoint_path(dir, old)) {
                Ok(()) => removed += 1,
                Err(e) => {
                    warn!(
                        target: "tidelog::checkpoint",
                        checkpoint = old,
                        error = %e,
                        "Failed to remove old checkpoint"
                    );
                    failed += 1;
                }
            }
        }
        if removed > 0 {
            if let Err(e) = sync_dir(dir) {
                warn!(target: "tidelog::checkpoint", error = %e, "Failed to sync WAL directory");
            }
        }
        (removed, failed)
    }

    /// Checkpoint loop body for the background thread.
    ///
    /// Runs a cycle every interval until `shutdown` fires. Failed cycles are
    /// logged and retried on the next tick. On shutdown with flush-on-shutdown
    /// enabled, writes a final checkpoint and hands every series to the
    /// flusher before returning.
    pub fn run(&self, shutdown: &ShutdownSignal) {
        info!(
            target: "tidelog::checkpoint",
            interval_ms = self.interval.as_millis() as u64,
            "Checkpointer started"
        );

        while !shutdown.wait_timeout(self.interval) {
            let _ = self.checkpoint();
        }

        if self.flush_on_shutdown {
            info!(target: "tidelog::checkpoint", "Shutting down, performing final checkpoint");
            let _ = self.checkpoint();
            if let Err(e) = self.flush_all() {
                error!(target: "tidelog::checkpoint", error = %e, "Shutdown flush failed");
            }
        }

        info!(target: "tidelog::checkpoint", "Checkpointer stopped");
    }

    /// Hand every series to the flusher, if one is configured.
    pub fn flush_all(&self) -> Result<usize, CheckpointError> {
        let Some(flusher) = self.flusher.as_ref() else {
            return Ok(0);
        };

        let mut flushed = 0;
        let mut batch: Vec<SeriesSnapshot> = Vec::with_capacity(SHUTDOWN_FLUSH_BATCH);
        for snapshot in self.series.series() {
            if snapshot.entries.is_empty() {
                continue;
            }
            batch.push(snapshot);
            if batch.len() == SHUTDOWN_FLUSH_BATCH {
                flusher.flush(&batch)?;
                flushed += batch.len();
                batch.clear();
            }
        }
        if !batch.is_empty() {
            flusher.flush(&batch)?;
            flushed += batch.len();
        }

        info!(target: "tidelog::checkpoint", series = flushed, "Flushed series on shutdown");
        Ok(flushed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::reader::validate_checkpoint;
    use crate::format::checkpoint::{list_checkpoint_temps, list_checkpoints};
    use crate::format::frame::MAX_FRAME_PAYLOAD;
    use crate::metrics::WalMetrics;
    use crate::testing::{MemoryIngester, RecordingFlusher};
    use tempfile::tempdir;
    use tidelog_core::{Entry, Labels, SeriesRef, TenantId, Timestamp};

    fn setup(dir: &std::path::Path) -> (Arc<SegmentedLog>, Arc<MemoryIngester>, Arc<WalMetrics>) {
        let log = Arc::new(SegmentedLog::open(dir, 1024 * 1024).unwrap());
        let ingester = Arc::new(MemoryIngester::new());
        (log, ingester, Arc::new(WalMetrics::new()))
    }

    #[test]
    fn test_checkpoint_writes_and_truncates() {
        let dir = tempdir().unwrap();
        let (log, ingester, metrics) = setup(dir.path());
        for i in 0..3 {
            let labels = Labels::from_pairs([("app", format!("svc-{}", i))]);
            ingester.push("t", labels, Timestamp::from_nanos(i), "line");
        }
        log.log(b"x").unwrap();

        let cp = Checkpointer::new(log.clone(), ingester, metrics.clone(), Duration::from_secs(60));
        let info = cp.checkpoint().unwrap();

        assert_eq!(info.boundary, 1);
        assert_eq!(info.series_written, 3);
        assert_eq!(info.segments_removed, 1);
        assert_eq!(log.segments().unwrap(), vec![2]);
        assert_eq!(cp.phase(), CheckpointPhase::Idle);
        assert_eq!(metrics.snapshot().checkpoints_succeeded, 1);

        let (_, series) = validate_checkpoint(&checkpoint_path(dir.path(), 1)).unwrap();
        assert_eq!(series, 3);
    }

    #[test]
    fn test_second_checkpoint_removes_first() {
        let dir = tempdir().unwrap();
        let (log, ingester, metrics) = setup(dir.path());
        let cp = Checkpointer::new(log, ingester, metrics, Duration::from_secs(60));

        cp.checkpoint().unwrap();
        let info = cp.checkpoint().unwrap();
        assert_eq!(info.checkpoints_removed, 1);
        assert_eq!(list_checkpoints(dir.path()).unwrap(), vec![info.boundary]);
    }

    #[test]
    fn test_failed_cycle_is_counted_and_returns_idle() {
        let dir = tempdir().unwrap();
        let (log, ingester, metrics) = setup(dir.path());
        log.close().unwrap();

        let cp = Checkpointer::new(log, ingester, metrics.clone(), Duration::from_secs(60));
        assert!(cp.checkpoint().is_err());
        assert_eq!(cp.phase(), CheckpointPhase::Idle);
        assert_eq!(metrics.snapshot().checkpoints_failed, 1);
        assert!(list_checkpoints(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_run_exits_on_shutdown_with_final_checkpoint_and_flush() {
        let dir = tempdir().unwrap();
        let (log, ingester, metrics) = setup(dir.path());
        ingester.push("t", Labels::from_pairs([("app", "a")]), Timestamp::from_nanos(1), "x");
        let flusher = Arc::new(RecordingFlusher::new());

        let cp = Checkpointer::new(log, ingester, metrics.clone(), Duration::from_secs(3600))
            .with_flusher(Some(flusher.clone() as Arc<dyn StorageFlusher>))
            .with_flush_on_shutdown(true);

        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        cp.run(&shutdown);

        assert_eq!(metrics.snapshot().checkpoints_succeeded, 1);
        assert_eq!(flusher.flushed_entries(), 1);
    }

    #[test]
    fn test_run_without_flush_on_shutdown_skips_final_checkpoint() {
        let dir = tempdir().unwrap();
        let (log, ingester, metrics) = setup(dir.path());
        let cp = Checkpointer::new(log, ingester, metrics.clone(), Duration::from_secs(3600));

        let shutdown = ShutdownSignal::new();
        shutdown.trigger();
        cp.run(&shutdown);
        assert_eq!(metrics.snapshot().checkpoints_succeeded, 0);
    }

    struct OversizedSeries;

    impl SeriesIterator for OversizedSeries {
        fn series(&self) -> Box<dyn Iterator<Item = SeriesSnapshot> + '_> {
            Box::new(std::iter::once_with(|| {
                let line = String::from_utf8(vec![0u8; MAX_FRAME_PAYLOAD]).unwrap();
                SeriesSnapshot {
                    tenant: TenantId::new("t"),
                    series_ref: SeriesRef(1),
                    labels: Labels::from_pairs([("app", "huge")]),
                    entry_count: 1,
                    entries: vec![Entry::new(Timestamp::from_nanos(1), line)],
                }
            }))
        }
    }

    #[test]
    fn test_unframeable_series_fails_cycle_and_keeps_segments() {
        let dir = tempdir().unwrap();
        let (log, _, metrics) = setup(dir.path());
        log.log(b"x").unwrap();

        let cp = Checkpointer::new(
            log.clone(),
            Arc::new(OversizedSeries),
            metrics.clone(),
            Duration::from_secs(60),
        );
        assert!(matches!(cp.checkpoint(), Err(CheckpointError::RecordTooLarge { .. })));

        assert_eq!(log.segments().unwrap(), vec![1, 2]);
        assert!(list_checkpoints(dir.path()).unwrap().is_empty());
        assert!(list_checkpoint_temps(dir.path()).unwrap().is_empty());
        assert_eq!(metrics.snapshot().checkpoints_failed, 1);
        assert_eq!(cp.phase(), CheckpointPhase::Idle);
    }
}
