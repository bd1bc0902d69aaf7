//! Metrics sink for WAL, checkpoint and replay activity
//!
//! The durability layer reports through [`MetricsSink`] and never depends
//! on a metrics backend. Every method has a no-op default, so a sink only
//! overrides what it exports. [`WalMetrics`] is an in-process counter set
//! used by tests and by embedders that poll instead of push.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Receiver of durability events.
pub trait MetricsSink: Send + Sync {
    /// A record was appended to the log
    fn record_logged(&self) {}

    /// Bytes appended to the log, framing included
    fn bytes_logged(&self, _bytes: u64) {}

    /// A checkpoint cycle succeeded
    fn checkpoint_succeeded(&self, _duration: Duration) {}

    /// A checkpoint cycle failed
    fn checkpoint_failed(&self) {}

    /// A segment or an old checkpoint could not be deleted
    fn checkpoint_deletion_failed(&self) {}

    /// Replay finished
    fn replay_completed(&self, _duration: Duration) {}

    /// Replay flushed state to storage because of the memory ceiling
    fn replay_flushed(&self) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {}

/// Shared no-op sink
pub fn noop_metrics() -> Arc<dyn MetricsSink> {
    Arc::new(NoopMetrics)
}

/// Atomic counters implementing [`MetricsSink`].
#[derive(Debug, Default)]
pub struct WalMetrics {
    records_logged: AtomicU64,
    bytes_logged: AtomicU64,
    checkpoints_succeeded: AtomicU64,
    checkpoints_failed: AtomicU64,
    checkpoint_deletion_failures: AtomicU64,
    last_checkpoint_micros: AtomicU64,
    replays_completed: AtomicU64,
    last_replay_micros: AtomicU64,
    replay_flushes: AtomicU64,
}

/// Point-in-time copy of [`WalMetrics`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WalMetricsSnapshot {
    /// Records appended
    pub records_logged: u64,
    /// Bytes appended
    pub bytes_logged: u64,
    /// Successful checkpoints
    pub checkpoints_succeeded: u64,
    /// Failed checkpoints
    pub checkpoints_failed: u64,
    /// Failed segment or checkpoint deletions
    pub checkpoint_deletion_failures: u64,
    /// Duration of the latest successful checkpoint
    pub last_checkpoint_duration: Duration,
    /// Completed replays
    pub replays_completed: u64,
    /// Duration of the latest replay
    pub last_replay_duration: Duration,
    /// Ceiling-triggered flushes during replay
    pub replay_flushes: u64,
}

impl WalMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// Read all counters
    pub fn snapshot(&self) -> WalMetricsSnapshot {
        WalMetricsSnapshot {
            records_logged: self.records_logged.load(Ordering::Relaxed),
            bytes_logged: self.bytes_logged.load(Ordering::Relaxed),
            checkpoints_succeeded: self.checkpoints_succeeded.load(Ordering::Relaxed),
            checkpoints_failed: self.checkpoints_failed.load(Ordering::Relaxed),
            checkpoint_deletion_failures: self.checkpoint_deletion_failures.load(Ordering::Relaxed),
            last_checkpoint_duration: Duration::from_micros(
                self.last_checkpoint_micros.load(Ordering::Relaxed),
            ),
            replays_completed: self.replays_completed.load(Ordering::Relaxed),
            last_replay_duration: Duration::from_micros(
                self.last_replay_micros.load(Ordering::Relaxed),
            ),
            replay_flushes: self.replay_flushes.load(Ordering::Relaxed),
        }
    }
}

impl MetricsSink for WalMetrics {
    fn record_logged(&self) {
        self.records_logged.fetch_add(1, Ordering::Relaxed);
    }

    fn bytes_logged(&self, bytes: u64) {
        self.bytes_logged.fetch_add(bytes, Ordering::Relaxed);
    }

    fn checkpoint_succeeded(&self, duration: Duration) {
        self.checkpoints_succeeded.fetch_add(1, Ordering::Relaxed);
        self.last_checkpoint_micros
            .store(duration.as_micros() as u64, Ordering::Relaxed);
    }

    fn checkpoint_failed(&self) {
        self.checkpoints_failed.fetch_add(1, Ordering::Relaxed);
    }

    fn checkpoint_deletion_failed(&self) {
        self.checkpoint_deletion_failures
            .fetch_add(1, Ordering::Relaxed);
    }

    fn replay_completed(&self, duration: Duration) {
        self.replays_completed.fetch_add(1, Ordering::Relaxed);
        self.last_replay_micros
            .store(duration.as_micros() as u64, Ordering::Relaxed);
    }

    fn replay_flushed(&self) {
        self.replay_flushes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_accumulate() {
        let m = WalMetrics::new();
        m.record_logged();
        m.record_logged();
        m.bytes_logged(100);
        m.bytes_logged(28);
        m.checkpoint_succeeded(Duration::from_millis(3));
        m.checkpoint_failed();
        m.replay_flushed();

        let s = m.snapshot();
        assert_eq!(s.records_logged, 2);
        assert_eq!(s.bytes_logged, 128);
        assert_eq!(s.checkpoints_succeeded, 1);
        assert_eq!(s.checkpoints_failed, 1);
        assert_eq!(s.last_checkpoint_duration, Duration::from_millis(3));
        assert_eq!(s.replay_flushes, 1);
    }

    #[test]
    fn test_noop_sink_accepts_everything() {
        let sink = noop_metrics();
        sink.record_logged();
        sink.bytes_logged(1);
        sink.checkpoint_succeeded(Duration::ZERO);
        sink.checkpoint_failed();
        sink.checkpoint_deletion_failed();
        sink.replay_completed(Duration::ZERO);
        sink.replay_flushed();
    }
}
