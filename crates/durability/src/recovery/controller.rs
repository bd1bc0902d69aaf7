//! Replay memory control
//!
//! Replay buffers recovered entries in memory until they exceed the
//! configured ceiling, then hands everything buffered to the storage
//! flusher. Series identity and counters stay in the recovered state.

use std::sync::Arc;
use tracing::info;

use tidelog_core::{FlushError, StorageFlusher};

use super::state::RecoveredState;
use crate::metrics::MetricsSink;

/// Tracks replayed-but-unflushed bytes against a ceiling.
pub struct ReplayController {
    ceiling: u64,
    tracked: u64,
    peak: u64,
    flushes: u64,
    entries_flushed: u64,
    flusher: Arc<dyn StorageFlusher>,
    metrics: Arc<dyn MetricsSink>,
}

impl ReplayController {
    /// Create a controller flushing through `flusher` above `ceiling` bytes.
    pub fn new(
        ceiling: u64,
        flusher: Arc<dyn StorageFlusher>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        ReplayController {
            ceiling,
            tracked: 0,
            peak: 0,
            flushes: 0,
            entries_flushed: 0,
            flusher,
            metrics,
        }
    }

    /// Called before a batch of at most `incoming` bytes is applied.
    ///
    /// Flushes first if the batch would push tracked memory past the
    /// ceiling and something is already buffered.
    pub fn before_batch(
        &mut self,
        incoming: u64,
        state: &mut RecoveredState,
    ) -> Result<(), FlushError> {
        if self.tracked > 0 && self.tracked.saturating_add(incoming) > self.ceiling {
            self.flush(state)?;
        }
        Ok(())
    }

    /// Called after a batch added `applied` bytes to the state.
    ///
    /// A batch that alone exceeds the ceiling is flushed immediately.
    pub fn after_batch(
        &mut self,
        applied: u64,
        state: &mut RecoveredState,
    ) -> Result<(), FlushError> {
        self.tracked = self.tracked.saturating_add(applied);
        self.peak = self.peak.max(self.tracked);
        if self.tracked > self.ceiling {
            self.flush(state)?;
        }
        Ok(())
    }

    /// Flush every buffered entry to storage.
    ///
    /// On failure the entries have already left the state; the error
    /// aborts replay.
    pub fn flush(&mut self, state: &mut RecoveredState) -> Result<(), FlushError> {
        let batch = state.take_unflushed();
        let freed = self.tracked;
        self.tracked = 0;
        if batch.is_empty() {
            return Ok(());
        }

        let entries: u64 = batch.iter().map(|s| s.entries.len() as u64).sum();
        self.flusher.flush(&batch)?;
        self.flushes += 1;
        self.entries_flushed += entries;
        self.metrics.replay_flushed();
        info!(
            target: "tidelog::replay",
            series = batch.len(),
            entries,
            bytes = freed,
            ceiling = self.ceiling,
            "Flushed replayed series to storage"
        );
        Ok(())
    }

    /// Bytes currently buffered
    pub fn tracked_bytes(&self) -> u64 {
        self.tracked
    }

    /// Highest buffered byte count seen
    pub fn peak_bytes(&self) -> u64 {
        self.peak
    }

    /// Flushes performed
    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    /// Entries handed to storage
    pub fn entries_flushed(&self) -> u64 {
        self.entries_flushed
    }
}
